//! Failures talking to infrastructure.

use std::time::Duration;

use thiserror::Error;

/// Wait before retrying a failed infrastructure call.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InfraError {
    #[error("failed to run {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("failed to parse {program} output: {reason}")]
    Parse { program: String, reason: String },

    #[error("invalid cluster connection: {reason}")]
    Connection { reason: String },
}

impl InfraError {
    pub fn spawn(program: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Spawn {
            program: program.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(program: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Parse {
            program: program.into(),
            reason: reason.to_string(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type InfraResult<T> = std::result::Result<T, InfraError>;

/// Command and lookup failures are transient; a bad connection is not.
impl From<InfraError> for entropy_core::Error {
    fn from(err: InfraError) -> Self {
        match err {
            InfraError::Connection { .. } => Self::invalid("cluster connection is unusable").with_cause(err),
            InfraError::Parse { .. } => Self::internal("unexpected infrastructure response").with_cause(err),
            InfraError::Spawn { .. } | InfraError::CommandFailed { .. } | InfraError::NotFound { .. } => {
                Self::retryable(DEFAULT_RETRY_AFTER, err)
            }
        }
    }
}
