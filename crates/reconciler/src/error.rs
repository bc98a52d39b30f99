//! Error types for the sync worker.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("worker task failed: {reason}")]
    WorkerFailed { reason: String },
}

impl Error {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub fn worker_failed(reason: impl Into<String>) -> Self {
        Self::WorkerFailed {
            reason: reason.into(),
        }
    }
}

impl From<Error> for entropy_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidConfig { .. } => Self::invalid("invalid sync worker configuration").with_cause(err),
            Error::WorkerFailed { .. } => Self::internal("sync worker failed").with_cause(err),
        }
    }
}
