//! Error taxonomy shared by every Entropy component.
//!
//! Errors are explicit values: a closed [`ErrorKind`], a user-facing message
//! and an optional cause. Wrapping keeps the kind of the innermost error so a
//! `NotFound` raised deep inside the store is still a `NotFound` once it
//! reaches the API boundary.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of error kinds understood by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request is malformed or not allowed in the current state.
    Invalid,
    /// The referenced entity does not exist.
    NotFound,
    /// An entity with the same identity already exists.
    Conflict,
    /// Anything the caller cannot fix.
    Internal,
    /// The operation is not supported for this entity.
    Unsupported,
}

impl ErrorKind {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Invalid => "bad_request",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Internal => "internal_error",
            Self::Unsupported => "unsupported",
        }
    }

    /// Message used when no specific message is attached.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::Invalid => "Request is not valid",
            Self::NotFound => "Requested entity not found",
            Self::Conflict => "An entity with conflicting identifier exists",
            Self::Internal => "Some unexpected error occurred",
            Self::Unsupported => "Requested feature is not supported",
        }
    }

    /// gRPC status code name for this kind.
    #[must_use]
    pub const fn grpc_code(self) -> &'static str {
        match self {
            Self::Invalid => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "ALREADY_EXISTS",
            Self::Unsupported => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
        }
    }

    /// HTTP status code for this kind.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::Invalid => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Unsupported => 501,
            Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error value carried through every Entropy API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}{}", render_cause(.cause))]
pub struct Error {
    kind: ErrorKind,
    message: String,
    cause: Option<String>,
    retry_after: Option<Duration>,
}

#[allow(clippy::ref_option)]
fn render_cause(cause: &Option<String>) -> String {
    cause
        .as_deref()
        .map_or_else(String::new, |c| format!(" (cause: {c})"))
}

impl Error {
    /// Create an error of the given kind with its default message.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.default_message().to_string(),
            cause: None,
            retry_after: None,
        }
    }

    /// Create an invalid-request error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid).with_msg(message)
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound).with_msg(message)
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict).with_msg(message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_msg(message)
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported).with_msg(message)
    }

    /// Create a transient failure that should be retried after `after`.
    ///
    /// The kind stays [`ErrorKind::Internal`]; the retry hint travels alongside.
    pub fn retryable(after: Duration, cause: impl fmt::Display) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: "transient failure, will be retried".to_string(),
            cause: Some(cause.to_string()),
            retry_after: Some(after),
        }
    }

    /// Replace the user-facing message.
    #[must_use]
    pub fn with_msg(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attach a cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Wrap this error with a new message. The kind and retry hint survive;
    /// the previous message becomes (part of) the cause.
    #[must_use]
    pub fn wrap(self, message: impl Into<String>) -> Self {
        let cause = match self.cause {
            Some(inner) => format!("{}: {inner}", self.message),
            None => self.message,
        };
        Self {
            kind: self.kind,
            message: message.into(),
            cause: Some(cause),
            retry_after: self.retry_after,
        }
    }

    /// Re-label this error with another kind, keeping message and cause.
    ///
    /// Used at boundaries that deliberately collapse kinds (e.g. a driver
    /// failure that is not `Invalid` becomes `Internal`).
    #[must_use]
    pub fn into_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// True when both errors share the same kind.
    #[must_use]
    pub fn is(&self, other: &Self) -> bool {
        self.kind == other.kind
    }

    /// True when this error has the given kind.
    #[must_use]
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    /// Minimum wait requested by a retryable failure.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.retry_after.is_some()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Result type used across Entropy crates.
pub type Result<T> = std::result::Result<T, Error>;
