//! Queue error types.

use std::fmt;

use thiserror::Error;

/// Errors raised by queue backends and the dequeue loop.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// The backend rejected or failed a query.
    #[error("queue backend failed: {reason}")]
    Backend { reason: String },

    /// A job with the same id is already stored.
    #[error("job already exists: {id}")]
    DuplicateJob { id: String },

    /// The job row could not be encoded or decoded.
    #[error("job serialization failed: {reason}")]
    Serialization { reason: String },

    /// The lease was taken over or the row disappeared while it was held.
    #[error("lease lost for job '{id}'")]
    LeaseLost { id: String },
}

impl QueueError {
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }

    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    pub fn lease_lost(id: impl fmt::Display) -> Self {
        Self::LeaseLost { id: id.to_string() }
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Classify a SurrealDB failure.
pub fn from_surrealdb_error(err: impl fmt::Display) -> QueueError {
    let msg = err.to_string();
    if msg.contains("already exists") {
        QueueError::DuplicateJob { id: msg }
    } else {
        QueueError::backend(msg)
    }
}

impl From<QueueError> for entropy_core::Error {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::DuplicateJob { .. } => Self::conflict("job already enqueued").with_cause(err),
            other => Self::internal("job queue failure").with_cause(other),
        }
    }
}
