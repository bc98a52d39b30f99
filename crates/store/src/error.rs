//! Persistence error types.
//!
//! Backends speak in [`PersistenceError`]; everything leaving the crate is
//! converted into the shared [`entropy_core::Error`] taxonomy.

use std::fmt;

use thiserror::Error;

/// Errors that can occur during persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Failed to connect to the database
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// Query execution failed
    #[error("query failed: {reason}")]
    QueryFailed { reason: String },

    /// Record not found
    #[error("{entity_type} with urn '{id}' not found")]
    NotFound { entity_type: String, id: String },

    /// Record already exists
    #[error("{entity_type} with urn '{id}' already exists")]
    AlreadyExists { entity_type: String, id: String },

    /// Serialization/deserialization error
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    /// The pending claim on a resource expired or was taken over
    #[error("claim lost on resource '{urn}'")]
    ClaimLost { urn: String },

    /// Schema error
    #[error("schema error: {reason}")]
    SchemaError { reason: String },
}

/// Marker thrown inside transactions when the target row is missing.
pub(crate) const NOT_FOUND_MARKER: &str = "entropy:not_found";
/// Marker thrown inside transactions when the claim token no longer matches.
pub(crate) const CLAIM_LOST_MARKER: &str = "entropy:claim_lost";

impl PersistenceError {
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    pub fn query_failed(reason: impl Into<String>) -> Self {
        Self::QueryFailed {
            reason: reason.into(),
        }
    }

    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn already_exists(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn serialization_error(reason: impl Into<String>) -> Self {
        Self::SerializationError {
            reason: reason.into(),
        }
    }

    pub fn claim_lost(urn: impl Into<String>) -> Self {
        Self::ClaimLost { urn: urn.into() }
    }

    pub fn schema_error(reason: impl Into<String>) -> Self {
        Self::SchemaError {
            reason: reason.into(),
        }
    }

    /// Attach the entity identity to a generic not-found / exists error.
    #[must_use]
    pub fn for_entity(self, entity_type: &str, id: &str) -> Self {
        match self {
            Self::NotFound { .. } => Self::not_found(entity_type, id),
            Self::AlreadyExists { .. } => Self::already_exists(entity_type, id),
            Self::QueryFailed { reason } if reason.contains(CLAIM_LOST_MARKER) => {
                Self::claim_lost(id)
            }
            other => other,
        }
    }
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Helper to convert SurrealDB errors to `PersistenceError`.
pub fn from_surrealdb_error(err: impl fmt::Display) -> PersistenceError {
    let msg = err.to_string();

    if msg.contains(NOT_FOUND_MARKER) {
        PersistenceError::not_found("record", msg)
    } else if msg.contains("already exists") || msg.contains("already contains") || msg.contains("duplicate") {
        PersistenceError::already_exists("record", msg)
    } else if msg.contains("connection") || msg.contains("Connection") || msg.contains("connect") {
        PersistenceError::connection_failed(msg)
    } else {
        PersistenceError::query_failed(msg)
    }
}

impl From<PersistenceError> for entropy_core::Error {
    fn from(err: PersistenceError) -> Self {
        match &err {
            PersistenceError::NotFound { .. } => Self::not_found(err.to_string()),
            PersistenceError::AlreadyExists { .. } => Self::conflict(err.to_string()),
            _ => Self::internal("persistence failure").with_cause(err),
        }
    }
}
