//! Error taxonomy shared by the pool, guard, provisioner, ingestion and search paths.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the embedding store.
#[derive(Debug, Error)]
pub enum VectorError {
    /// A vector parameter had the wrong dimension or a non-finite/non-numeric element.
    #[error("Invalid embedding value: {reason}")]
    InvalidEmbeddingValue {
        /// Human-readable description of the offending element or length.
        reason: String,
    },

    /// A structured value was bound where a scalar identifier is required.
    #[error("Invalid {column} type: expected string or number, got {found}")]
    InvalidIdentifierType {
        /// Column the identifier was bound to (e.g. `user ID`).
        column: &'static str,
        /// JSON kind of the rejected value.
        found: &'static str,
    },

    /// No pooled connection became free within the acquire timeout.
    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted {
        /// Configured acquire timeout that elapsed.
        waited: Duration,
    },

    /// The pool was shut down.
    #[error("connection pool is closed")]
    PoolClosed,

    /// Any failure reported by Postgres or while talking to it.
    #[error("storage error: {0}")]
    Storage(String),

    /// Rejected store configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl VectorError {
    pub(crate) fn invalid_embedding(reason: impl Into<String>) -> Self {
        Self::InvalidEmbeddingValue {
            reason: reason.into(),
        }
    }

    /// True for errors caused by caller input; retrying them is pointless.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidEmbeddingValue { .. } | Self::InvalidIdentifierType { .. }
        )
    }

    /// True for resource-availability failures the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. } | Self::PoolClosed)
    }
}

impl From<tokio_postgres::Error> for VectorError {
    fn from(err: tokio_postgres::Error) -> Self {
        // `db error` alone is useless in logs.
        match err.as_db_error() {
            Some(db) => Self::Storage(format!("{}: {}", db.code().code(), db.message())),
            None => Self::Storage(err.to_string()),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VectorError>;
