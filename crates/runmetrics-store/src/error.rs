//! Error types for the metrics stores.

use runmetrics_core::EnvelopeError;
use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid metric: {0}")]
    Validation(#[from] EnvelopeError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("snapshot file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("store operation timed out")]
    Timeout,

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Whether the caller sent something the store refused (maps to 4xx).
    ///
    /// Postgres data exceptions (SQLSTATE class 22, e.g. a name longer than
    /// the ID column) count as refusals, not server faults.
    pub fn is_client_error(&self) -> bool {
        match self {
            StoreError::Validation(_) => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                db.code().is_some_and(|code| code.starts_with("22"))
            }
            _ => false,
        }
    }
}
