//! Error types for the configuration sync engine

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, SyncError>;

/// Sync engine error type
///
/// Hashing, canonicalization and diffing never produce one of these. Every
/// variant comes from the persistence boundary or from parsing persisted
/// or user-supplied identifiers.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid leaf key: {0}")]
    InvalidLeafKey(String),

    #[error("Invalid change type: {0}")]
    InvalidChangeType(String),

    #[error("Invalid {change_type} variant: {variant}")]
    InvalidVariant { change_type: String, variant: String },

    #[error("Invalid channel index: {0}")]
    InvalidChannelIndex(i64),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("No config session open for device {0}")]
    SessionNotOpen(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the error came from the storage layer
    ///
    /// Storage failures leave in-memory and pending state untouched, so the
    /// same call can be retried.
    pub fn is_persistence(&self) -> bool {
        matches!(self, SyncError::Database(_) | SyncError::Json(_))
    }
}
