//! Error types for filedepot.

use thiserror::Error;

/// Common error type for filedepot.
#[derive(Error, Debug)]
pub enum DepotError {
    /// Database error.
    ///
    /// Wraps failures from either store backend (sqlx or the MongoDB driver).
    #[error("database error: {0}")]
    Database(String),

    /// Blob transfer error (upload, download, rename or delete of file bytes).
    #[error("blob error: {0}")]
    Blob(String),

    /// I/O error on the local staging directories.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Identifier that is not a 24-character hex object id.
    #[error("invalid file id: {0}")]
    InvalidId(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Upload exceeded the configured size limit (bytes).
    #[error("upload exceeds the limit of {0} bytes")]
    PayloadTooLarge(u64),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for DepotError {
    fn from(e: sqlx::Error) -> Self {
        DepotError::Database(e.to_string())
    }
}

impl From<mongodb::error::Error> for DepotError {
    fn from(e: mongodb::error::Error) -> Self {
        DepotError::Database(e.to_string())
    }
}

impl From<bson::oid::Error> for DepotError {
    fn from(e: bson::oid::Error) -> Self {
        DepotError::InvalidId(e.to_string())
    }
}

/// Result type alias for filedepot operations.
pub type Result<T> = std::result::Result<T, DepotError>;
