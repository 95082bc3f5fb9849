//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during KV store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Key does not exist.
    #[error("key not found: {0}")]
    NotFound(String),

    /// Compare-and-swap lost: the stored value was not the expected one.
    #[error("atomic put conflict on key: {0}")]
    CasConflict(String),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
