//! Error types for the chain stores.

use thiserror::Error;

use entwine_core::CoreError;
use entwine_store::StoreError;

/// Errors surfaced by the stream and ticker stores.
///
/// `NotFound` and `InvalidInput` survive the crate boundary unchanged so
/// callers can branch on them; everything else passes through from the
/// layer that produced it.
#[derive(Debug, Error)]
pub enum EntwineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Core(CoreError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<CoreError> for EntwineError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidInput(msg) => EntwineError::InvalidInput(msg),
            // Failed verification is bad input, the same kind the anchor
            // path reports for an unverifiable run.
            e @ CoreError::SignatureFailed => EntwineError::InvalidInput(e.to_string()),
            other => EntwineError::Core(other),
        }
    }
}

impl From<StoreError> for EntwineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(key) => EntwineError::NotFound(key),
            other => EntwineError::Store(other),
        }
    }
}

/// Result type for chain store operations.
pub type Result<T> = std::result::Result<T, EntwineError>;
