//! Error types for entwine core.

use thiserror::Error;

use crate::crypto::DigestType;

/// Errors raised by the pure chain primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("digest type mismatch: chain uses {expected:?}, message uses {actual:?}")]
    DigestTypeMismatch {
        expected: DigestType,
        actual: DigestType,
    },

    #[error("message is not signed")]
    MissingSignature,

    #[error("signature verification failed")]
    SignatureFailed,

    #[error("malformed signature envelope: {0}")]
    MalformedSignature(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("payload read error: {0}")]
    PayloadRead(#[from] std::io::Error),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
