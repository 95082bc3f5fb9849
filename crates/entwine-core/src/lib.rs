//! # Entwine Core
//!
//! Pure primitives for entwine: chained immutable messages, anchoring
//! proofs, key derivation, and the deterministic wire codec.
//!
//! This crate contains no storage and no networking. The only I/O it
//! touches is reading payload bytes through `std::io::Read` while
//! computing payload digests.
//!
//! ## Key Types
//!
//! - [`StreamMessage`] / [`TickerMessage`] - The two chained message kinds
//! - [`Proof`] - Fingerprints tying a substream run to a ticker message
//! - [`SubStreamId`] - Identifier of one hash-chained substream
//! - [`DigestType`] - Chain digest algorithm, fixed per store
//! - [`SignatureEnvelope`] - Self-describing signature stored in messages
//!
//! ## Encoding
//!
//! Everything on the wire uses a sequential, field-order-dependent binary
//! form. See the [`wire`] module.

pub mod crypto;
pub mod error;
pub mod keys;
pub mod message;
pub mod proof;
pub mod wire;

pub use crypto::{
    hash_bytes, Authenticator, ChainHasher, DigestType, Ed25519Authenticator, Ed25519PublicKey,
    Ed25519Signer, HashAlgorithm, Keypair, PkAlgorithm, SignatureEnvelope, Signer,
};
pub use error::{CoreError, Result};
pub use keys::SubStreamId;
pub use message::{
    chain_digest, validate_stream_messages, validate_ticker_messages, PayloadDescriptor,
    StreamMessage, TickerMessage, UncommittedMessage, GENESIS_NAME,
};
pub use proof::{
    genesis_proof_uuid, MessageFingerprint, Proof, ProofSpan, GENESIS_PROOF_UUID_BYTES,
};
