//! Storage traits: the abstract interfaces the chain stores build on.
//!
//! The chain stores are storage-agnostic. Implementations include SQLite
//! (primary) and in-memory (for tests).

use async_trait::async_trait;
use std::io::Read;

use entwine_core::PayloadDescriptor;

use crate::error::Result;

/// Async key-value interface.
///
/// Keys are flat strings; all structure lives in the key derivation
/// helpers of `entwine_core::keys`. Every method is async, so every call
/// is also a cancellation point for callers running under a deadline.
///
/// # Design Notes
///
/// - **Last write wins**: `put` unconditionally overwrites.
/// - **CAS**: `atomic_put` with `prev: None` requires the key to be
///   absent; with `Some(bytes)` it requires the stored value to match.
///   A lost race is [`StoreError::CasConflict`], never silent.
/// - **Scans**: `list` returns keys in ascending lexicographic order.
///
/// [`StoreError::CasConflict`]: crate::error::StoreError::CasConflict
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store a value under a key, overwriting any existing value.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Fetch the value stored under a key, or `NotFound`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Check a key exists without fetching its value, or `NotFound`.
    async fn head(&self, key: &str) -> Result<()>;

    /// Remove a key, or `NotFound` if it does not exist.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Compare-and-swap: store `value` only if the current state matches
    /// `prev` (`None` means the key must not exist).
    async fn atomic_put(&self, key: &str, prev: Option<&[u8]>, value: &[u8]) -> Result<()>;

    /// All keys starting with `prefix`, in ascending lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Resolves an opaque payload descriptor to a readable byte stream.
///
/// The chain stores never interpret payload bytes; they only stream them
/// through a digest. Resolution is synchronous because the reader is
/// consumed inline while hashing.
pub trait PayloadSource: Send + Sync {
    fn open(&self, descriptor: &PayloadDescriptor) -> Result<Box<dyn Read + Send>>;
}
