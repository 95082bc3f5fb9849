//! # Entwine Store
//!
//! Storage abstraction for entwine: the async [`KvStore`] interface the
//! chain stores are written against, the [`PayloadSource`] seam for
//! resolving opaque payload descriptors, and two backends.
//!
//! ## Backends
//!
//! - [`SqliteKvStore`] - primary persistent backend (rusqlite, bundled)
//! - [`MemoryKvStore`] / [`MemoryPayloadStore`] - in-process, for tests

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{MemoryKvStore, MemoryPayloadStore, MEMORY_PAYLOAD_BACKEND};
pub use sqlite::SqliteKvStore;
pub use traits::{KvStore, PayloadSource};
