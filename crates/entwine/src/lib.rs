//! # Entwine
//!
//! Tamper-evident, multi-stream append-only log. Substreams are
//! independent hash chains; a global ticker chain provides the clock they
//! anchor against, and anchoring proofs make cross-substream ordering
//! verifiable after the fact.
//!
//! ## Key Types
//!
//! - [`KvStreamStore`] - create substreams, append, query, walk history
//! - [`KvTickerStore`] - tick the global chain, anchor substreams, order
//!   messages across substreams
//! - [`SubStreamAppender`] - convenience handle bound to one substream
//!
//! Both stores are written against the async `KvStore` interface from
//! `entwine-store`; wire them to the SQLite backend for persistence or
//! the memory backend for tests.

pub mod error;
pub mod stream;
pub mod substream;
pub mod ticker;

pub use error::{EntwineError, Result};
pub use stream::KvStreamStore;
pub use substream::SubStreamAppender;
pub use ticker::KvTickerStore;
