//! # Entwine Testkit
//!
//! Testing utilities for entwine.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: memory-backed stream and ticker stores wired together
//!   with deterministic signing identities
//! - **Generators**: pure chain builders and proptest strategies for
//!   property-based testing
//!
//! ## Test Fixtures
//!
//! Quickly set up a full scenario:
//!
//! ```rust,ignore
//! use entwine_core::SubStreamId;
//! use entwine_testkit::EntwineFixture;
//!
//! let fixture = EntwineFixture::with_seed([7u8; 32]);
//! let id = SubStreamId::new("orders");
//! let tick = fixture.bootstrap_substream(&id).await?;
//! let uuids = fixture.append_run(&id, tick.uuid(), 5).await?;
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use entwine_core::{validate_stream_messages, SubStreamId};
//! use entwine_testkit::generators::{build_chain, digest_type, payloads};
//!
//! proptest! {
//!     #[test]
//!     fn chains_validate(dt in digest_type(), ps in payloads(8), seed in any::<[u8; 32]>()) {
//!         let id = SubStreamId::new("prop");
//!         let chain = build_chain(&id, dt, &ps, seed);
//!         prop_assert!(validate_stream_messages(&chain, None).unwrap());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::EntwineFixture;
pub use generators::{build_chain, build_ticker_chain};
