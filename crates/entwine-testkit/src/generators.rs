//! Deterministic chain builders and proptest strategies.
//!
//! The builders are pure: payload bytes go through in-memory cursors, so
//! property tests can construct arbitrary chains without a store.

use proptest::prelude::*;
use std::io::Cursor;
use std::sync::Arc;
use uuid::Uuid;

use entwine_core::{
    DigestType, Ed25519Signer, Keypair, PayloadDescriptor, StreamMessage, SubStreamId,
    TickerMessage, UncommittedMessage,
};

/// Build a substream chain: a genesis message followed by one chained
/// message per payload, all signed with a keypair derived from `seed`.
pub fn build_chain(
    id: &SubStreamId,
    digest_type: DigestType,
    payloads: &[Vec<u8>],
    seed: [u8; 32],
) -> Vec<StreamMessage> {
    let signer: Arc<Ed25519Signer> = Arc::new(Ed25519Signer::new(Keypair::from_seed(&seed)));
    let mut messages = vec![StreamMessage::genesis(
        id.clone(),
        digest_type,
        Uuid::nil(),
        signer.as_ref(),
    )
    .expect("genesis construction cannot fail")];
    for (i, payload) in payloads.iter().enumerate() {
        let uncommitted = UncommittedMessage {
            name: format!("m{i}"),
            tags: vec![],
            payload: PayloadDescriptor::new("mem", format!("m{i}")),
            signer: signer.clone(),
        };
        let mut reader = Cursor::new(payload.clone());
        let prev = messages.last().expect("chain is never empty");
        messages.push(
            StreamMessage::chained(&uncommitted, &mut reader, prev, Uuid::nil())
                .expect("chained construction cannot fail"),
        );
    }
    messages
}

/// Build a ticker chain of `len` ticks signed from `seed`.
pub fn build_ticker_chain(digest_type: DigestType, len: usize, seed: [u8; 32]) -> Vec<TickerMessage> {
    let signer = Ed25519Signer::new(Keypair::from_seed(&seed));
    let mut ticks: Vec<TickerMessage> = Vec::with_capacity(len);
    for _ in 0..len {
        let tick = TickerMessage::chained(ticks.last(), digest_type, &signer)
            .expect("tick construction cannot fail");
        ticks.push(tick);
    }
    ticks
}

/// Strategy over the supported chain digest types.
pub fn digest_type() -> impl Strategy<Value = DigestType> {
    prop_oneof![
        Just(DigestType::Md5),
        Just(DigestType::Sha1),
        Just(DigestType::Sha256),
    ]
}

/// Strategy producing 1 to `max_count` payloads of up to 256 bytes each.
pub fn payloads(max_count: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..256), 1..max_count)
}
