//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: memory-backed stores wired
//! together with deterministic keypairs.

use std::sync::Arc;
use uuid::Uuid;

use entwine::{EntwineError, KvStreamStore, KvTickerStore};
use entwine_core::{
    DigestType, Ed25519Authenticator, Ed25519Signer, Keypair, SubStreamId, TickerMessage,
    UncommittedMessage,
};
use entwine_store::{MemoryKvStore, MemoryPayloadStore};

/// A fixture with memory-backed stream and ticker stores, a payload
/// store, and separate signing identities for messages and ticks.
pub struct EntwineFixture {
    pub streams: Arc<KvStreamStore>,
    pub ticker: KvTickerStore,
    pub payloads: Arc<MemoryPayloadStore>,
    pub signer: Arc<Ed25519Signer>,
    pub tick_signer: Ed25519Signer,
}

impl EntwineFixture {
    /// Create a fixture with random keypairs.
    pub fn new() -> Self {
        Self::build(Keypair::generate(), Keypair::generate(), DigestType::Sha256)
    }

    /// Create with deterministic keypairs derived from a seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        let mut tick_seed = seed;
        tick_seed[0] = tick_seed[0].wrapping_add(1);
        Self::build(
            Keypair::from_seed(&seed),
            Keypair::from_seed(&tick_seed),
            DigestType::Sha256,
        )
    }

    /// Create with a specific chain digest type.
    pub fn with_digest_type(digest_type: DigestType) -> Self {
        Self::build(Keypair::generate(), Keypair::generate(), digest_type)
    }

    fn build(message_keys: Keypair, tick_keys: Keypair, digest_type: DigestType) -> Self {
        let payloads = Arc::new(MemoryPayloadStore::new());
        Self {
            streams: Arc::new(KvStreamStore::new(
                Arc::new(MemoryKvStore::new()),
                payloads.clone(),
                digest_type,
            )),
            ticker: KvTickerStore::new(Arc::new(MemoryKvStore::new()), digest_type),
            payloads,
            signer: Arc::new(Ed25519Signer::new(message_keys)),
            tick_signer: Ed25519Signer::new(tick_keys),
        }
    }

    /// The authenticator matching the message signer.
    pub fn authenticator(&self) -> Ed25519Authenticator {
        self.signer.authenticator()
    }

    /// Stage a payload and wrap it in an uncommitted message.
    pub fn uncommitted(&self, name: &str, tags: &[&str], payload: &[u8]) -> UncommittedMessage {
        UncommittedMessage {
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            payload: self.payloads.put(name, payload.to_vec()),
            signer: self.signer.clone(),
        }
    }

    /// Tick if the ticker is empty, create the substream anchored at the
    /// ticker head, and store its genesis proof. Returns the head tick.
    pub async fn bootstrap_substream(&self, id: &SubStreamId) -> entwine::Result<TickerMessage> {
        let head = match self.ticker.head().await {
            Ok(head) => head,
            Err(EntwineError::NotFound(_)) => self.ticker.append(&self.tick_signer).await?,
            Err(e) => return Err(e),
        };
        self.streams
            .create(id, self.signer.as_ref(), head.uuid())
            .await?;
        self.ticker.create_genesis_proof(id).await?;
        Ok(head)
    }

    /// Append `count` messages anchored at `anchor`, returning their uuids.
    pub async fn append_run(
        &self,
        id: &SubStreamId,
        anchor: Uuid,
        count: usize,
    ) -> entwine::Result<Vec<Uuid>> {
        let mut uuids = Vec::with_capacity(count);
        for i in 0..count {
            let name = format!("{id}-m{i}");
            let message = self.uncommitted(&name, &[], name.as_bytes());
            uuids.push(self.streams.append(&message, id, anchor).await?);
        }
        Ok(uuids)
    }
}

impl Default for EntwineFixture {
    fn default() -> Self {
        Self::new()
    }
}
