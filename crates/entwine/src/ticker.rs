//! Ticker store: the global chain and the anchoring proof lifecycle.
//!
//! One process-wide mutex serializes ticks. Proofs live per substream at
//! monotonically increasing indexes; each proof is persisted with a
//! create-only compare-and-swap, so two racing anchors for the same
//! substream cannot both claim an index. Anchors for different substreams
//! run fully in parallel.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use entwine_core::keys;
use entwine_core::{
    Authenticator, DigestType, Proof, Signer, StreamMessage, SubStreamId, TickerMessage,
};
use entwine_store::{KvStore, StoreError};

use crate::error::{EntwineError, Result};
use crate::stream::walk_back;

/// Store for the global ticker chain, backed by a [`KvStore`].
pub struct KvTickerStore {
    kv: Arc<dyn KvStore>,
    digest_type: DigestType,
    tick_lock: Mutex<()>,
    head_cache: RwLock<Option<TickerMessage>>,
    proof_indexes: DashMap<SubStreamId, u64>,
    proof_locks: DashMap<SubStreamId, Arc<Mutex<()>>>,
}

impl KvTickerStore {
    pub fn new(kv: Arc<dyn KvStore>, digest_type: DigestType) -> Self {
        Self {
            kv,
            digest_type,
            tick_lock: Mutex::new(()),
            head_cache: RwLock::new(None),
            proof_indexes: DashMap::new(),
            proof_locks: DashMap::new(),
        }
    }

    pub fn digest_type(&self) -> DigestType {
        self.digest_type
    }

    fn proof_lock(&self, id: &SubStreamId) -> Arc<Mutex<()>> {
        self.proof_locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Append one tick to the global chain.
    pub async fn append(&self, signer: &dyn Signer) -> Result<TickerMessage> {
        let _guard = self.tick_lock.lock().await;

        let head = match self.head().await {
            Ok(h) => Some(h),
            Err(EntwineError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let tick = TickerMessage::chained(head.as_ref(), self.digest_type, signer)?;

        // The first tick has no prev pointer.
        if let Some(prev) = &head {
            self.kv
                .put(
                    &keys::previous_node_key(&tick.uuid()),
                    &keys::uuid_to_bytes(&prev.uuid()),
                )
                .await?;
        }
        self.kv
            .put(&keys::primary_record_key(&tick.uuid()), &tick.to_bytes())
            .await?;

        let prev_head = head.as_ref().map(|h| keys::uuid_to_bytes(&h.uuid()));
        self.kv
            .atomic_put(
                keys::TICKER_HEAD_KEY,
                prev_head.as_ref().map(|b| b.as_slice()),
                &keys::uuid_to_bytes(&tick.uuid()),
            )
            .await?;

        *self.head_cache.write() = Some(tick.clone());
        debug!(uuid = %tick.uuid(), idx = tick.idx(), "appended tick");
        Ok(tick)
    }

    /// The latest tick. `NotFound` before the first append.
    pub async fn head(&self) -> Result<TickerMessage> {
        let cached = self.head_cache.read().clone();
        if let Some(head) = cached {
            return Ok(head);
        }
        let uuid_bytes = self.kv.get(keys::TICKER_HEAD_KEY).await?;
        let head_uuid = keys::bytes_to_uuid(&uuid_bytes)?;
        let head = self.get_message_by_uuid(head_uuid).await?;
        *self.head_cache.write() = Some(head.clone());
        Ok(head)
    }

    /// Fetch one tick by its uuid.
    pub async fn get_message_by_uuid(&self, uuid: Uuid) -> Result<TickerMessage> {
        let bytes = self.kv.get(&keys::primary_record_key(&uuid)).await?;
        Ok(TickerMessage::from_bytes(&bytes)?)
    }

    /// Fetch ticks for the given uuids, in the given order.
    pub async fn get_messages(&self, uuids: &[Uuid]) -> Result<Vec<TickerMessage>> {
        let mut messages = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            messages.push(self.get_message_by_uuid(*uuid).await?);
        }
        Ok(messages)
    }

    /// The ordered tick history from `start` to `end`, ascending and
    /// inclusive. A nil `start` walks back to the first tick.
    pub async fn get_history(&self, start: Uuid, end: Uuid) -> Result<Vec<TickerMessage>> {
        let mut uuids = walk_back(self.kv.as_ref(), start, end).await?;
        uuids.reverse();
        self.get_messages(&uuids).await
    }

    /// The index of the latest stored proof for a substream, from the
    /// cache or rebuilt by scanning the proof key prefix. `NotFound` if
    /// the substream has no proofs at all.
    pub async fn latest_proof_index(&self, id: &SubStreamId) -> Result<u64> {
        if let Some(idx) = self.proof_indexes.get(id) {
            return Ok(*idx);
        }
        let prefix = format!("{}:", keys::proof_identifier_prefix(id)?);
        let mut latest: Option<u64> = None;
        for key in self.kv.list(&prefix).await? {
            let idx: u64 = key
                .rsplit(':')
                .next()
                .unwrap_or_default()
                .parse()
                .map_err(|_| EntwineError::InvalidInput(format!("malformed proof key: {key}")))?;
            latest = Some(latest.map_or(idx, |m| m.max(idx)));
        }
        match latest {
            Some(idx) => {
                self.proof_indexes.insert(id.clone(), idx);
                Ok(idx)
            }
            None => Err(EntwineError::NotFound(format!(
                "no proofs stored for substream: {id}"
            ))),
        }
    }

    /// Key of the latest stored proof for a substream.
    pub async fn get_latest_proof_key(&self, id: &SubStreamId) -> Result<String> {
        let idx = self.latest_proof_index(id).await?;
        Ok(keys::proof_identifier(id, idx)?)
    }

    async fn get_proof_at(&self, id: &SubStreamId, idx: u64) -> Result<Proof> {
        let key = keys::proof_identifier(id, idx)?;
        let bytes = self.kv.get(&key).await?;
        Ok(Proof::from_bytes(&bytes)?)
    }

    /// The latest stored proof for a substream.
    pub async fn get_latest_proof(&self, id: &SubStreamId) -> Result<Proof> {
        let idx = self.latest_proof_index(id).await?;
        self.get_proof_at(id, idx).await
    }

    /// Proofs `start..=end` for a substream. `None` for `end` means up to
    /// the latest; an `end` past the latest is clamped.
    pub async fn get_proofs(
        &self,
        id: &SubStreamId,
        start: u64,
        end: Option<u64>,
    ) -> Result<Vec<Proof>> {
        let latest = self.latest_proof_index(id).await?;
        if start > latest {
            return Err(EntwineError::InvalidInput(format!(
                "proof start index {start} is greater than latest index {latest}"
            )));
        }
        let end = end.map_or(latest, |e| e.min(latest));
        if end < start {
            return Err(EntwineError::InvalidInput(format!(
                "proof end index {end} is less than start index {start}"
            )));
        }
        let mut proofs = Vec::with_capacity((end - start + 1) as usize);
        for idx in start..=end {
            proofs.push(self.get_proof_at(id, idx).await?);
        }
        Ok(proofs)
    }

    /// Binary-search the persisted proofs for the one covering the
    /// message at `stream_idx`. `NotFound` if no proof covers it.
    pub async fn get_proof_for_stream_index(
        &self,
        id: &SubStreamId,
        stream_idx: u64,
    ) -> Result<Proof> {
        let latest = match self.latest_proof_index(id).await {
            Ok(idx) => idx,
            Err(_) => {
                return Err(EntwineError::NotFound(format!(
                    "no proof covers index {stream_idx} for substream: {id}"
                )))
            }
        };
        let mut first: i64 = 0;
        let mut last = latest as i64;
        while first <= last {
            let mid = (first + last) / 2;
            let proof = self.get_proof_at(id, mid as u64).await?;
            // A genesis proof covers nothing; every real proof is after it.
            if proof.is_genesis() || stream_idx > proof.end_idx() {
                first = mid + 1;
            } else if stream_idx < proof.start_idx() {
                last = mid - 1;
            } else {
                return Ok(proof);
            }
        }
        Err(EntwineError::NotFound(format!(
            "no proof covers index {stream_idx} for substream: {id}"
        )))
    }

    /// Uuid of the last message covered by the latest proof, which is
    /// where the next proof must start. Nil while only the genesis proof
    /// exists.
    pub async fn get_proof_start_uuid(&self, id: &SubStreamId) -> Result<Uuid> {
        let proof = self.get_latest_proof(id).await?;
        Ok(proof.end_uuid().unwrap_or_else(Uuid::nil))
    }

    /// Store the genesis proof for a substream, pinned to the current
    /// ticker head. `InvalidInput` if the substream already has one.
    pub async fn create_genesis_proof(&self, id: &SubStreamId) -> Result<Proof> {
        let lock = self.proof_lock(id);
        let _guard = lock.lock().await;

        let head = self.head().await?;
        let proof = Proof::genesis(id.clone(), &head);
        let key = keys::proof_identifier(id, 0)?;
        match self.kv.atomic_put(&key, None, &proof.to_bytes()).await {
            Ok(()) => {}
            Err(StoreError::CasConflict(_)) => {
                return Err(EntwineError::InvalidInput(format!(
                    "genesis proof already exists for substream: {id}"
                )))
            }
            Err(e) => return Err(e.into()),
        }
        self.proof_indexes.insert(id.clone(), 0);
        debug!(substream = %id, ticker_uuid = %head.uuid(), "created genesis proof");
        Ok(proof)
    }

    /// Anchor a run of substream messages against the current ticker head.
    ///
    /// The run must form a valid chain, every signature must verify, and
    /// the resulting proof must be consistent with the substream's latest
    /// stored proof. Returns the head tick the proof was pinned to; its
    /// uuid is the anchor for subsequent appends.
    pub async fn anchor(
        &self,
        messages: &[StreamMessage],
        id: &SubStreamId,
        authenticator: &dyn Authenticator,
    ) -> Result<TickerMessage> {
        let head = self.head().await?;

        let proof = Proof::new(messages, id, &head)?;
        if !proof.validate() {
            return Err(EntwineError::InvalidInput(format!(
                "proof validation failed for substream: {id}"
            )));
        }
        for message in messages {
            if !message.verify_signature(authenticator)? {
                return Err(EntwineError::InvalidInput(format!(
                    "invalid signature on message: {}",
                    message.uuid()
                )));
            }
        }

        let lock = self.proof_lock(id);
        let _guard = lock.lock().await;

        let latest = self.latest_proof_index(id).await?;
        let prev = self.get_proof_at(id, latest).await?;
        if !proof.is_consistent(Some(&prev))? {
            return Err(EntwineError::InvalidInput(format!(
                "proposed proof is not consistent with previous proof for substream: {id}"
            )));
        }

        let key = keys::proof_identifier(id, latest + 1)?;
        self.kv.atomic_put(&key, None, &proof.to_bytes()).await?;
        self.proof_indexes.insert(id.clone(), latest + 1);
        debug!(
            substream = %id,
            proof_idx = latest + 1,
            ticker_uuid = %head.uuid(),
            "anchored substream"
        );
        Ok(head)
    }

    /// Whether `lhs` ticked strictly before `rhs`.
    pub fn happened_before(&self, lhs: &TickerMessage, rhs: &TickerMessage) -> bool {
        lhs.idx() < rhs.idx()
    }

    /// Whether `lhs` happened before `rhs` across substreams.
    ///
    /// Same-substream messages compare by index. Across substreams the
    /// anchor ticks are compared; unanchored messages are incomparable
    /// and an `InvalidInput` error.
    pub async fn stream_happened_before(
        &self,
        lhs: &StreamMessage,
        rhs: &StreamMessage,
    ) -> Result<bool> {
        if lhs.sub_stream_id() == rhs.sub_stream_id() {
            return Ok(lhs.idx() < rhs.idx());
        }
        if lhs.anchor_ticker_uuid().is_nil() || rhs.anchor_ticker_uuid().is_nil() {
            return Err(EntwineError::InvalidInput(
                "cannot order unanchored messages across substreams".to_string(),
            ));
        }
        let lhs_tick = self.get_message_by_uuid(lhs.anchor_ticker_uuid()).await?;
        let rhs_tick = self.get_message_by_uuid(rhs.anchor_ticker_uuid()).await?;
        Ok(self.happened_before(&lhs_tick, &rhs_tick))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entwine_core::{Ed25519Signer, Keypair, PayloadDescriptor, UncommittedMessage};
    use entwine_store::MemoryKvStore;

    fn signer() -> Ed25519Signer {
        Ed25519Signer::new(Keypair::from_seed(&[5u8; 32]))
    }

    fn ticker() -> KvTickerStore {
        KvTickerStore::new(Arc::new(MemoryKvStore::new()), DigestType::Sha256)
    }

    #[tokio::test]
    async fn test_append_and_head() {
        let store = ticker();
        let signer = signer();

        assert!(matches!(
            store.head().await,
            Err(EntwineError::NotFound(_))
        ));

        let t0 = store.append(&signer).await.unwrap();
        let t1 = store.append(&signer).await.unwrap();

        assert_eq!(t0.idx(), 0);
        assert!(t0.prev_uuid().is_nil());
        assert_eq!(t1.idx(), 1);
        assert_eq!(t1.prev_uuid(), t0.uuid());
        assert_eq!(store.head().await.unwrap(), t1);
    }

    #[tokio::test]
    async fn test_history_walks_to_first_tick() {
        let store = ticker();
        let signer = signer();
        let ticks: Vec<TickerMessage> = {
            let mut out = Vec::new();
            for _ in 0..4 {
                out.push(store.append(&signer).await.unwrap());
            }
            out
        };

        let full = store
            .get_history(Uuid::nil(), ticks[3].uuid())
            .await
            .unwrap();
        assert_eq!(full, ticks);

        let bounded = store
            .get_history(ticks[1].uuid(), ticks[2].uuid())
            .await
            .unwrap();
        assert_eq!(bounded, ticks[1..=2]);
    }

    #[tokio::test]
    async fn test_head_survives_cache_loss() {
        let store = ticker();
        let signer = signer();
        let t0 = store.append(&signer).await.unwrap();

        *store.head_cache.write() = None;
        assert_eq!(store.head().await.unwrap(), t0);
    }

    #[tokio::test]
    async fn test_genesis_proof_lifecycle() {
        let store = ticker();
        let signer = signer();
        store.append(&signer).await.unwrap();

        let id = SubStreamId::new("s1");
        assert!(matches!(
            store.latest_proof_index(&id).await,
            Err(EntwineError::NotFound(_))
        ));

        let proof = store.create_genesis_proof(&id).await.unwrap();
        assert!(proof.is_genesis());
        assert_eq!(store.latest_proof_index(&id).await.unwrap(), 0);
        assert!(store
            .get_proof_start_uuid(&id)
            .await
            .unwrap()
            .is_nil());

        assert!(matches!(
            store.create_genesis_proof(&id).await,
            Err(EntwineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_proof_index_rebuilt_from_scan() {
        let store = ticker();
        let signer = signer();
        store.append(&signer).await.unwrap();
        let id = SubStreamId::new("s1");
        store.create_genesis_proof(&id).await.unwrap();

        store.proof_indexes.clear();
        assert_eq!(store.latest_proof_index(&id).await.unwrap(), 0);
    }

    async fn anchored_run(
        store: &KvTickerStore,
        id: &SubStreamId,
        n: usize,
    ) -> (Vec<StreamMessage>, Arc<Ed25519Signer>) {
        let msg_signer: Arc<Ed25519Signer> =
            Arc::new(Ed25519Signer::new(Keypair::from_seed(&[6u8; 32])));
        let anchor = store.head().await.unwrap().uuid();
        let mut messages = vec![StreamMessage::genesis(
            id.clone(),
            DigestType::Sha256,
            anchor,
            msg_signer.as_ref(),
        )
        .unwrap()];
        for i in 1..n {
            let uncommitted = UncommittedMessage {
                name: format!("m{i}"),
                tags: vec![],
                payload: PayloadDescriptor::none(),
                signer: msg_signer.clone(),
            };
            let mut reader = std::io::Cursor::new(Vec::new());
            let prev = messages.last().unwrap();
            messages
                .push(StreamMessage::chained(&uncommitted, &mut reader, prev, anchor).unwrap());
        }
        (messages, msg_signer)
    }

    #[tokio::test]
    async fn test_anchor_flow() {
        let store = ticker();
        let tick_signer = signer();
        store.append(&tick_signer).await.unwrap();

        let id = SubStreamId::new("s1");
        store.create_genesis_proof(&id).await.unwrap();

        let (messages, msg_signer) = anchored_run(&store, &id, 3).await;
        let auth = msg_signer.authenticator();

        let head = store.anchor(&messages, &id, &auth).await.unwrap();
        assert_eq!(head, store.head().await.unwrap());
        assert_eq!(store.latest_proof_index(&id).await.unwrap(), 1);
        assert_eq!(
            store.get_proof_start_uuid(&id).await.unwrap(),
            messages[2].uuid()
        );

        // The stored proof covers stream indexes 0..=2.
        let proof = store.get_proof_for_stream_index(&id, 1).await.unwrap();
        assert_eq!(proof.start_idx(), 0);
        assert_eq!(proof.end_idx(), 2);
        assert!(matches!(
            store.get_proof_for_stream_index(&id, 9).await,
            Err(EntwineError::NotFound(_))
        ));

        let proofs = store.get_proofs(&id, 0, None).await.unwrap();
        assert_eq!(proofs.len(), 2);
        assert!(proofs[0].is_genesis());
    }

    #[tokio::test]
    async fn test_anchor_without_genesis_proof_is_not_found() {
        let store = ticker();
        let tick_signer = signer();
        store.append(&tick_signer).await.unwrap();

        let id = SubStreamId::new("s1");
        let (messages, msg_signer) = anchored_run(&store, &id, 2).await;
        assert!(matches!(
            store
                .anchor(&messages, &id, &msg_signer.authenticator())
                .await,
            Err(EntwineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_anchor_inconsistent_run_rejected() {
        let store = ticker();
        let tick_signer = signer();
        store.append(&tick_signer).await.unwrap();

        let id = SubStreamId::new("s1");
        store.create_genesis_proof(&id).await.unwrap();

        let (messages, msg_signer) = anchored_run(&store, &id, 5).await;
        let auth = msg_signer.authenticator();
        store.anchor(&messages[0..3], &id, &auth).await.unwrap();

        // Next run must start at the previous proof's end message.
        assert!(matches!(
            store.anchor(&messages[3..5], &id, &auth).await,
            Err(EntwineError::InvalidInput(_))
        ));
        store.anchor(&messages[2..5], &id, &auth).await.unwrap();
        assert_eq!(store.latest_proof_index(&id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_anchor_wrong_key_rejected() {
        let store = ticker();
        let tick_signer = signer();
        store.append(&tick_signer).await.unwrap();

        let id = SubStreamId::new("s1");
        store.create_genesis_proof(&id).await.unwrap();

        let (messages, _) = anchored_run(&store, &id, 2).await;
        let stranger = Ed25519Signer::new(Keypair::generate());
        assert!(matches!(
            store
                .anchor(&messages, &id, &stranger.authenticator())
                .await,
            Err(EntwineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_get_proofs_bounds() {
        let store = ticker();
        let tick_signer = signer();
        store.append(&tick_signer).await.unwrap();

        let id = SubStreamId::new("s1");
        store.create_genesis_proof(&id).await.unwrap();
        let (messages, msg_signer) = anchored_run(&store, &id, 2).await;
        store
            .anchor(&messages, &id, &msg_signer.authenticator())
            .await
            .unwrap();

        assert!(matches!(
            store.get_proofs(&id, 5, None).await,
            Err(EntwineError::InvalidInput(_))
        ));
        // End past the latest index is clamped.
        assert_eq!(store.get_proofs(&id, 1, Some(99)).await.unwrap().len(), 1);
        // End below start is an error, not an empty or wrapped range.
        assert!(matches!(
            store.get_proofs(&id, 1, Some(0)).await,
            Err(EntwineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_happened_before_same_substream() {
        let store = ticker();
        let tick_signer = signer();
        store.append(&tick_signer).await.unwrap();

        let id = SubStreamId::new("s1");
        let (messages, _) = anchored_run(&store, &id, 2).await;
        assert!(store
            .stream_happened_before(&messages[0], &messages[1])
            .await
            .unwrap());
        assert!(!store
            .stream_happened_before(&messages[1], &messages[0])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_stream_happened_before_unanchored_rejected() {
        let store = ticker();
        let tick_signer = signer();
        store.append(&tick_signer).await.unwrap();

        let msg_signer = Ed25519Signer::new(Keypair::generate());
        let a = StreamMessage::genesis(
            SubStreamId::new("a"),
            DigestType::Sha256,
            Uuid::nil(),
            &msg_signer,
        )
        .unwrap();
        let b = StreamMessage::genesis(
            SubStreamId::new("b"),
            DigestType::Sha256,
            Uuid::nil(),
            &msg_signer,
        )
        .unwrap();
        assert!(matches!(
            store.stream_happened_before(&a, &b).await,
            Err(EntwineError::InvalidInput(_))
        ));
    }
}
