//! Substream store: append-only, hash-chained substreams over a KV store.
//!
//! Every append writes one primary record plus the derived index records
//! (name, tags, prev pointer, anchor pointer), bracketed by a write-ahead
//! intent record, and finishes with a compare-and-swap on the substream
//! head. The CAS is the linearization point: a crash before it leaves the
//! head untouched and the intent record behind.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use entwine_core::keys;
use entwine_core::{DigestType, Signer, StreamMessage, SubStreamId, UncommittedMessage};
use entwine_store::{KvStore, PayloadSource, StoreError};

use crate::error::{EntwineError, Result};

/// Walk prev pointers from `end` back towards `start`, newest first.
///
/// A nil `start` walks to the genesis message. A supplied `start` that is
/// never reached is `NotFound`: the walk refuses to silently return a
/// partial history.
pub(crate) async fn walk_back(kv: &dyn KvStore, start: Uuid, end: Uuid) -> Result<Vec<Uuid>> {
    let mut uuids = Vec::new();
    let mut curr = end;
    loop {
        if curr.is_nil() {
            if start.is_nil() {
                break;
            }
            return Err(EntwineError::NotFound(format!(
                "history start {start} was never reached"
            )));
        }
        kv.head(&keys::primary_record_key(&curr)).await?;
        uuids.push(curr);
        if curr == start {
            break;
        }
        match kv.get(&keys::previous_node_key(&curr)).await {
            Ok(prev_bytes) => {
                curr = keys::bytes_to_uuid(&prev_bytes)?;
            }
            Err(StoreError::NotFound(_)) => {
                if start.is_nil() {
                    break;
                }
                return Err(EntwineError::NotFound(format!(
                    "history start {start} was never reached"
                )));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(uuids)
}

/// Store for hash-chained substreams backed by a [`KvStore`].
///
/// The digest type is fixed at construction and applies to every
/// substream the store touches. Appends to one substream are serialized
/// by a per-substream mutex; appends to different substreams run in
/// parallel. Reads take no locks.
pub struct KvStreamStore {
    kv: Arc<dyn KvStore>,
    payloads: Arc<dyn PayloadSource>,
    digest_type: DigestType,
    heads: DashMap<SubStreamId, StreamMessage>,
    append_locks: DashMap<SubStreamId, Arc<Mutex<()>>>,
}

impl KvStreamStore {
    pub fn new(
        kv: Arc<dyn KvStore>,
        payloads: Arc<dyn PayloadSource>,
        digest_type: DigestType,
    ) -> Self {
        Self {
            kv,
            payloads,
            digest_type,
            heads: DashMap::new(),
            append_locks: DashMap::new(),
        }
    }

    pub fn digest_type(&self) -> DigestType {
        self.digest_type
    }

    fn append_lock(&self, id: &SubStreamId) -> Arc<Mutex<()>> {
        self.append_locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Create a new substream by writing its genesis message.
    ///
    /// Fails with `InvalidInput` if the substream already exists: silently
    /// re-creating it would orphan the existing chain.
    pub async fn create(
        &self,
        id: &SubStreamId,
        signer: &dyn Signer,
        anchor_ticker_uuid: Uuid,
    ) -> Result<StreamMessage> {
        let lock = self.append_lock(id);
        let _guard = lock.lock().await;

        let head_key = keys::sub_stream_head_key(id)?;
        match self.kv.head(&head_key).await {
            Ok(()) => {
                return Err(EntwineError::InvalidInput(format!(
                    "substream already exists: {id}"
                )))
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let genesis =
            StreamMessage::genesis(id.clone(), self.digest_type, anchor_ticker_uuid, signer)?;
        self.persist(&genesis).await?;
        self.heads.insert(id.clone(), genesis.clone());
        debug!(substream = %id, uuid = %genesis.uuid(), "created substream");
        Ok(genesis)
    }

    /// Append an uncommitted message to a substream, anchored at
    /// `anchor_ticker_uuid`. Returns the uuid of the committed message.
    pub async fn append(
        &self,
        message: &UncommittedMessage,
        id: &SubStreamId,
        anchor_ticker_uuid: Uuid,
    ) -> Result<Uuid> {
        // Key-unsafe names and tags must fail before any record is
        // written, or a partial append would leave dangling index entries.
        keys::name_key_prefix(&message.name)?;
        for tag in &message.tags {
            keys::tag_key_prefix(tag)?;
        }

        let lock = self.append_lock(id);
        let _guard = lock.lock().await;

        let head = self.load_head(id).await?;
        let mut reader = self.payloads.open(&message.payload)?;
        let committed =
            StreamMessage::chained(message, reader.as_mut(), &head, anchor_ticker_uuid)?;

        self.persist(&committed).await?;
        self.heads.insert(id.clone(), committed.clone());
        debug!(
            substream = %id,
            uuid = %committed.uuid(),
            idx = committed.idx(),
            name = %committed.name(),
            "appended message"
        );
        Ok(committed.uuid())
    }

    /// The latest message appended to a substream.
    pub async fn head(&self, id: &SubStreamId) -> Result<StreamMessage> {
        self.load_head(id).await
    }

    async fn load_head(&self, id: &SubStreamId) -> Result<StreamMessage> {
        if let Some(head) = self.heads.get(id) {
            return Ok(head.clone());
        }
        let head_key = keys::sub_stream_head_key(id)?;
        let uuid_bytes = self.kv.get(&head_key).await?;
        let head_uuid = keys::bytes_to_uuid(&uuid_bytes)?;
        let head = self.get_message_by_uuid(head_uuid).await?;
        self.heads.insert(id.clone(), head.clone());
        Ok(head)
    }

    /// Fetch one message by its uuid.
    pub async fn get_message_by_uuid(&self, uuid: Uuid) -> Result<StreamMessage> {
        let bytes = self.kv.get(&keys::primary_record_key(&uuid)).await?;
        Ok(StreamMessage::from_bytes(&bytes)?)
    }

    /// Fetch messages for the given uuids, in the given order.
    pub async fn get_messages(&self, uuids: &[Uuid]) -> Result<Vec<StreamMessage>> {
        let mut messages = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            messages.push(self.get_message_by_uuid(*uuid).await?);
        }
        Ok(messages)
    }

    /// All messages appended under a given name. `NotFound` if none.
    pub async fn get_messages_by_name(&self, name: &str) -> Result<Vec<StreamMessage>> {
        let prefix = keys::name_key_prefix(name)?;
        let entry_keys = self.kv.list(&prefix).await?;
        if entry_keys.is_empty() {
            return Err(EntwineError::NotFound(format!("no messages named: {name}")));
        }
        let mut uuids = Vec::with_capacity(entry_keys.len());
        for key in &entry_keys {
            uuids.push(keys::uuid_from_name_key(key)?);
        }
        self.get_messages(&uuids).await
    }

    /// All messages carrying any of the given tags (union, deduplicated).
    /// `NotFound` if no tag matches anything.
    pub async fn get_messages_by_tags(&self, tags: &[String]) -> Result<Vec<StreamMessage>> {
        let mut uuids = Vec::new();
        let mut seen = HashSet::new();
        for tag in tags {
            let prefix = keys::tag_key_prefix(tag)?;
            for key in self.kv.list(&prefix).await? {
                let uuid = keys::uuid_from_tag_key(&key)?;
                if seen.insert(uuid) {
                    uuids.push(uuid);
                }
            }
        }
        if uuids.is_empty() {
            return Err(EntwineError::NotFound(format!(
                "no messages tagged: {tags:?}"
            )));
        }
        self.get_messages(&uuids).await
    }

    /// The ordered history from `start` to `end`, ascending and inclusive.
    /// A nil `start` walks back to the genesis message.
    pub async fn get_history(&self, start: Uuid, end: Uuid) -> Result<Vec<StreamMessage>> {
        let mut uuids = walk_back(self.kv.as_ref(), start, end).await?;
        uuids.reverse();
        self.get_messages(&uuids).await
    }

    /// The anchor ticker uuid recorded for a message.
    pub async fn get_anchor_uuid(&self, uuid: Uuid) -> Result<Uuid> {
        let bytes = self.kv.get(&keys::anchor_node_key(&uuid)).await?;
        Ok(keys::bytes_to_uuid(&bytes)?)
    }

    /// Walk back from `uuid` until the anchor changes, returning the run
    /// ascending. The first message with a different anchor is included:
    /// it is the overlap element the next proof chains from.
    pub async fn get_history_to_last_anchor(&self, uuid: Uuid) -> Result<Vec<StreamMessage>> {
        let mut uuids = Vec::new();
        let mut curr = uuid;
        let mut curr_anchor = self.get_anchor_uuid(curr).await?;
        uuids.push(curr);
        loop {
            self.kv.head(&keys::primary_record_key(&curr)).await?;
            let prev = match self.kv.get(&keys::previous_node_key(&curr)).await {
                Ok(bytes) => keys::bytes_to_uuid(&bytes)?,
                Err(StoreError::NotFound(_)) => break,
                Err(e) => return Err(e.into()),
            };
            if prev.is_nil() {
                break;
            }
            let prev_anchor = self.get_anchor_uuid(prev).await?;
            uuids.push(prev);
            if prev_anchor != curr_anchor {
                break;
            }
            curr = prev;
            curr_anchor = prev_anchor;
        }
        uuids.reverse();
        self.get_messages(&uuids).await
    }

    /// Write all records for one committed message.
    ///
    /// Order matters: the intent record goes first and is cleared last,
    /// and the head CAS commits the append.
    async fn persist(&self, message: &StreamMessage) -> Result<()> {
        let uuid = message.uuid();
        let intent = keys::intent_key(&uuid);
        self.kv.put(&intent, &message.to_bytes()).await?;

        for tag in message.tags() {
            let prefix = keys::tag_key_prefix(tag)?;
            self.kv.put(&keys::tag_entry(&prefix, &uuid), &[]).await?;
        }

        let name_prefix = keys::name_key_prefix(message.name())?;
        self.kv
            .put(&keys::name_entry(&name_prefix, &uuid), &[])
            .await?;

        self.kv
            .put(
                &keys::previous_node_key(&uuid),
                &keys::uuid_to_bytes(&message.prev_uuid()),
            )
            .await?;

        self.kv
            .put(
                &keys::anchor_node_key(&uuid),
                &keys::uuid_to_bytes(&message.anchor_ticker_uuid()),
            )
            .await?;

        self.kv
            .put(&keys::primary_record_key(&uuid), &message.to_bytes())
            .await?;

        let head_key = keys::sub_stream_head_key(message.sub_stream_id())?;
        let prev_head = if message.is_genesis() {
            None
        } else {
            Some(keys::uuid_to_bytes(&message.prev_uuid()))
        };
        if let Err(e) = self
            .kv
            .atomic_put(&head_key, prev_head.as_ref().map(|b| b.as_slice()), &keys::uuid_to_bytes(&uuid))
            .await
        {
            warn!(
                substream = %message.sub_stream_id(),
                uuid = %uuid,
                "head update lost, intent record left for inspection"
            );
            return Err(e.into());
        }

        self.kv.delete(&intent).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entwine_core::{Ed25519Signer, Keypair, PayloadDescriptor};
    use entwine_store::{MemoryKvStore, MemoryPayloadStore};

    struct Setup {
        store: KvStreamStore,
        payloads: Arc<MemoryPayloadStore>,
        signer: Arc<Ed25519Signer>,
    }

    fn setup() -> Setup {
        let payloads = Arc::new(MemoryPayloadStore::new());
        let store = KvStreamStore::new(
            Arc::new(MemoryKvStore::new()),
            payloads.clone(),
            DigestType::Sha256,
        );
        let signer = Arc::new(Ed25519Signer::new(Keypair::from_seed(&[1u8; 32])));
        Setup {
            store,
            payloads,
            signer,
        }
    }

    fn uncommitted(s: &Setup, name: &str, tags: &[&str], payload: &[u8]) -> UncommittedMessage {
        let descriptor = s.payloads.put(name, payload.to_vec());
        UncommittedMessage {
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            payload: descriptor,
            signer: s.signer.clone(),
        }
    }

    #[tokio::test]
    async fn test_create_then_append_indexes() {
        let s = setup();
        let id = SubStreamId::new("s1");
        let genesis = s.store.create(&id, s.signer.as_ref(), Uuid::nil()).await.unwrap();
        assert!(genesis.is_genesis());

        let m1 = uncommitted(&s, "m1", &["red", "blue"], b"one");
        let u1 = s.store.append(&m1, &id, Uuid::nil()).await.unwrap();
        let m2 = uncommitted(&s, "m2", &["blue"], b"two");
        let u2 = s.store.append(&m2, &id, Uuid::nil()).await.unwrap();

        let head = s.store.head(&id).await.unwrap();
        assert_eq!(head.uuid(), u2);
        assert_eq!(head.idx(), 2);
        assert_eq!(head.prev_uuid(), u1);

        let by_name = s.store.get_messages_by_name("m1").await.unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].uuid(), u1);

        let blue = s
            .store
            .get_messages_by_tags(&["blue".to_string()])
            .await
            .unwrap();
        assert_eq!(blue.len(), 2);

        // Union over both tags still yields each message once.
        let both = s
            .store
            .get_messages_by_tags(&["red".to_string(), "blue".to_string()])
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
    }

    #[tokio::test]
    async fn test_create_twice_rejected() {
        let s = setup();
        let id = SubStreamId::new("s1");
        s.store.create(&id, s.signer.as_ref(), Uuid::nil()).await.unwrap();
        assert!(matches!(
            s.store.create(&id, s.signer.as_ref(), Uuid::nil()).await,
            Err(EntwineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_append_to_missing_substream_is_not_found() {
        let s = setup();
        let id = SubStreamId::new("nope");
        let m = uncommitted(&s, "m1", &[], b"x");
        assert!(matches!(
            s.store.append(&m, &id, Uuid::nil()).await,
            Err(EntwineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reserved_name_rejected() {
        let s = setup();
        let id = SubStreamId::new("s1");
        s.store.create(&id, s.signer.as_ref(), Uuid::nil()).await.unwrap();
        let m = uncommitted(&s, "genesis", &[], b"x");
        assert!(matches!(
            s.store.append(&m, &id, Uuid::nil()).await,
            Err(EntwineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_colon_in_name_or_tag_rejected_before_any_write() {
        let s = setup();
        let id = SubStreamId::new("s1");
        s.store.create(&id, s.signer.as_ref(), Uuid::nil()).await.unwrap();

        let bad_tag = uncommitted(&s, "m1", &["ok", "ba:d"], b"x");
        assert!(matches!(
            s.store.append(&bad_tag, &id, Uuid::nil()).await,
            Err(EntwineError::InvalidInput(_))
        ));
        let bad_name = uncommitted(&s, "na:me", &[], b"y");
        assert!(matches!(
            s.store.append(&bad_name, &id, Uuid::nil()).await,
            Err(EntwineError::InvalidInput(_))
        ));

        // The rejected appends wrote nothing: a later append under the
        // same tag is the only match, and no intent record lingers.
        let good = uncommitted(&s, "m2", &["ok"], b"z");
        let u = s.store.append(&good, &id, Uuid::nil()).await.unwrap();
        let tagged = s
            .store
            .get_messages_by_tags(&["ok".to_string()])
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].uuid(), u);
        assert_eq!(s.store.head(&id).await.unwrap().idx(), 1);
    }

    #[tokio::test]
    async fn test_history_full_and_bounded() {
        let s = setup();
        let id = SubStreamId::new("s1");
        let genesis = s.store.create(&id, s.signer.as_ref(), Uuid::nil()).await.unwrap();
        let mut uuids = vec![genesis.uuid()];
        for i in 1..=3 {
            let m = uncommitted(&s, &format!("m{i}"), &[], b"p");
            uuids.push(s.store.append(&m, &id, Uuid::nil()).await.unwrap());
        }

        // Nil start walks to genesis, ascending.
        let full = s.store.get_history(Uuid::nil(), uuids[3]).await.unwrap();
        assert_eq!(
            full.iter().map(|m| m.uuid()).collect::<Vec<_>>(),
            uuids
        );
        assert_eq!(full[0].idx(), 0);
        assert_eq!(full[3].idx(), 3);

        // Bounded walk is inclusive on both ends.
        let bounded = s.store.get_history(uuids[1], uuids[2]).await.unwrap();
        assert_eq!(
            bounded.iter().map(|m| m.uuid()).collect::<Vec<_>>(),
            &uuids[1..=2]
        );
    }

    #[tokio::test]
    async fn test_history_unreached_start_is_not_found() {
        let s = setup();
        let id = SubStreamId::new("s1");
        s.store.create(&id, s.signer.as_ref(), Uuid::nil()).await.unwrap();
        let m = uncommitted(&s, "m1", &[], b"p");
        let u1 = s.store.append(&m, &id, Uuid::nil()).await.unwrap();

        // A start uuid that is not on the chain is an error, not a
        // silently truncated history.
        assert!(matches!(
            s.store.get_history(Uuid::new_v4(), u1).await,
            Err(EntwineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_history_to_last_anchor_includes_overlap() {
        let s = setup();
        let id = SubStreamId::new("s1");
        let anchor_a = Uuid::new_v4();
        let anchor_b = Uuid::new_v4();

        s.store.create(&id, s.signer.as_ref(), anchor_a).await.unwrap();
        let m1 = uncommitted(&s, "m1", &[], b"1");
        let u1 = s.store.append(&m1, &id, anchor_a).await.unwrap();
        let m2 = uncommitted(&s, "m2", &[], b"2");
        let u2 = s.store.append(&m2, &id, anchor_b).await.unwrap();
        let m3 = uncommitted(&s, "m3", &[], b"3");
        let u3 = s.store.append(&m3, &id, anchor_b).await.unwrap();

        // From u3 back: m3 and m2 share anchor_b; m1 differs and is the
        // included overlap element. Ascending order.
        let run = s.store.get_history_to_last_anchor(u3).await.unwrap();
        assert_eq!(
            run.iter().map(|m| m.uuid()).collect::<Vec<_>>(),
            vec![u1, u2, u3]
        );
    }

    #[tokio::test]
    async fn test_head_survives_cache_loss() {
        let s = setup();
        let id = SubStreamId::new("s1");
        s.store.create(&id, s.signer.as_ref(), Uuid::nil()).await.unwrap();
        let m = uncommitted(&s, "m1", &[], b"p");
        let u1 = s.store.append(&m, &id, Uuid::nil()).await.unwrap();

        // A store reconstructed over the same KV sees the same head.
        s.store.heads.clear();
        assert_eq!(s.store.head(&id).await.unwrap().uuid(), u1);
    }

    #[tokio::test]
    async fn test_intent_cleared_after_append() {
        let s = setup();
        let id = SubStreamId::new("s1");
        s.store.create(&id, s.signer.as_ref(), Uuid::nil()).await.unwrap();
        let m = uncommitted(&s, "m1", &[], b"p");
        let u1 = s.store.append(&m, &id, Uuid::nil()).await.unwrap();

        assert!(matches!(
            s.store.kv.get(&keys::intent_key(&u1)).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
