//! Thin per-substream handle over a shared [`KvStreamStore`].

use std::sync::Arc;
use uuid::Uuid;

use entwine_core::{StreamMessage, SubStreamId, UncommittedMessage};

use crate::error::Result;
use crate::stream::KvStreamStore;

/// A handle binding one substream id to a stream store, so callers that
/// only ever touch one substream don't thread the id through every call.
#[derive(Clone)]
pub struct SubStreamAppender {
    store: Arc<KvStreamStore>,
    id: SubStreamId,
}

impl SubStreamAppender {
    pub fn new(store: Arc<KvStreamStore>, id: SubStreamId) -> Self {
        Self { store, id }
    }

    pub fn id(&self) -> &SubStreamId {
        &self.id
    }

    /// The latest message appended to this substream.
    pub async fn head(&self) -> Result<StreamMessage> {
        self.store.head(&self.id).await
    }

    /// Append an uncommitted message, anchored at `anchor_ticker_uuid`.
    pub async fn append(
        &self,
        message: &UncommittedMessage,
        anchor_ticker_uuid: Uuid,
    ) -> Result<Uuid> {
        self.store.append(message, &self.id, anchor_ticker_uuid).await
    }

    /// The ordered history from `start` to `end`, ascending.
    pub async fn get_history(&self, start: Uuid, end: Uuid) -> Result<Vec<StreamMessage>> {
        self.store.get_history(start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entwine_core::{DigestType, Ed25519Signer, Keypair};
    use entwine_store::{MemoryKvStore, MemoryPayloadStore};

    #[tokio::test]
    async fn test_appender_tracks_one_substream() {
        let payloads = Arc::new(MemoryPayloadStore::new());
        let store = Arc::new(KvStreamStore::new(
            Arc::new(MemoryKvStore::new()),
            payloads.clone(),
            DigestType::Sha256,
        ));
        let signer: Arc<Ed25519Signer> =
            Arc::new(Ed25519Signer::new(Keypair::from_seed(&[2u8; 32])));

        let id = SubStreamId::allocate();
        store.create(&id, signer.as_ref(), Uuid::nil()).await.unwrap();

        let appender = SubStreamAppender::new(store, id.clone());
        let descriptor = payloads.put("obj", &b"payload"[..]);
        let message = UncommittedMessage {
            name: "m1".to_string(),
            tags: vec![],
            payload: descriptor,
            signer,
        };
        let uuid = appender.append(&message, Uuid::nil()).await.unwrap();

        let head = appender.head().await.unwrap();
        assert_eq!(head.uuid(), uuid);
        assert_eq!(head.sub_stream_id(), &id);

        let history = appender.get_history(Uuid::nil(), uuid).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].is_genesis());
    }

}
