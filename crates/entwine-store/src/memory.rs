//! In-memory implementations of the storage traits.
//!
//! Same semantics as the SQLite backend but held in process memory.
//! Primarily for tests and fixtures.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};

use entwine_core::PayloadDescriptor;

use crate::error::{Result, StoreError};
use crate::traits::{KvStore, PayloadSource};

/// In-memory KV store over a sorted map.
///
/// The BTreeMap gives `list` its ordering for free.
#[derive(Default)]
pub struct MemoryKvStore {
    inner: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.inner
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn head(&self, key: &str) -> Result<()> {
        if self.inner.read().contains_key(key) {
            Ok(())
        } else {
            Err(StoreError::NotFound(key.to_string()))
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn atomic_put(&self, key: &str, prev: Option<&[u8]>, value: &[u8]) -> Result<()> {
        let mut inner = self.inner.write();
        let current = inner.get(key).map(|v| v.as_slice());
        if current != prev {
            return Err(StoreError::CasConflict(key.to_string()));
        }
        inner.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.read();
        Ok(inner
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// In-memory payload object store.
///
/// Staged payloads are addressed by key and handed back as cursors.
#[derive(Default)]
pub struct MemoryPayloadStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

/// Backend tag written into descriptors produced by [`MemoryPayloadStore`].
pub const MEMORY_PAYLOAD_BACKEND: &str = "memory";

impl MemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage payload bytes and return the descriptor that resolves them.
    pub fn put(&self, key: &str, bytes: impl Into<Bytes>) -> PayloadDescriptor {
        self.objects.write().insert(key.to_string(), bytes.into());
        PayloadDescriptor::new(MEMORY_PAYLOAD_BACKEND, key)
    }
}

impl PayloadSource for MemoryPayloadStore {
    fn open(&self, descriptor: &PayloadDescriptor) -> Result<Box<dyn Read + Send>> {
        // The empty descriptor resolves to an empty payload (genesis).
        if descriptor.is_none() {
            return Ok(Box::new(Cursor::new(Bytes::new())));
        }
        if descriptor.backend != MEMORY_PAYLOAD_BACKEND {
            return Err(StoreError::InvalidData(format!(
                "unknown payload backend: {}",
                descriptor.backend
            )));
        }
        let bytes = self
            .objects
            .read()
            .get(&descriptor.key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(descriptor.key.clone()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryKvStore::new();
        store.put("a", b"1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), b"1");
        store.head("a").await.unwrap();

        store.delete("a").await.unwrap();
        assert!(matches!(store.get("a").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.delete("a").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_atomic_put_semantics() {
        let store = MemoryKvStore::new();

        // None means "must not exist".
        store.atomic_put("k", None, b"v1").await.unwrap();
        assert!(matches!(
            store.atomic_put("k", None, b"v2").await,
            Err(StoreError::CasConflict(_))
        ));

        // Some means "must match the stored value".
        store.atomic_put("k", Some(b"v1"), b"v2").await.unwrap();
        assert!(matches!(
            store.atomic_put("k", Some(b"v1"), b"v3").await,
            Err(StoreError::CasConflict(_))
        ));
        assert_eq!(store.get("k").await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_prefix_bounded() {
        let store = MemoryKvStore::new();
        store.put("a:2", b"").await.unwrap();
        store.put("a:1", b"").await.unwrap();
        store.put("b:1", b"").await.unwrap();

        assert_eq!(store.list("a:").await.unwrap(), vec!["a:1", "a:2"]);
        assert!(store.list("c:").await.unwrap().is_empty());
    }

    #[test]
    fn test_payload_store_roundtrip() {
        let payloads = MemoryPayloadStore::new();
        let descriptor = payloads.put("obj1", &b"payload bytes"[..]);

        let mut reader = payloads.open(&descriptor).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"payload bytes");
    }

    #[test]
    fn test_empty_descriptor_is_empty_payload() {
        let payloads = MemoryPayloadStore::new();
        let mut reader = payloads.open(&PayloadDescriptor::none()).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let payloads = MemoryPayloadStore::new();
        let descriptor = PayloadDescriptor::new("s3", "bucket/key");
        assert!(matches!(
            payloads.open(&descriptor),
            Err(StoreError::InvalidData(_))
        ));
    }
}
