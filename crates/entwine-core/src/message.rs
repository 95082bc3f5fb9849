//! Immutable chained messages.
//!
//! Two message kinds share one chaining rule: `digest = H(prev_digest ‖
//! signature)`, genesis `digest = H(signature)`. They are deliberately
//! separate types so a ticker message can never be spliced into a
//! substream chain or vice versa; only the free [`chain_digest`] function
//! is shared.
//!
//! ## Key Types
//! - [`StreamMessage`] — one entry in a substream chain, carrying a name,
//!   tags, an opaque payload descriptor and its digest, and the ticker
//!   anchor observed at append time.
//! - [`TickerMessage`] — one tick of the global chain; no payload.
//! - [`UncommittedMessage`] — caller-supplied fields of a stream append
//!   before the store chains and signs it.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::crypto::{Authenticator, ChainHasher, DigestType, SignatureEnvelope, Signer};
use crate::error::{CoreError, Result};
use crate::keys::SubStreamId;
use crate::wire::{Reader, Writer};

/// Reserved name of the first message in every substream.
pub const GENESIS_NAME: &str = "genesis";

/// Payload bytes are streamed through the digest in chunks of this size.
const PAYLOAD_CHUNK: usize = 8192;

/// Compute the chain digest from an optional previous digest and the
/// serialized signature of the message being chained.
pub fn chain_digest(
    digest_type: DigestType,
    prev_digest: Option<&[u8]>,
    signature: &[u8],
) -> Vec<u8> {
    let mut hasher = ChainHasher::new(digest_type);
    if let Some(prev) = prev_digest {
        hasher.update(prev);
    }
    hasher.update(signature);
    hasher.finalize()
}

/// Stream `reader` through a digest in 8KB chunks until EOF.
fn digest_reader(digest_type: DigestType, reader: &mut dyn Read) -> Result<Vec<u8>> {
    let mut hasher = ChainHasher::new(digest_type);
    let mut chunk = [0u8; PAYLOAD_CHUNK];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(hasher.finalize())
}

fn now_millis() -> i64 {
    // A clock before the epoch collapses to 0 rather than failing the append.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

/// Opaque locator for payload bytes held in an external object store.
///
/// The chain only ever sees the descriptor and the payload digest; the
/// bytes themselves live wherever the descriptor points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDescriptor {
    pub backend: String,
    pub key: String,
}

impl PayloadDescriptor {
    pub fn new(backend: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            key: key.into(),
        }
    }

    /// Descriptor of the empty payload, used by genesis messages.
    pub fn none() -> Self {
        Self {
            backend: String::new(),
            key: String::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.backend.is_empty() && self.key.is_empty()
    }
}

/// Caller-supplied fields of an append, before the store assigns the
/// chain position and signs.
#[derive(Clone)]
pub struct UncommittedMessage {
    pub name: String,
    pub tags: Vec<String>,
    pub payload: PayloadDescriptor,
    pub signer: Arc<dyn Signer>,
}

/// One immutable entry of a substream chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    signature: Vec<u8>,
    digest: Vec<u8>,
    digest_type: DigestType,
    uuid: Uuid,
    prev_uuid: Uuid,
    idx: u64,
    ts: i64,
    name: String,
    tags: Vec<String>,
    payload: PayloadDescriptor,
    payload_digest: Vec<u8>,
    sub_stream_id: SubStreamId,
    anchor_ticker_uuid: Uuid,
}

impl StreamMessage {
    /// Build the genesis message of a substream: idx 0, nil prev pointer,
    /// the reserved name, and an empty payload digest.
    pub fn genesis(
        sub_stream_id: SubStreamId,
        digest_type: DigestType,
        anchor_ticker_uuid: Uuid,
        signer: &dyn Signer,
    ) -> Result<Self> {
        let mut msg = Self {
            signature: Vec::new(),
            digest: Vec::new(),
            digest_type,
            uuid: Uuid::new_v4(),
            prev_uuid: Uuid::nil(),
            idx: 0,
            ts: now_millis(),
            name: GENESIS_NAME.to_string(),
            tags: Vec::new(),
            payload: PayloadDescriptor::none(),
            payload_digest: Vec::new(),
            sub_stream_id,
            anchor_ticker_uuid,
        };
        msg.signature = signer.sign(&msg.signature_payload())?.to_bytes();
        msg.digest = chain_digest(digest_type, None, &msg.signature);
        Ok(msg)
    }

    /// Chain a new message onto `prev`, hashing the payload from `reader`.
    pub fn chained(
        uncommitted: &UncommittedMessage,
        reader: &mut dyn Read,
        prev: &StreamMessage,
        anchor_ticker_uuid: Uuid,
    ) -> Result<Self> {
        if uncommitted.name == GENESIS_NAME {
            return Err(CoreError::InvalidInput(format!(
                "message name {GENESIS_NAME:?} is reserved"
            )));
        }
        let digest_type = prev.digest_type;
        let payload_digest = digest_reader(digest_type, reader)?;
        let mut msg = Self {
            signature: Vec::new(),
            digest: Vec::new(),
            digest_type,
            uuid: Uuid::new_v4(),
            prev_uuid: prev.uuid,
            idx: prev.idx + 1,
            ts: now_millis(),
            name: uncommitted.name.clone(),
            tags: uncommitted.tags.clone(),
            payload: uncommitted.payload.clone(),
            payload_digest,
            sub_stream_id: prev.sub_stream_id.clone(),
            anchor_ticker_uuid,
        };
        msg.signature = uncommitted.signer.sign(&msg.signature_payload())?.to_bytes();
        msg.digest = chain_digest(digest_type, Some(&prev.digest), &msg.signature);
        Ok(msg)
    }

    /// The canonical byte tuple the signature covers:
    /// `{name, subStreamID, anchorTickerUuid, uuid, payloadDigest}`.
    pub fn signature_payload(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_string(&self.name);
        w.put_string(self.sub_stream_id.as_str());
        w.put_uuid(&self.anchor_ticker_uuid);
        w.put_uuid(&self.uuid);
        w.put_bytes(&self.payload_digest);
        w.into_bytes()
    }

    /// Recompute this message's chain digest from `prev`, optionally
    /// verifying the signature along the way.
    pub fn compute_chain_hash(
        &self,
        prev: Option<&StreamMessage>,
        authenticator: Option<&dyn Authenticator>,
    ) -> Result<Vec<u8>> {
        if let Some(prev) = prev {
            if prev.digest_type != self.digest_type {
                return Err(CoreError::DigestTypeMismatch {
                    expected: prev.digest_type,
                    actual: self.digest_type,
                });
            }
        }
        if self.signature.is_empty() {
            return Err(CoreError::MissingSignature);
        }
        if let Some(authenticator) = authenticator {
            if !self.verify_signature(authenticator)? {
                return Err(CoreError::SignatureFailed);
            }
        }
        Ok(chain_digest(
            self.digest_type,
            prev.map(|p| p.digest.as_slice()),
            &self.signature,
        ))
    }

    /// Check the stored signature against the canonical tuple.
    ///
    /// `Ok(false)` on cryptographic mismatch; errors only for envelopes
    /// that cannot be parsed.
    pub fn verify_signature(&self, authenticator: &dyn Authenticator) -> Result<bool> {
        if self.signature.is_empty() {
            return Err(CoreError::MissingSignature);
        }
        let envelope = SignatureEnvelope::from_bytes(&self.signature)?;
        authenticator.verify(&self.signature_payload(), &envelope)
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    pub fn digest_type(&self) -> DigestType {
        self.digest_type
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn prev_uuid(&self) -> Uuid {
        self.prev_uuid
    }

    pub fn idx(&self) -> u64 {
        self.idx
    }

    pub fn ts(&self) -> i64 {
        self.ts
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn payload(&self) -> &PayloadDescriptor {
        &self.payload
    }

    pub fn payload_digest(&self) -> &[u8] {
        &self.payload_digest
    }

    pub fn sub_stream_id(&self) -> &SubStreamId {
        &self.sub_stream_id
    }

    pub fn anchor_ticker_uuid(&self) -> Uuid {
        self.anchor_ticker_uuid
    }

    pub fn is_genesis(&self) -> bool {
        self.idx == 0 && self.prev_uuid.is_nil()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_bytes(&self.signature);
        w.put_bytes(&self.digest);
        w.put_u8(self.digest_type.as_u8());
        w.put_uuid(&self.uuid);
        w.put_uuid(&self.prev_uuid);
        w.put_u64(self.idx);
        w.put_i64(self.ts);
        w.put_string(&self.name);
        w.put_u32(self.tags.len() as u32);
        for tag in &self.tags {
            w.put_string(tag);
        }
        w.put_string(&self.payload.backend);
        w.put_string(&self.payload.key);
        w.put_bytes(&self.payload_digest);
        w.put_uuid(&self.anchor_ticker_uuid);
        w.put_string(self.sub_stream_id.as_str());
        w.into_bytes()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let signature = r.get_bytes()?;
        let digest = r.get_bytes()?;
        let digest_type = DigestType::from_u8(r.get_u8()?)?;
        let uuid = r.get_uuid()?;
        let prev_uuid = r.get_uuid()?;
        let idx = r.get_u64()?;
        let ts = r.get_i64()?;
        let name = r.get_string()?;
        let tag_count = r.get_u32()?;
        let mut tags = Vec::with_capacity(tag_count as usize);
        for _ in 0..tag_count {
            tags.push(r.get_string()?);
        }
        let payload = PayloadDescriptor::new(r.get_string()?, r.get_string()?);
        let payload_digest = r.get_bytes()?;
        let anchor_ticker_uuid = r.get_uuid()?;
        let sub_stream_id = SubStreamId::new(r.get_string()?);
        r.finish()?;
        Ok(Self {
            signature,
            digest,
            digest_type,
            uuid,
            prev_uuid,
            idx,
            ts,
            name,
            tags,
            payload,
            payload_digest,
            sub_stream_id,
            anchor_ticker_uuid,
        })
    }
}

/// One tick of the global chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerMessage {
    signature: Vec<u8>,
    digest: Vec<u8>,
    digest_type: DigestType,
    uuid: Uuid,
    prev_uuid: Uuid,
    idx: u64,
    ts: i64,
}

impl TickerMessage {
    /// Chain a new tick onto `prev`. `None` builds the first tick: idx 0,
    /// nil prev pointer, digest over the signature alone.
    pub fn chained(
        prev: Option<&TickerMessage>,
        digest_type: DigestType,
        signer: &dyn Signer,
    ) -> Result<Self> {
        if let Some(prev) = prev {
            if prev.digest_type != digest_type {
                return Err(CoreError::DigestTypeMismatch {
                    expected: prev.digest_type,
                    actual: digest_type,
                });
            }
        }
        let mut msg = Self {
            signature: Vec::new(),
            digest: Vec::new(),
            digest_type,
            uuid: Uuid::new_v4(),
            prev_uuid: prev.map_or_else(Uuid::nil, |p| p.uuid),
            idx: prev.map_or(0, |p| p.idx + 1),
            ts: now_millis(),
        };
        msg.signature = signer.sign(&msg.signature_payload())?.to_bytes();
        msg.digest = chain_digest(digest_type, prev.map(|p| p.digest.as_slice()), &msg.signature);
        Ok(msg)
    }

    /// The canonical byte tuple the signature covers: `{idx, ts, uuid}`.
    pub fn signature_payload(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u64(self.idx);
        w.put_i64(self.ts);
        w.put_uuid(&self.uuid);
        w.into_bytes()
    }

    pub fn compute_chain_hash(
        &self,
        prev: Option<&TickerMessage>,
        authenticator: Option<&dyn Authenticator>,
    ) -> Result<Vec<u8>> {
        if let Some(prev) = prev {
            if prev.digest_type != self.digest_type {
                return Err(CoreError::DigestTypeMismatch {
                    expected: prev.digest_type,
                    actual: self.digest_type,
                });
            }
        }
        if self.signature.is_empty() {
            return Err(CoreError::MissingSignature);
        }
        if let Some(authenticator) = authenticator {
            if !self.verify_signature(authenticator)? {
                return Err(CoreError::SignatureFailed);
            }
        }
        Ok(chain_digest(
            self.digest_type,
            prev.map(|p| p.digest.as_slice()),
            &self.signature,
        ))
    }

    pub fn verify_signature(&self, authenticator: &dyn Authenticator) -> Result<bool> {
        if self.signature.is_empty() {
            return Err(CoreError::MissingSignature);
        }
        let envelope = SignatureEnvelope::from_bytes(&self.signature)?;
        authenticator.verify(&self.signature_payload(), &envelope)
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    pub fn digest_type(&self) -> DigestType {
        self.digest_type
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn prev_uuid(&self) -> Uuid {
        self.prev_uuid
    }

    pub fn idx(&self) -> u64 {
        self.idx
    }

    pub fn ts(&self) -> i64 {
        self.ts
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_bytes(&self.signature);
        w.put_bytes(&self.digest);
        w.put_u8(self.digest_type.as_u8());
        w.put_uuid(&self.uuid);
        w.put_uuid(&self.prev_uuid);
        w.put_u64(self.idx);
        w.put_i64(self.ts);
        w.into_bytes()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let signature = r.get_bytes()?;
        let digest = r.get_bytes()?;
        let digest_type = DigestType::from_u8(r.get_u8()?)?;
        let uuid = r.get_uuid()?;
        let prev_uuid = r.get_uuid()?;
        let idx = r.get_u64()?;
        let ts = r.get_i64()?;
        r.finish()?;
        Ok(Self {
            signature,
            digest,
            digest_type,
            uuid,
            prev_uuid,
            idx,
            ts,
        })
    }
}

/// Validate a contiguous ascending run of stream messages: each digest
/// must equal the recomputed chain hash from its predecessor, and prev
/// pointers must line up. `Ok(false)` on a broken chain.
pub fn validate_stream_messages(
    messages: &[StreamMessage],
    authenticator: Option<&dyn Authenticator>,
) -> Result<bool> {
    for pair in messages.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if cur.prev_uuid != prev.uuid || cur.idx != prev.idx + 1 {
            return Ok(false);
        }
        if cur.compute_chain_hash(Some(prev), authenticator)? != cur.digest {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Validate a contiguous ascending run of ticker messages.
pub fn validate_ticker_messages(
    messages: &[TickerMessage],
    authenticator: Option<&dyn Authenticator>,
) -> Result<bool> {
    for pair in messages.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if cur.prev_uuid != prev.uuid || cur.idx != prev.idx + 1 {
            return Ok(false);
        }
        if cur.compute_chain_hash(Some(prev), authenticator)? != cur.digest {
            return Ok(false);
        }
    }
    Ok(true)
}
