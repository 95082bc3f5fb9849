//! Anchoring proofs.
//!
//! A proof carries the fingerprints of a contiguous run of substream
//! messages together with the ticker message it was anchored against.
//! Internal validity means the fingerprint digests re-chain; consistency
//! ties consecutive proofs together by requiring the previous proof's end
//! message to be the next proof's start message.

use uuid::Uuid;

use crate::crypto::DigestType;
use crate::error::{CoreError, Result};
use crate::keys::SubStreamId;
use crate::message::{chain_digest, StreamMessage, TickerMessage};
use crate::wire::{Reader, Writer};

/// Fixed uuid written into both span slots of a genesis proof on the wire.
pub const GENESIS_PROOF_UUID_BYTES: [u8; 16] = [
    220, 241, 234, 178, 108, 41, 73, 73, 162, 150, 124, 204, 66, 118, 33, 160,
];

/// The genesis span sentinel as a uuid.
pub fn genesis_proof_uuid() -> Uuid {
    Uuid::from_bytes(GENESIS_PROOF_UUID_BYTES)
}

/// The chain-relevant fields of one message: enough to re-derive the
/// chain digest without the message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFingerprint {
    pub signature: Vec<u8>,
    pub digest: Vec<u8>,
    pub digest_type: DigestType,
    pub uuid: Uuid,
}

impl From<&StreamMessage> for MessageFingerprint {
    fn from(msg: &StreamMessage) -> Self {
        Self {
            signature: msg.signature().to_vec(),
            digest: msg.digest().to_vec(),
            digest_type: msg.digest_type(),
            uuid: msg.uuid(),
        }
    }
}

/// The range of substream messages a proof covers.
///
/// `Genesis` marks the first proof of a substream, which covers no
/// messages; on the wire it is encoded as the fixed sentinel uuid in
/// both slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofSpan {
    Genesis,
    Chained { start: Uuid, end: Uuid },
}

/// An anchoring proof for one substream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    fingerprints: Vec<MessageFingerprint>,
    span: ProofSpan,
    sub_stream_id: SubStreamId,
    ticker_uuid: Uuid,
    start_idx: u64,
    end_idx: u64,
    ticker_idx: u64,
}

impl Proof {
    /// Build a proof over an ascending run of messages, anchored at `tick`.
    pub fn new(
        messages: &[StreamMessage],
        sub_stream_id: &SubStreamId,
        tick: &TickerMessage,
    ) -> Result<Self> {
        let (first, last) = match (messages.first(), messages.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(CoreError::InvalidInput(
                    "cannot build a proof over zero messages".to_string(),
                ))
            }
        };
        for msg in messages {
            if msg.sub_stream_id() != sub_stream_id {
                return Err(CoreError::InvalidInput(format!(
                    "message {} belongs to substream {}, not {}",
                    msg.uuid(),
                    msg.sub_stream_id(),
                    sub_stream_id
                )));
            }
        }
        Ok(Self {
            fingerprints: messages.iter().map(MessageFingerprint::from).collect(),
            span: ProofSpan::Chained {
                start: first.uuid(),
                end: last.uuid(),
            },
            sub_stream_id: sub_stream_id.clone(),
            ticker_uuid: tick.uuid(),
            start_idx: first.idx(),
            end_idx: last.idx(),
            ticker_idx: tick.idx(),
        })
    }

    /// The first proof of a substream: covers no messages.
    pub fn genesis(sub_stream_id: SubStreamId, tick: &TickerMessage) -> Self {
        Self {
            fingerprints: Vec::new(),
            span: ProofSpan::Genesis,
            sub_stream_id,
            ticker_uuid: tick.uuid(),
            start_idx: 0,
            end_idx: 0,
            ticker_idx: tick.idx(),
        }
    }

    /// Internal validity: every fingerprint digest re-chains from its
    /// predecessor. Zero or one fingerprints are trivially valid.
    pub fn validate(&self) -> bool {
        for pair in self.fingerprints.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            if prev.digest_type != cur.digest_type {
                return false;
            }
            if chain_digest(cur.digest_type, Some(&prev.digest), &cur.signature) != cur.digest {
                return false;
            }
        }
        true
    }

    /// External consistency with the proof that preceded this one.
    ///
    /// A genesis predecessor is always consistent; otherwise the
    /// predecessor's end message must be this proof's start message.
    /// `None` is an error: consistency against nothing is meaningless.
    pub fn is_consistent(&self, prev: Option<&Proof>) -> Result<bool> {
        let prev = prev.ok_or_else(|| {
            CoreError::InvalidInput("cannot check consistency without a previous proof".to_string())
        })?;
        if prev.is_genesis() {
            return Ok(true);
        }
        match (&prev.span, &self.span) {
            (ProofSpan::Chained { end, .. }, ProofSpan::Chained { start, .. }) => Ok(end == start),
            _ => Ok(false),
        }
    }

    pub fn fingerprints(&self) -> &[MessageFingerprint] {
        &self.fingerprints
    }

    pub fn span(&self) -> &ProofSpan {
        &self.span
    }

    pub fn is_genesis(&self) -> bool {
        matches!(self.span, ProofSpan::Genesis)
    }

    /// Uuid of the first covered message; `None` for a genesis proof.
    pub fn start_uuid(&self) -> Option<Uuid> {
        match &self.span {
            ProofSpan::Genesis => None,
            ProofSpan::Chained { start, .. } => Some(*start),
        }
    }

    /// Uuid of the last covered message; `None` for a genesis proof.
    pub fn end_uuid(&self) -> Option<Uuid> {
        match &self.span {
            ProofSpan::Genesis => None,
            ProofSpan::Chained { end, .. } => Some(*end),
        }
    }

    pub fn sub_stream_id(&self) -> &SubStreamId {
        &self.sub_stream_id
    }

    pub fn ticker_uuid(&self) -> Uuid {
        self.ticker_uuid
    }

    pub fn start_idx(&self) -> u64 {
        self.start_idx
    }

    pub fn end_idx(&self) -> u64 {
        self.end_idx
    }

    pub fn ticker_idx(&self) -> u64 {
        self.ticker_idx
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u32(self.fingerprints.len() as u32);
        for fp in &self.fingerprints {
            w.put_bytes(&fp.signature);
            w.put_bytes(&fp.digest);
            w.put_u8(fp.digest_type.as_u8());
            w.put_uuid(&fp.uuid);
        }
        let (start, end) = match &self.span {
            ProofSpan::Genesis => (genesis_proof_uuid(), genesis_proof_uuid()),
            ProofSpan::Chained { start, end } => (*start, *end),
        };
        w.put_uuid(&start);
        w.put_uuid(&end);
        w.put_string(self.sub_stream_id.as_str());
        w.put_uuid(&self.ticker_uuid);
        w.put_u64(self.start_idx);
        w.put_u64(self.end_idx);
        w.put_u64(self.ticker_idx);
        w.into_bytes()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let count = r.get_u32()?;
        let mut fingerprints = Vec::with_capacity(count as usize);
        for _ in 0..count {
            fingerprints.push(MessageFingerprint {
                signature: r.get_bytes()?,
                digest: r.get_bytes()?,
                digest_type: DigestType::from_u8(r.get_u8()?)?,
                uuid: r.get_uuid()?,
            });
        }
        let start = r.get_uuid()?;
        let end = r.get_uuid()?;
        let span = if start == genesis_proof_uuid() && end == genesis_proof_uuid() {
            ProofSpan::Genesis
        } else {
            ProofSpan::Chained { start, end }
        };
        let sub_stream_id = SubStreamId::new(r.get_string()?);
        let ticker_uuid = r.get_uuid()?;
        let start_idx = r.get_u64()?;
        let end_idx = r.get_u64()?;
        let ticker_idx = r.get_u64()?;
        r.finish()?;
        Ok(Self {
            fingerprints,
            span,
            sub_stream_id,
            ticker_uuid,
            start_idx,
            end_idx,
            ticker_idx,
        })
    }
}
