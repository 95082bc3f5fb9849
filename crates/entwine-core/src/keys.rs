//! KV key derivation.
//!
//! Every record a store writes lives under a deterministic, colon-delimited
//! key derived here. Name, tag and proof keys start with the first four hex
//! characters of an md5 over the logical name, which spreads entries across
//! lexicographic shards while keeping prefix scans cheap.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Identifies one substream. Opaque to the stores except that it must not
/// contain `:`, which is the key delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubStreamId(String);

impl SubStreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh random id.
    pub fn allocate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubStreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn check_delimiter_free(id: &str) -> Result<()> {
    if id.contains(':') {
        return Err(CoreError::InvalidInput(format!(
            "id contains invalid character ':': {id}"
        )));
    }
    Ok(())
}

fn hashed_prefix(s: &str) -> String {
    let digest = Md5::digest(s.as_bytes());
    hex::encode(digest)[..4].to_string()
}

/// Key of the serialized message record: `<uuid>:n`.
pub fn primary_record_key(uuid: &Uuid) -> String {
    format!("{uuid}:n")
}

/// Key of the back pointer written under the successor's uuid: `<uuid>:p`.
pub fn previous_node_key(uuid: &Uuid) -> String {
    format!("{uuid}:p")
}

/// Key of the anchor pointer: `<uuid>:a`.
pub fn anchor_node_key(uuid: &Uuid) -> String {
    format!("{uuid}:a")
}

/// Key of the write-ahead intent record for an in-flight append: `<uuid>:i`.
pub fn intent_key(uuid: &Uuid) -> String {
    format!("{uuid}:i")
}

/// Key the current head of a substream is stored under: `<id>:h`.
pub fn sub_stream_head_key(id: &SubStreamId) -> Result<String> {
    check_delimiter_free(id.as_str())?;
    Ok(format!("{id}:h"))
}

/// Key the current head of the ticker chain is stored under.
pub const TICKER_HEAD_KEY: &str = "ticker:head";

/// Prefix shared by all name entries for `name`:
/// `<md5(name)[..4]>:n:<name>`.
pub fn name_key_prefix(name: &str) -> Result<String> {
    check_delimiter_free(name)?;
    Ok(format!("{}:n:{}", hashed_prefix(name), name))
}

/// Full name entry key: `<prefix>:<uuid>`.
pub fn name_entry(name_prefix: &str, uuid: &Uuid) -> String {
    format!("{name_prefix}:{uuid}")
}

/// Extract the uuid segment from a name entry key.
pub fn uuid_from_name_key(key: &str) -> Result<Uuid> {
    let parts: Vec<&str> = key.split(':').collect();
    if parts.len() != 4 {
        return Err(CoreError::InvalidInput(format!("invalid name key: {key}")));
    }
    Uuid::parse_str(parts[3])
        .map_err(|e| CoreError::InvalidInput(format!("invalid uuid in name key {key}: {e}")))
}

/// Prefix shared by all tag entries for `tag`: `<md5(tag)[..4]>:t:<tag>`.
pub fn tag_key_prefix(tag: &str) -> Result<String> {
    check_delimiter_free(tag)?;
    Ok(format!("{}:t:{}", hashed_prefix(tag), tag))
}

/// Full tag entry key: `<prefix>:<uuid>`.
pub fn tag_entry(tag_prefix: &str, uuid: &Uuid) -> String {
    format!("{tag_prefix}:{uuid}")
}

/// Extract the uuid segment from a tag entry key.
pub fn uuid_from_tag_key(key: &str) -> Result<Uuid> {
    let parts: Vec<&str> = key.split(':').collect();
    if parts.len() != 4 {
        return Err(CoreError::InvalidInput(format!("invalid tag key: {key}")));
    }
    Uuid::parse_str(parts[3])
        .map_err(|e| CoreError::InvalidInput(format!("invalid uuid in tag key {key}: {e}")))
}

/// Prefix shared by all proofs for a substream: `<md5(id)[..4]>:<id>:pf`.
pub fn proof_identifier_prefix(id: &SubStreamId) -> Result<String> {
    check_delimiter_free(id.as_str())?;
    Ok(format!("{}:{}:pf", hashed_prefix(id.as_str()), id))
}

/// Key of the proof at `idx` for a substream: `<prefix>:<idx>`.
pub fn proof_identifier(id: &SubStreamId, idx: u64) -> Result<String> {
    Ok(format!("{}:{}", proof_identifier_prefix(id)?, idx))
}

/// Binary form of a uuid.
pub fn uuid_to_bytes(uuid: &Uuid) -> [u8; 16] {
    *uuid.as_bytes()
}

/// Parse a uuid from its 16-byte binary form.
pub fn bytes_to_uuid(bytes: &[u8]) -> Result<Uuid> {
    if bytes.len() != 16 {
        return Err(CoreError::InvalidInput(format!(
            "uuid must be 16 bytes, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 16];
    arr.copy_from_slice(bytes);
    Ok(Uuid::from_bytes(arr))
}
