//! Cryptographic primitives for entwine.
//!
//! Chain digests (md5/sha1/sha256), self-describing signature envelopes,
//! and the Ed25519 signer/authenticator pair built on ed25519-dalek.

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::wire::{Reader, Writer};

/// Digest algorithm used for chain hashes.
///
/// Fixed per store at construction; a chain never mixes digest types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestType {
    Md5,
    Sha1,
    Sha256,
}

impl DigestType {
    /// Length in bytes of a digest of this type.
    pub const fn digest_len(&self) -> usize {
        match self {
            DigestType::Md5 => 16,
            DigestType::Sha1 => 20,
            DigestType::Sha256 => 32,
        }
    }

    pub(crate) const fn as_u8(&self) -> u8 {
        match self {
            DigestType::Md5 => 0,
            DigestType::Sha1 => 1,
            DigestType::Sha256 => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(DigestType::Md5),
            1 => Ok(DigestType::Sha1),
            2 => Ok(DigestType::Sha256),
            other => Err(CoreError::DecodingError(format!(
                "unknown digest type tag: {other}"
            ))),
        }
    }
}

/// Incremental hasher over one of the supported digest types.
///
/// Used to stream payload bytes through the digest without buffering
/// the whole payload.
pub enum ChainHasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl ChainHasher {
    pub fn new(digest_type: DigestType) -> Self {
        match digest_type {
            DigestType::Md5 => ChainHasher::Md5(Md5::new()),
            DigestType::Sha1 => ChainHasher::Sha1(Sha1::new()),
            DigestType::Sha256 => ChainHasher::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ChainHasher::Md5(h) => h.update(data),
            ChainHasher::Sha1(h) => h.update(data),
            ChainHasher::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            ChainHasher::Md5(h) => h.finalize().to_vec(),
            ChainHasher::Sha1(h) => h.finalize().to_vec(),
            ChainHasher::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

/// One-shot digest of a byte slice.
pub fn hash_bytes(digest_type: DigestType, data: &[u8]) -> Vec<u8> {
    let mut hasher = ChainHasher::new(digest_type);
    hasher.update(data);
    hasher.finalize()
}

/// Hash algorithm tag carried inside a signature envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    const fn as_u8(&self) -> u8 {
        match self {
            HashAlgorithm::Sha256 => 0,
            HashAlgorithm::Sha512 => 1,
        }
    }

    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(HashAlgorithm::Sha256),
            1 => Ok(HashAlgorithm::Sha512),
            other => Err(CoreError::MalformedSignature(format!(
                "unknown hash algorithm tag: {other}"
            ))),
        }
    }
}

/// Public-key algorithm tag carried inside a signature envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkAlgorithm {
    Ed25519,
}

impl PkAlgorithm {
    const fn as_u8(&self) -> u8 {
        match self {
            PkAlgorithm::Ed25519 => 0,
        }
    }

    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(PkAlgorithm::Ed25519),
            other => Err(CoreError::MalformedSignature(format!(
                "unknown public-key algorithm tag: {other}"
            ))),
        }
    }
}

/// A self-describing signature.
///
/// Stored in serialized form inside every message, so a verifier can be
/// chosen purely from what is read back out of storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    pub bytes: Vec<u8>,
    pub hash_algorithm: HashAlgorithm,
    pub pk_algorithm: PkAlgorithm,
}

impl SignatureEnvelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(self.hash_algorithm.as_u8());
        w.put_u8(self.pk_algorithm.as_u8());
        w.put_bytes(&self.bytes);
        w.into_bytes()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let hash_algorithm = HashAlgorithm::from_u8(r.get_u8()?)?;
        let pk_algorithm = PkAlgorithm::from_u8(r.get_u8()?)?;
        let bytes = r.get_bytes()?;
        r.finish()?;
        Ok(Self {
            bytes,
            hash_algorithm,
            pk_algorithm,
        })
    }
}

/// Produces signature envelopes over arbitrary payloads.
pub trait Signer: Send + Sync {
    fn sign(&self, data: &[u8]) -> Result<SignatureEnvelope>;
}

/// Verifies signature envelopes.
///
/// `Ok(false)` means a well-formed envelope that does not verify;
/// errors are reserved for malformed envelopes.
pub trait Authenticator: Send + Sync {
    fn verify(&self, data: &[u8], envelope: &SignatureEnvelope) -> Result<bool>;
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ed25519PublicKey(pub [u8; 32]);

impl Ed25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes =
            hex::decode(s).map_err(|e| CoreError::InvalidInput(format!("bad hex key: {e}")))?;
        if bytes.len() != 32 {
            return Err(CoreError::InvalidInput(format!(
                "public key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Pub({})", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Ed25519PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A keypair for signing messages.
///
/// Wraps ed25519-dalek's SigningKey.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut rng);
        Self { signing_key }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    fn sign_raw(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}

/// Signer backed by an Ed25519 keypair.
#[derive(Clone, Debug)]
pub struct Ed25519Signer {
    keypair: Keypair,
}

impl Ed25519Signer {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// The authenticator that verifies this signer's envelopes.
    pub fn authenticator(&self) -> Ed25519Authenticator {
        Ed25519Authenticator::new(self.public_key())
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, data: &[u8]) -> Result<SignatureEnvelope> {
        Ok(SignatureEnvelope {
            bytes: self.keypair.sign_raw(data).to_vec(),
            // Ed25519 hashes internally with SHA-512.
            hash_algorithm: HashAlgorithm::Sha512,
            pk_algorithm: PkAlgorithm::Ed25519,
        })
    }
}

/// Authenticator backed by an Ed25519 public key.
#[derive(Clone, Copy, Debug)]
pub struct Ed25519Authenticator {
    public_key: Ed25519PublicKey,
}

impl Ed25519Authenticator {
    pub fn new(public_key: Ed25519PublicKey) -> Self {
        Self { public_key }
    }
}

impl Authenticator for Ed25519Authenticator {
    fn verify(&self, data: &[u8], envelope: &SignatureEnvelope) -> Result<bool> {
        if envelope.pk_algorithm != PkAlgorithm::Ed25519 {
            return Err(CoreError::MalformedSignature(format!(
                "expected Ed25519 envelope, got {:?}",
                envelope.pk_algorithm
            )));
        }
        if envelope.bytes.len() != 64 {
            return Err(CoreError::MalformedSignature(format!(
                "Ed25519 signature must be 64 bytes, got {}",
                envelope.bytes.len()
            )));
        }
        let verifying_key = VerifyingKey::from_bytes(self.public_key.as_bytes())
            .map_err(|e| CoreError::MalformedSignature(format!("bad public key: {e}")))?;
        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(&envelope.bytes);
        let sig = Signature::from_bytes(&sig_bytes);
        Ok(verifying_key.verify(data, &sig).is_ok())
    }
}
