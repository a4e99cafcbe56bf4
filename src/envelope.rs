//! Typed wire messages and their chunked RSA-OAEP encryption.
//!
//! An envelope is serialized with bincode, split into blocks that fit one
//! OAEP/SHA-256 operation under the recipient key, and each block is encrypted
//! independently. The ciphertext is the concatenation of full modulus-sized
//! blocks, so decoding simply walks it in modulus-sized steps.
use crate::error::EnvelopeError;
use crate::keys::KeyMaterial;
use bincode::Options;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

/// OAEP label shared by both sides.
pub const OAEP_LABEL: &str = "OAEP Encrypted";

/// Upper bound on a serialized envelope before encryption.
pub const MAX_PLAINTEXT_BYTES: u64 = 64 * 1024;

const SHA256_LEN: usize = 32;

/// Protocol step an envelope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StepTag {
    ChallengeRequest = 0,
    ChallengeResponse = 1,
    SolutionRequest = 2,
    SolutionResponse = 3,
}

impl From<StepTag> for u8 {
    fn from(tag: StepTag) -> Self {
        tag as u8
    }
}

impl TryFrom<u8> for StepTag {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ChallengeRequest),
            1 => Ok(Self::ChallengeResponse),
            2 => Ok(Self::SolutionRequest),
            3 => Ok(Self::SolutionResponse),
            other => Err(format!("unknown step tag {other}")),
        }
    }
}

/// One protocol step. The payload is opaque to the codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub step: StepTag,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(step: StepTag, payload: Vec<u8>) -> Self {
        Self { step, payload }
    }

    pub fn empty(step: StepTag) -> Self {
        Self::new(step, Vec::new())
    }
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_PLAINTEXT_BYTES)
}

fn padding() -> Oaep {
    Oaep::new_with_label::<Sha256, _>(OAEP_LABEL)
}

/// Largest plaintext block one OAEP/SHA-256 operation accepts for `key`.
///
/// Fails for moduli too small to carry any payload.
pub fn plaintext_block_len(key: &RsaPublicKey) -> Result<usize, EnvelopeError> {
    key.size()
        .checked_sub(2 * SHA256_LEN + 2)
        .filter(|len| *len > 0)
        .ok_or_else(|| {
            EnvelopeError::Encrypt(format!(
                "{}-bit key is too small for OAEP/SHA-256",
                key.size() * 8
            ))
        })
}

/// Serialize and encrypt `envelope` for the holder of `recipient`'s private key.
pub fn encode(envelope: &Envelope, recipient: &RsaPublicKey) -> Result<Vec<u8>, EnvelopeError> {
    let plain = wire_options()
        .serialize(envelope)
        .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))?;
    encrypt_chunked(&plain, recipient)
}

/// Decrypt and deserialize bytes produced by [`encode`].
pub fn decode(bytes: &[u8], recipient: &RsaPrivateKey) -> Result<Envelope, EnvelopeError> {
    let plain = decrypt_chunked(bytes, recipient)?;
    wire_options()
        .deserialize(&plain)
        .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))
}

pub fn encrypt_chunked(plain: &[u8], key: &RsaPublicKey) -> Result<Vec<u8>, EnvelopeError> {
    let step = plaintext_block_len(key)?;
    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(plain.len().div_ceil(step).max(1) * key.size());
    for block in plain.chunks(step) {
        let encrypted = key
            .encrypt(&mut rng, padding(), block)
            .map_err(|e| EnvelopeError::Encrypt(e.to_string()))?;
        out.extend_from_slice(&encrypted);
    }
    Ok(out)
}

pub fn decrypt_chunked(cipher: &[u8], key: &RsaPrivateKey) -> Result<Vec<u8>, EnvelopeError> {
    let step = key.size();
    if cipher.is_empty() || cipher.len() % step != 0 {
        return Err(EnvelopeError::DecryptFailed(format!(
            "ciphertext length {} is not a multiple of {step}",
            cipher.len()
        )));
    }
    let mut out = Vec::with_capacity(cipher.len());
    for block in cipher.chunks(step) {
        let decrypted = key
            .decrypt(padding(), block)
            .map_err(|e| EnvelopeError::DecryptFailed(e.to_string()))?;
        out.extend_from_slice(&decrypted);
    }
    Ok(out)
}

/// Codec bound to one side's key material: encrypts to the peer, decrypts with our key.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    keys: Arc<KeyMaterial>,
}

impl EnvelopeCodec {
    pub fn new(keys: Arc<KeyMaterial>) -> Self {
        Self { keys }
    }

    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, EnvelopeError> {
        encode(envelope, self.keys.peer_public_key())
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
        decode(bytes, self.keys.private_key())
    }
}
