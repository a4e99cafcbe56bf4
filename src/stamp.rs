//! Hashcash stamp: the unit of work exchanged between issuer and solver.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The only stamp layout this crate speaks.
pub const STAMP_VERSION: u32 = 1;

/// Largest meaningful difficulty for a SHA-256 digest.
pub const MAX_DIFFICULTY: u32 = 256;

/// A Hashcash stamp bound to a peer, an issuer-chosen seed and an issue time.
///
/// The issuer creates it with `counter = 0`; the solver only ever changes
/// `counter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PuzzleStamp {
    pub version: u32,
    /// Required number of leading zero bits in the digest.
    pub difficulty: u32,
    /// Unix seconds at which the issuer minted the stamp.
    pub issued_at: u64,
    /// Identity of the requesting peer, normally its socket address.
    pub origin: String,
    /// Base64 seed chosen by the issuer per connection.
    pub nonce_seed: String,
    pub counter: u64,
}

impl PuzzleStamp {
    /// Canonical string form hashed by both sides:
    /// `version:difficulty:issued_at:origin::nonce_seed:counter`.
    pub fn canonical(&self) -> String {
        self.canonical_with_counter(self.counter)
    }

    pub(crate) fn canonical_with_counter(&self, counter: u64) -> String {
        format!(
            "{}:{}:{}:{}::{}:{}",
            self.version, self.difficulty, self.issued_at, self.origin, self.nonce_seed, counter
        )
    }

    /// SHA-256 of the canonical form.
    pub fn digest(&self) -> [u8; 32] {
        self.digest_with_counter(self.counter)
    }

    pub(crate) fn digest_with_counter(&self, counter: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_with_counter(counter).as_bytes());
        hasher.finalize().into()
    }

    /// Digest as lowercase hex, for logs.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }

    /// Whether the current counter satisfies the stamp's own difficulty.
    pub fn is_solved(&self) -> bool {
        meets_leading_zero_bits(&self.digest(), self.difficulty)
    }
}

/// Count leading zero bits, most significant bit of byte 0 first.
pub fn leading_zero_bits(hash: &[u8]) -> u32 {
    let mut count = 0u32;
    for byte in hash {
        if *byte == 0 {
            count += 8;
            continue;
        }
        count += (*byte).leading_zeros();
        break;
    }
    count
}

pub fn meets_leading_zero_bits(hash: &[u8], bits: u32) -> bool {
    leading_zero_bits(hash) >= bits
}
