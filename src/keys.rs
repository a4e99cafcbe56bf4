//! RSA key material for the envelope codec.
use crate::error::KeyError;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::path::Path;

/// Smallest modulus (bytes) that still leaves room for OAEP/SHA-256 padding plus payload.
pub const MIN_MODULUS_BYTES: usize = 2 * 32 + 2 + 1;

/// Our private key plus the public key of whoever we talk to.
///
/// In a shared-key deployment both sides hold the same key pair and the peer key
/// is just our own public half.
#[derive(Clone)]
pub struct KeyMaterial {
    private: RsaPrivateKey,
    peer_public: RsaPublicKey,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("private_bits", &(self.private.size() * 8))
            .field("peer_bits", &(self.peer_public.size() * 8))
            .finish()
    }
}

impl KeyMaterial {
    pub fn new(private: RsaPrivateKey, peer_public: RsaPublicKey) -> Result<Self, KeyError> {
        if private.size() < MIN_MODULUS_BYTES || peer_public.size() < MIN_MODULUS_BYTES {
            return Err(KeyError::Parse(format!(
                "modulus must be at least {} bits",
                MIN_MODULUS_BYTES * 8
            )));
        }
        Ok(Self {
            private,
            peer_public,
        })
    }

    /// Use one key pair for both directions.
    pub fn shared(private: RsaPrivateKey) -> Result<Self, KeyError> {
        let public = private.to_public_key();
        Self::new(private, public)
    }

    /// Fresh shared key pair.
    pub fn generate(bits: usize) -> Result<Self, KeyError> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| KeyError::Generate(e.to_string()))?;
        Self::shared(private)
    }

    /// Parse PEM text. The private key may be PKCS#1 or PKCS#8; without a peer
    /// key the pair is treated as shared.
    pub fn from_pem(private_pem: &str, peer_public_pem: Option<&str>) -> Result<Self, KeyError> {
        let private = RsaPrivateKey::from_pkcs1_pem(private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(private_pem))
            .map_err(|e| KeyError::Parse(e.to_string()))?;
        match peer_public_pem {
            Some(pem) => {
                let public = RsaPublicKey::from_pkcs1_pem(pem)
                    .or_else(|_| RsaPublicKey::from_public_key_pem(pem))
                    .map_err(|e| KeyError::Parse(e.to_string()))?;
                Self::new(private, public)
            }
            None => Self::shared(private),
        }
    }

    pub fn load(private_path: &Path, peer_public_path: Option<&Path>) -> Result<Self, KeyError> {
        let private_pem = read_pem(private_path)?;
        let peer_pem = peer_public_path.map(read_pem).transpose()?;
        Self::from_pem(&private_pem, peer_pem.as_deref())
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    pub fn peer_public_key(&self) -> &RsaPublicKey {
        &self.peer_public
    }
}

fn read_pem(path: &Path) -> Result<String, KeyError> {
    fs::read_to_string(path).map_err(|source| KeyError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// One 1024-bit key pair per test binary; generation is slow in debug builds.
#[cfg(test)]
pub(crate) fn test_keys() -> std::sync::Arc<KeyMaterial> {
    use std::sync::{Arc, OnceLock};
    static KEYS: OnceLock<Arc<KeyMaterial>> = OnceLock::new();
    KEYS.get_or_init(|| Arc::new(KeyMaterial::generate(1024).expect("generate test key")))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
    use rsa::pkcs8::EncodePrivateKey;
    use std::io::Write;

    #[test]
    fn shared_pair_uses_own_public_key() {
        let keys = test_keys();
        assert_eq!(
            keys.peer_public_key(),
            &keys.private_key().to_public_key()
        );
    }

    #[test]
    fn loads_pkcs1_and_pkcs8_pem() {
        let keys = test_keys();
        let pkcs1 = keys
            .private_key()
            .to_pkcs1_pem(LineEnding::LF)
            .expect("pkcs1 pem");
        let pkcs8 = keys
            .private_key()
            .to_pkcs8_pem(LineEnding::LF)
            .expect("pkcs8 pem");

        let from_pkcs1 = KeyMaterial::from_pem(&pkcs1, None).expect("parse pkcs1");
        let from_pkcs8 = KeyMaterial::from_pem(&pkcs8, None).expect("parse pkcs8");
        assert_eq!(from_pkcs1.private_key(), keys.private_key());
        assert_eq!(from_pkcs8.private_key(), keys.private_key());
    }

    #[test]
    fn loads_from_files_with_peer_key() {
        let keys = test_keys();
        let mut private_file = tempfile::NamedTempFile::new().unwrap();
        private_file
            .write_all(
                keys.private_key()
                    .to_pkcs1_pem(LineEnding::LF)
                    .unwrap()
                    .as_bytes(),
            )
            .unwrap();
        let mut public_file = tempfile::NamedTempFile::new().unwrap();
        public_file
            .write_all(
                keys.peer_public_key()
                    .to_pkcs1_pem(LineEnding::LF)
                    .unwrap()
                    .as_bytes(),
            )
            .unwrap();

        let loaded = KeyMaterial::load(private_file.path(), Some(public_file.path()))
            .expect("load key files");
        assert_eq!(loaded.peer_public_key(), keys.peer_public_key());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = KeyMaterial::load(Path::new("/nonexistent/key.pem"), None)
            .expect_err("missing file");
        assert!(matches!(err, KeyError::Read { ref path, .. } if path.contains("key.pem")));
    }

    #[test]
    fn garbage_pem_rejected() {
        assert!(matches!(
            KeyMaterial::from_pem("not a key", None),
            Err(KeyError::Parse(_))
        ));
    }
}
