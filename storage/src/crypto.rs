use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("data key not found: {0}")]
    MissingKey(String),
    #[error("data key must not be empty")]
    EmptyKey,
    #[error("data key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("ciphertext shorter than its nonce and tag")]
    TruncatedCiphertext,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("ciphertext failed authentication (tampered data or wrong key)")]
    AuthenticationFailed,
}

pub trait AtRestCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn key_id(&self) -> Option<&str> {
        None
    }
}

/// Pass-through cipher for `storage.encryption.enabled = false`.
#[derive(Default)]
pub struct NoOpCipher;

impl AtRestCipher for NoOpCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(ciphertext.to_vec())
    }
}

pub trait DataKeyProvider: Send + Sync {
    fn resolve_data_key(&self, key_id: &str) -> Result<Vec<u8>, CryptoError>;
}

#[derive(Default)]
pub struct InMemoryKeyProvider {
    keys: HashMap<String, Vec<u8>>,
}

impl InMemoryKeyProvider {
    pub fn from_keys<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        Self {
            keys: entries
                .into_iter()
                .map(|(key_id, key)| (key_id.into(), key))
                .collect(),
        }
    }

    /// Single key derived from a passphrase: SHA-256 gives the 32-byte data key.
    pub fn from_secret(key_id: impl Into<String>, secret: &str) -> Self {
        let key = Sha256::digest(secret.as_bytes()).to_vec();
        Self::from_keys([(key_id.into(), key)])
    }
}

impl DataKeyProvider for InMemoryKeyProvider {
    fn resolve_data_key(&self, key_id: &str) -> Result<Vec<u8>, CryptoError> {
        self.keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| CryptoError::MissingKey(key_id.to_string()))
    }
}

/// AES-256-GCM with a fresh random 96-bit nonce per blob.
///
/// Output layout is `nonce (12 bytes) || ciphertext || tag (16 bytes)`. A
/// wrong key or any modified byte fails decryption with
/// [`CryptoError::AuthenticationFailed`].
pub struct AesGcmCipher {
    key_id: String,
    key_provider: Arc<dyn DataKeyProvider>,
}

impl AesGcmCipher {
    pub fn new(key_id: impl Into<String>, key_provider: Arc<dyn DataKeyProvider>) -> Self {
        Self {
            key_id: key_id.into(),
            key_provider,
        }
    }

    fn aead(&self) -> Result<Aes256Gcm, CryptoError> {
        let key = self.key_provider.resolve_data_key(&self.key_id)?;
        if key.is_empty() {
            return Err(CryptoError::EmptyKey);
        }
        Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::InvalidKeyLength(key.len()))
    }
}

impl AtRestCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let aead = self.aead()?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend(sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let aead = self.aead()?;
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::TruncatedCiphertext);
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        aead.decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }

    fn key_id(&self) -> Option<&str> {
        Some(self.key_id.as_str())
    }
}
