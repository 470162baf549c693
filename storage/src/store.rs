use crate::crypto::{AtRestCipher, CryptoError, NoOpCipher};
use crate::frame::{self, FrameError};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_core::error::{ErrorCode, TesseraError};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Logical keys, one whole-collection blob each.
pub const NODES_KEY: &str = "nodes";
pub const DOCUMENTS_KEY: &str = "documents";
pub const STATE_KEY: &str = "state";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("At-rest encryption error: {0}")]
    Encryption(String),
    #[error("corrupt blob for key {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: FrameError,
    },
    #[error("invalid store key: {0}")]
    InvalidKey(String),
}

impl TesseraError for StoreError {
    fn error_code(&self) -> ErrorCode {
        ErrorCode::Internal
    }
}

impl From<CryptoError> for StoreError {
    fn from(value: CryptoError) -> Self {
        Self::Encryption(value.to_string())
    }
}

/// Key-addressed byte store that encrypts on write and decrypts on read.
#[async_trait::async_trait]
pub trait EncryptedStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn write(&self, key: &str, plaintext: &[u8]) -> Result<(), StoreError>;
}

fn seal(cipher: &dyn AtRestCipher, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
    let ciphertext = cipher.encrypt(plaintext)?;
    Ok(frame::encode(&ciphertext))
}

fn open_sealed(cipher: &dyn AtRestCipher, key: &str, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
    let corrupt = |source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    };
    let frame = frame::decode(sealed).map_err(corrupt)?;
    Ok(cipher.decrypt(frame.ciphertext())?)
}

/// One `<key>.enc` file per key under `dir`.
pub struct FileEncryptedStore {
    dir: PathBuf,
    cipher: Arc<dyn AtRestCipher>,
}

impl FileEncryptedStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_cipher(dir, Arc::new(NoOpCipher)).await
    }

    pub async fn open_with_cipher(
        dir: impl AsRef<Path>,
        cipher: Arc<dyn AtRestCipher>,
    ) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), key_id = ?cipher.key_id(), "opened encrypted store");
        Ok(Self { dir, cipher })
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.enc", key)))
    }
}

#[async_trait::async_trait]
impl EncryptedStore for FileEncryptedStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        let sealed = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e)),
        };
        open_sealed(self.cipher.as_ref(), key, &sealed).map(Some)
    }

    /// Writes to a temp file, fsyncs, then renames over the old blob, so a
    /// failed write never leaves a half-written collection behind.
    async fn write(&self, key: &str, plaintext: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let sealed = seal(self.cipher.as_ref(), plaintext)?;
        let tmp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&sealed).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

/// Sealed blobs kept in memory; same framing and cipher path as the file store.
pub struct InMemoryEncryptedStore {
    blobs: DashMap<String, Vec<u8>>,
    cipher: Arc<dyn AtRestCipher>,
}

impl InMemoryEncryptedStore {
    pub fn new(cipher: Arc<dyn AtRestCipher>) -> Self {
        Self {
            blobs: DashMap::new(),
            cipher,
        }
    }

    /// Raw sealed bytes, for inspecting what would hit the disk.
    pub fn sealed(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.get(key).map(|entry| entry.value().clone())
    }

    pub fn put_sealed(&self, key: &str, sealed: Vec<u8>) {
        self.blobs.insert(key.to_string(), sealed);
    }
}

impl Default for InMemoryEncryptedStore {
    fn default() -> Self {
        Self::new(Arc::new(NoOpCipher))
    }
}

#[async_trait::async_trait]
impl EncryptedStore for InMemoryEncryptedStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(sealed) = self.sealed(key) else {
            return Ok(None);
        };
        open_sealed(self.cipher.as_ref(), key, &sealed).map(Some)
    }

    async fn write(&self, key: &str, plaintext: &[u8]) -> Result<(), StoreError> {
        let sealed = seal(self.cipher.as_ref(), plaintext)?;
        self.blobs.insert(key.to_string(), sealed);
        Ok(())
    }
}
