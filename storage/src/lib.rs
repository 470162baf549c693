pub mod collection;
pub mod crypto;
pub mod documents;
pub mod frame;
pub mod nodes;
pub mod store;

pub use collection::{Collection, RepoError};
pub use documents::DocumentRepository;
pub use nodes::{EdgeCapacity, NodeRepository};
pub use store::{EncryptedStore, FileEncryptedStore, InMemoryEncryptedStore, StoreError};

use crypto::{AesGcmCipher, AtRestCipher, CryptoError, DataKeyProvider, InMemoryKeyProvider, NoOpCipher};
use std::sync::Arc;
use tessera_core::config::EncryptionConfig;

/// Cipher selected by `storage.encryption`. Encryption enabled without a
/// secret is a configuration error, never a silent downgrade.
pub fn cipher_from_config(config: &EncryptionConfig) -> Result<Arc<dyn AtRestCipher>, CryptoError> {
    if !config.enabled {
        tracing::warn!("at-rest encryption disabled; blobs are stored in plaintext frames");
        return Ok(Arc::new(NoOpCipher));
    }

    let secret = config
        .secret
        .as_deref()
        .map(str::trim)
        .filter(|secret| !secret.is_empty())
        .ok_or_else(|| CryptoError::MissingKey(config.key_id.clone()))?;

    let keys = Arc::new(InMemoryKeyProvider::from_secret(config.key_id.clone(), secret))
        as Arc<dyn DataKeyProvider>;
    Ok(Arc::new(AesGcmCipher::new(config.key_id.clone(), keys)))
}
