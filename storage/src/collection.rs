use crate::store::{EncryptedStore, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tessera_core::error::{ErrorCode, TesseraError};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{collection} not found: {id}")]
    NotFound { collection: &'static str, id: String },
    #[error("relationship {source_id} -[{relation_type}]-> {target_id} already exists")]
    DuplicateEdge {
        source_id: String,
        target_id: String,
        relation_type: String,
    },
    #[error("relationship limit of {limit} reached ({scope})")]
    EdgeLimitExceeded { scope: &'static str, limit: u64 },
}

impl RepoError {
    pub fn not_found(collection: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::NotFound { .. })
    }
}

impl TesseraError for RepoError {
    fn error_code(&self) -> ErrorCode {
        match self {
            RepoError::Store(_) => ErrorCode::Internal,
            RepoError::Serialization(_) => ErrorCode::Internal,
            RepoError::NotFound { .. } => ErrorCode::NotFound,
            RepoError::DuplicateEdge { .. } => ErrorCode::AlreadyExists,
            RepoError::EdgeLimitExceeded { .. } => ErrorCode::InvalidArgument,
        }
    }
}

/// A whole collection persisted as one blob under one store key.
///
/// Every mutation reads the full collection, changes it in memory and writes
/// it back while holding the collection's writer lock, so two concurrent
/// writers are applied one after the other instead of overwriting each other.
/// Readers skip the lock and see the last complete write.
pub struct Collection<T> {
    store: Arc<dyn EncryptedStore>,
    key: &'static str,
    tx_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn EncryptedStore>, key: &'static str) -> Self {
        Self {
            store,
            key,
            tx_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub async fn load(&self) -> Result<Vec<T>, RepoError> {
        match self.store.read(self.key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Runs `apply` against the current items and persists the result.
    /// If `apply` fails nothing is written.
    pub async fn mutate<R, F>(&self, apply: F) -> Result<R, RepoError>
    where
        F: FnOnce(&mut Vec<T>) -> Result<R, RepoError>,
    {
        let _tx_guard = self.tx_lock.lock().await;

        let mut items = self.load().await?;
        let out = apply(&mut items)?;

        // Serialize fully before touching the store.
        let bytes = serde_json::to_vec(&items)?;
        self.store.write(self.key, &bytes).await?;

        Ok(out)
    }
}
