use graph::{InferenceError, RelationshipError};
use state::StateError;
use storage::crypto::CryptoError;
use storage::{RepoError, StoreError};
use tessera_core::error::{ErrorCode, TesseraError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("encryption setup failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Repository(#[from] RepoError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Relationship(#[from] RelationshipError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("job queue error: {0}")]
    Queue(#[from] anyhow::Error),
    #[error("no inference worker is running")]
    WorkerNotRunning,
}

impl TesseraError for ServiceError {
    fn error_code(&self) -> ErrorCode {
        match self {
            ServiceError::Repository(err) => err.error_code(),
            ServiceError::State(err) => err.error_code(),
            ServiceError::Relationship(err) => err.error_code(),
            ServiceError::Inference(err) => err.error_code(),
            ServiceError::Store(err) => err.error_code(),
            ServiceError::Crypto(_) | ServiceError::Queue(_) | ServiceError::WorkerNotRunning => {
                ErrorCode::Internal
            }
        }
    }
}
