use crate::collection::{Collection, RepoError};
use crate::store::{EncryptedStore, DOCUMENTS_KEY};
use std::sync::Arc;
use tessera_core::clock::{next_timestamp, Clock, SystemClock};
use tessera_core::ids::{IdGenerator, UuidGenerator, DOCUMENT_ID_PREFIX};
use tessera_core::model::{merge_attributes, Attributes, Document, RESERVED_DOCUMENT_KEYS};

const COLLECTION: &str = "document";

pub struct DocumentRepository {
    documents: Collection<Document>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl DocumentRepository {
    pub fn new(store: Arc<dyn EncryptedStore>) -> Self {
        Self::with_components(store, Arc::new(SystemClock), Arc::new(UuidGenerator))
    }

    pub fn with_components(
        store: Arc<dyn EncryptedStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            documents: Collection::new(store, DOCUMENTS_KEY),
            clock,
            ids,
        }
    }

    pub async fn get_all(&self) -> Result<Vec<Document>, RepoError> {
        self.documents.load().await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Document, RepoError> {
        self.documents
            .load()
            .await?
            .into_iter()
            .find(|doc| doc.id == id)
            .ok_or_else(|| RepoError::not_found(COLLECTION, id))
    }

    pub async fn count(&self) -> Result<u64, RepoError> {
        Ok(self.documents.load().await?.len() as u64)
    }

    pub async fn create(&self, payload: Attributes) -> Result<Document, RepoError> {
        let document = Document::new(
            self.ids.generate(DOCUMENT_ID_PREFIX),
            payload,
            self.clock.now(),
        );

        let created = document.clone();
        self.documents
            .mutate(move |documents| {
                documents.push(document);
                Ok(())
            })
            .await?;

        tracing::debug!(document_id = %created.id, "document created");
        Ok(created)
    }

    pub async fn update(&self, id: &str, partial: Attributes) -> Result<Document, RepoError> {
        let now = self.clock.now();
        self.documents
            .mutate(|documents| {
                let document = documents
                    .iter_mut()
                    .find(|doc| doc.id == id)
                    .ok_or_else(|| RepoError::not_found(COLLECTION, id))?;
                merge_attributes(&mut document.attributes, partial, RESERVED_DOCUMENT_KEYS);
                document.updated_at = next_timestamp(document.updated_at, now);
                Ok(document.clone())
            })
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<Document, RepoError> {
        let removed = self
            .documents
            .mutate(|documents| {
                let index = documents
                    .iter()
                    .position(|doc| doc.id == id)
                    .ok_or_else(|| RepoError::not_found(COLLECTION, id))?;
                Ok(documents.remove(index))
            })
            .await?;

        tracing::debug!(document_id = %id, "document deleted");
        Ok(removed)
    }
}
