use crate::error::ServiceError;
use graph::{InferenceReport, RelationshipEngine, SimilarityInferenceEngine};
use jobs::{ChannelJobQueue, InferenceJob, JobQueue, Worker};
use serde_json::Value;
use state::{
    AggregateState, ListenerError, ListenerId, RepositoryCounts, StateChangeBus, StateEvent, StateSnapshot,
};
use std::sync::Arc;
use storage::{
    cipher_from_config, DocumentRepository, EncryptedStore, FileEncryptedStore, InMemoryEncryptedStore,
    NodeRepository,
};
use tessera_core::config::AppConfig;
use tessera_core::model::{Attributes, Document, Node, RelationshipRecord};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

struct BackgroundWorker {
    queue: ChannelJobQueue,
    handle: JoinHandle<usize>,
}

/// Wires the store, repositories, aggregate state and engines together and
/// exposes the operations a transport layer would call.
pub struct TesseraService {
    nodes: Arc<NodeRepository>,
    documents: Arc<DocumentRepository>,
    bus: Arc<StateChangeBus>,
    state: Arc<AggregateState>,
    relationships: RelationshipEngine,
    inference: Arc<SimilarityInferenceEngine>,
    worker: Option<BackgroundWorker>,
    config: AppConfig,
}

impl TesseraService {
    /// File-backed service under `storage.data_dir`, encrypted per `storage.encryption`.
    pub async fn open(config: &AppConfig) -> Result<Self, ServiceError> {
        let cipher = cipher_from_config(&config.storage.encryption)?;
        let store = FileEncryptedStore::open_with_cipher(&config.storage.data_dir, cipher).await?;
        tracing::info!(data_dir = %config.storage.data_dir, "opened encrypted store");
        Self::with_store(Arc::new(store), config.clone()).await
    }

    pub async fn in_memory() -> Result<Self, ServiceError> {
        Self::with_store(Arc::new(InMemoryEncryptedStore::default()), AppConfig::default()).await
    }

    pub async fn with_store(store: Arc<dyn EncryptedStore>, config: AppConfig) -> Result<Self, ServiceError> {
        let nodes = Arc::new(NodeRepository::new(store.clone()));
        let documents = Arc::new(DocumentRepository::new(store.clone()));
        let bus = Arc::new(StateChangeBus::new());
        let counts = Arc::new(RepositoryCounts::new(nodes.clone(), documents.clone()));
        let state = Arc::new(
            AggregateState::open(store, bus.clone(), &config.state)
                .await?
                .with_count_source(counts),
        );
        let relationships = RelationshipEngine::new(nodes.clone(), state.clone());
        let inference = Arc::new(SimilarityInferenceEngine::new(
            nodes.clone(),
            documents.clone(),
            state.clone(),
            config.inference.clone(),
        ));

        Ok(Self {
            nodes,
            documents,
            bus,
            state,
            relationships,
            inference,
            worker: None,
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn inference(&self) -> &Arc<SimilarityInferenceEngine> {
        &self.inference
    }

    /// Spawns the background inference worker on the current runtime.
    /// Calling it again while a worker runs is a no-op.
    pub fn start_worker(&mut self) {
        if self.worker.is_some() {
            return;
        }
        let (queue, receiver) = ChannelJobQueue::bounded(self.config.inference.job_queue_capacity);
        let handle = tokio::spawn(Worker::new(receiver, self.inference.clone()).run());
        self.worker = Some(BackgroundWorker { queue, handle });
    }

    pub fn worker_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| worker.queue.is_open() && !worker.handle.is_finished())
            .unwrap_or(false)
    }

    /// Closes the queue and waits for queued jobs to drain. Returns how many
    /// jobs the worker processed.
    pub async fn stop_worker(&mut self) -> usize {
        let Some(BackgroundWorker { queue, handle }) = self.worker.take() else {
            return 0;
        };
        drop(queue);
        match handle.await {
            Ok(processed) => processed,
            Err(err) => {
                tracing::error!(error = %err, "inference worker terminated abnormally");
                0
            }
        }
    }

    pub async fn enqueue(&self, job: InferenceJob) -> Result<(), ServiceError> {
        let worker = self.worker.as_ref().ok_or(ServiceError::WorkerNotRunning)?;
        worker.queue.enqueue(job).await?;
        Ok(())
    }

    // Nodes

    pub async fn list_nodes(&self) -> Result<Vec<Node>, ServiceError> {
        Ok(self.nodes.get_all().await?)
    }

    pub async fn get_node(&self, id: &str) -> Result<Node, ServiceError> {
        Ok(self.nodes.get_by_id(id).await?)
    }

    pub async fn create_node(&self, payload: Attributes) -> Result<Node, ServiceError> {
        let node = self.nodes.create(payload).await?;
        self.refresh_counts().await;
        Ok(node)
    }

    pub async fn update_node(&self, id: &str, partial: Attributes) -> Result<Node, ServiceError> {
        Ok(self.nodes.update(id, partial).await?)
    }

    pub async fn delete_node(&self, id: &str) -> Result<Node, ServiceError> {
        let node = self.nodes.delete(id).await?;
        self.refresh_counts().await;
        Ok(node)
    }

    // Documents

    pub async fn list_documents(&self) -> Result<Vec<Document>, ServiceError> {
        Ok(self.documents.get_all().await?)
    }

    pub async fn get_document(&self, id: &str) -> Result<Document, ServiceError> {
        Ok(self.documents.get_by_id(id).await?)
    }

    pub async fn create_document(&self, payload: Attributes) -> Result<Document, ServiceError> {
        let document = self.documents.create(payload).await?;
        self.refresh_counts().await;
        self.schedule_analysis(&document).await;
        Ok(document)
    }

    pub async fn update_document(&self, id: &str, partial: Attributes) -> Result<Document, ServiceError> {
        let document = self.documents.update(id, partial).await?;
        self.schedule_analysis(&document).await;
        Ok(document)
    }

    pub async fn delete_document(&self, id: &str) -> Result<Document, ServiceError> {
        let document = self.documents.delete(id).await?;
        self.refresh_counts().await;
        Ok(document)
    }

    // The collection write already succeeded; a stale count is repaired by the
    // next reconcile.
    async fn refresh_counts(&self) {
        if let Err(err) = self.state.reconcile_counts().await {
            tracing::error!(error = %err, "failed to reconcile aggregate counts");
        }
    }

    // The document write already succeeded; a scheduling failure only delays inference.
    async fn schedule_analysis(&self, document: &Document) {
        if !self.state.get().await.settings.auto_sync || !self.worker_running() {
            return;
        }
        let job = InferenceJob::AnalyzeDocument {
            document_id: document.id.clone(),
        };
        if let Err(err) = self.enqueue(job).await {
            tracing::warn!(document_id = %document.id, error = %err, "failed to schedule document analysis");
        }
    }

    // Relationships

    pub async fn create_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: &str,
    ) -> Result<Node, ServiceError> {
        Ok(self.relationships.create(source_id, target_id, relation_type).await?)
    }

    pub async fn update_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        new_type: &str,
    ) -> Result<Node, ServiceError> {
        Ok(self.relationships.update(source_id, target_id, new_type).await?)
    }

    pub async fn delete_relationship(&self, source_id: &str, target_id: &str) -> Result<Node, ServiceError> {
        Ok(self.relationships.delete(source_id, target_id).await?)
    }

    pub async fn list_relationships(&self) -> Result<Vec<RelationshipRecord>, ServiceError> {
        Ok(self.relationships.list_all().await?)
    }

    pub async fn dangling_relationships(&self) -> Result<Vec<RelationshipRecord>, ServiceError> {
        Ok(self.relationships.dangling().await?)
    }

    pub async fn resolve_relationship_target(&self, source_id: &str, target_id: &str) -> Result<Node, ServiceError> {
        Ok(self.relationships.resolve_target(source_id, target_id).await?)
    }

    // Aggregate state

    pub async fn state(&self) -> StateSnapshot {
        self.state.get().await
    }

    pub async fn update_state(&self, key: &str, value: Value) -> Result<StateSnapshot, ServiceError> {
        Ok(self.state.update_key(key, value).await?)
    }

    pub async fn reset_state(&self) -> Result<StateSnapshot, ServiceError> {
        Ok(self.state.reset().await?)
    }

    pub async fn synchronize_state(&self) -> StateSnapshot {
        self.state.synchronize().await
    }

    pub async fn reconcile_counts(&self) -> Result<StateSnapshot, ServiceError> {
        Ok(self.state.reconcile_counts().await?)
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    pub fn subscribe_channel(&self, capacity: usize) -> (ListenerId, broadcast::Receiver<StateEvent>) {
        self.bus.subscribe_channel(capacity)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.bus.unsubscribe(id)
    }

    // Inference, run inline

    pub async fn analyze_node(&self, id: &str) -> Result<InferenceReport, ServiceError> {
        Ok(self.inference.analyze_node_id(id).await?)
    }

    pub async fn analyze_document(&self, id: &str) -> Result<InferenceReport, ServiceError> {
        Ok(self.inference.analyze_document(id).await?)
    }

    pub async fn analyze_all_documents(&self) -> Result<InferenceReport, ServiceError> {
        Ok(self.inference.analyze_all_documents().await?)
    }

    pub async fn apply_threshold_rules(&self) -> Result<InferenceReport, ServiceError> {
        Ok(self.inference.apply_threshold_rules().await?)
    }
}
