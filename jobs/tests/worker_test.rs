use graph::SimilarityInferenceEngine;
use jobs::{ChannelJobQueue, InferenceJob, JobQueue, Worker};
use serde_json::{json, Value};
use state::{AggregateState, RepositoryCounts, StateChangeBus};
use std::sync::Arc;
use storage::store::EncryptedStore;
use storage::{DocumentRepository, InMemoryEncryptedStore, NodeRepository};
use tessera_core::config::{InferenceConfig, StateConfig};
use tessera_core::model::Attributes;

fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

async fn components() -> (Arc<NodeRepository>, Arc<DocumentRepository>, Arc<AggregateState>, Arc<SimilarityInferenceEngine>) {
    let store: Arc<dyn EncryptedStore> = Arc::new(InMemoryEncryptedStore::default());
    let nodes = Arc::new(NodeRepository::new(store.clone()));
    let documents = Arc::new(DocumentRepository::new(store.clone()));
    let state = Arc::new(
        AggregateState::open(store, Arc::new(StateChangeBus::new()), &StateConfig::default())
            .await
            .unwrap()
            .with_count_source(Arc::new(RepositoryCounts::new(nodes.clone(), documents.clone()))),
    );
    let inference = Arc::new(SimilarityInferenceEngine::new(
        nodes.clone(),
        documents.clone(),
        state.clone(),
        InferenceConfig::default(),
    ));
    (nodes, documents, state, inference)
}

#[tokio::test]
async fn worker_runs_jobs_and_survives_failures() {
    let (nodes, documents, state, inference) = components().await;
    let a = nodes
        .create(attrs(json!({"type": "x", "category": "c", "value": 1})))
        .await
        .unwrap();
    let b = nodes
        .create(attrs(json!({"type": "x", "category": "c", "value": 1})))
        .await
        .unwrap();
    let document = documents
        .create(attrs(json!({"nodes": [b.id.clone()]})))
        .await
        .unwrap();

    let (queue, receiver) = ChannelJobQueue::bounded(8);
    let handle = tokio::spawn(Worker::new(receiver, inference).run());

    queue
        .enqueue(InferenceJob::AnalyzeNode {
            node_id: "node_missing".to_string(),
        })
        .await
        .unwrap();
    queue
        .enqueue(InferenceJob::AnalyzeNode { node_id: a.id.clone() })
        .await
        .unwrap();
    queue
        .enqueue(InferenceJob::AnalyzeDocument {
            document_id: document.id.clone(),
        })
        .await
        .unwrap();
    queue.enqueue(InferenceJob::ApplyThresholdRules).await.unwrap();
    drop(queue);

    let processed = handle.await.unwrap();
    assert_eq!(processed, 4);

    assert!(nodes.get_by_id(&a.id).await.unwrap().has_edge(&b.id, "similarity"));
    assert!(nodes.get_by_id(&b.id).await.unwrap().has_edge(&a.id, "similarity"));
    assert_eq!(state.get().await.relationship_count, 2);
}
