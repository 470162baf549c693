use graph::{InferenceReport, RelationshipEngine, SimilarityInferenceEngine};
use serde_json::{json, Value};
use state::{AggregateState, RepositoryCounts, StateChangeBus};
use std::sync::Arc;
use storage::store::EncryptedStore;
use storage::{DocumentRepository, InMemoryEncryptedStore, NodeRepository};
use tessera_core::config::{InferenceConfig, StateConfig};
use tessera_core::model::{Attributes, Node};

struct Harness {
    nodes: Arc<NodeRepository>,
    documents: Arc<DocumentRepository>,
    state: Arc<AggregateState>,
    relationships: RelationshipEngine,
    inference: SimilarityInferenceEngine,
}

async fn harness() -> Harness {
    let store: Arc<dyn EncryptedStore> = Arc::new(InMemoryEncryptedStore::default());
    let nodes = Arc::new(NodeRepository::new(store.clone()));
    let documents = Arc::new(DocumentRepository::new(store.clone()));
    let state = Arc::new(
        AggregateState::open(store, Arc::new(StateChangeBus::new()), &StateConfig::default())
            .await
            .unwrap()
            .with_count_source(Arc::new(RepositoryCounts::new(nodes.clone(), documents.clone()))),
    );
    Harness {
        relationships: RelationshipEngine::new(nodes.clone(), state.clone()),
        inference: SimilarityInferenceEngine::new(
            nodes.clone(),
            documents.clone(),
            state.clone(),
            InferenceConfig::default(),
        ),
        nodes,
        documents,
        state,
    }
}

fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

async fn create(h: &Harness, value: Value) -> Node {
    h.nodes.create(attrs(value)).await.unwrap()
}

#[tokio::test]
async fn identical_nodes_get_one_directed_edge() {
    let h = harness().await;
    let a = create(&h, json!({"type": "x", "category": "c1", "value": 42})).await;
    let b = create(&h, json!({"type": "x", "category": "c1", "value": 42})).await;
    assert_eq!(h.inference.score(&a, &b).as_f64(), 1.0);

    let report = h.inference.analyze_node(&a).await.unwrap();

    assert_eq!(report.edges_created, 1);
    let edges = h.relationships.list_all().await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].source_node_id, a.id);
    assert_eq!(edges[0].target_node_id, b.id);
    assert_eq!(edges[0].relation_type, "similarity");
    assert!(h.nodes.get_by_id(&b.id).await.unwrap().relationships.is_empty());
    assert_eq!(h.state.get().await.relationship_count, 1);
}

#[tokio::test]
async fn rerunning_analysis_creates_no_duplicates() {
    let h = harness().await;
    let a = create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;
    create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;

    h.inference.analyze_node(&a).await.unwrap();
    // Deliberately pass the stale copy without edges.
    let second = h.inference.analyze_node(&a).await.unwrap();

    assert_eq!(
        second,
        InferenceReport {
            nodes_analyzed: 1,
            edges_created: 0,
            edges_skipped: 1,
            edges_refused: 0,
            unresolved_references: 0,
        }
    );
    assert_eq!(h.relationships.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn end_to_end_threshold_crossing() {
    let h = harness().await;
    let a = create(&h, json!({"type": "x", "category": "c1"})).await;
    let b = create(&h, json!({"type": "x", "category": "c1"})).await;

    assert_eq!(h.inference.score(&a, &b).tenths(), 7);
    let report = h.inference.analyze_node(&a).await.unwrap();
    assert_eq!(report.edges_created, 0);
    assert!(h.relationships.list_all().await.unwrap().is_empty());

    let a = h.nodes.update(&a.id, attrs(json!({"value": "v"}))).await.unwrap();
    let b = h.nodes.update(&b.id, attrs(json!({"value": "v"}))).await.unwrap();
    assert_eq!(h.inference.score(&a, &b).tenths(), 10);

    let report = h.inference.analyze_node(&a).await.unwrap();
    assert_eq!(report.edges_created, 1);
    let edges = h.relationships.list_all().await.unwrap();
    assert_eq!((edges[0].source_node_id.as_str(), edges[0].target_node_id.as_str()), (a.id.as_str(), b.id.as_str()));
}

#[tokio::test]
async fn node_is_never_linked_to_itself() {
    let h = harness().await;
    let a = create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;

    let report = h.inference.analyze_node(&a).await.unwrap();

    assert_eq!(report.edges_created, 0);
    assert!(h.relationships.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn analyze_document_resolves_id_and_object_references() {
    let h = harness().await;
    let a = create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;
    let b = create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;
    let document = h
        .documents
        .create(attrs(json!({
            "title": "notes",
            "nodes": [a.id.clone(), {"id": b.id.clone()}, "node_missing"]
        })))
        .await
        .unwrap();

    let report = h.inference.analyze_document(&document.id).await.unwrap();

    assert_eq!(report.nodes_analyzed, 2);
    assert_eq!(report.edges_created, 2);
    assert_eq!(report.unresolved_references, 1);
    assert_eq!(h.state.get().await.relationship_count, 2);
}

#[tokio::test]
async fn analyze_all_documents_covers_every_document() {
    let h = harness().await;
    let a = create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;
    let b = create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;
    let c = create(&h, json!({"type": "y", "category": "c2", "value": 2})).await;
    let d = create(&h, json!({"type": "y", "category": "c2", "value": 2})).await;
    h.documents
        .create(attrs(json!({"nodes": [a.id.clone()]})))
        .await
        .unwrap();
    h.documents
        .create(attrs(json!({"nodes": [c.id.clone()]})))
        .await
        .unwrap();
    h.documents.create(attrs(json!({"title": "no nodes"}))).await.unwrap();

    let report = h.inference.analyze_all_documents().await.unwrap();

    assert_eq!(report.nodes_analyzed, 2);
    assert_eq!(report.edges_created, 2);
    let pairs: Vec<(String, String)> = h
        .relationships
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|record| (record.source_node_id, record.target_node_id))
        .collect();
    assert_eq!(pairs, vec![(a.id, b.id), (c.id, d.id)]);
}

#[tokio::test]
async fn threshold_rules_only_fire_above_rescan_count() {
    let h = harness().await;
    let a = create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;
    let b = create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;
    // Fillers share nothing with each other or with the pair.
    for i in 0..48 {
        create(&h, json!({"type": format!("t{i}"), "category": format!("k{i}")})).await;
    }

    let report = h.inference.apply_threshold_rules().await.unwrap();
    assert_eq!(report, InferenceReport::default());
    assert_eq!(h.state.get().await.node_count, 50);
    assert!(h.relationships.list_all().await.unwrap().is_empty());

    create(&h, json!({"type": "t48", "category": "k48"})).await;
    let report = h.inference.apply_threshold_rules().await.unwrap();
    assert_eq!(report.nodes_analyzed, 51);
    assert_eq!(report.edges_created, 2);
    assert_eq!(h.state.get().await.node_count, 51);

    let a = h.nodes.get_by_id(&a.id).await.unwrap();
    let b = h.nodes.get_by_id(&b.id).await.unwrap();
    assert!(a.has_edge(&b.id, "similarity"));
    assert!(b.has_edge(&a.id, "similarity"));
}

#[tokio::test]
async fn threshold_rules_use_live_node_count_over_stale_stored_count() {
    let h = harness().await;
    create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;
    create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;
    h.state.update_key("nodeCount", json!(80)).await.unwrap();

    let report = h.inference.apply_threshold_rules().await.unwrap();

    assert_eq!(report, InferenceReport::default());
    assert_eq!(h.state.get().await.node_count, 2);
}

#[tokio::test]
async fn threshold_rules_keep_working_past_max_nodes_per_document() {
    let h = harness().await;
    h.state
        .update_key("rules", json!({"maxNodesPerDocument": 10, "maxRelationshipsPerNode": 10}))
        .await
        .unwrap();
    for i in 0..51 {
        create(&h, json!({"type": format!("t{i}"), "category": format!("k{i}")})).await;
    }

    let report = h.inference.apply_threshold_rules().await.unwrap();

    assert_eq!(report.nodes_analyzed, 51);
    assert_eq!(report.edges_created, 0);
    assert_eq!(h.state.get().await.node_count, 51);
}

#[tokio::test]
async fn relationship_limit_refuses_extra_similarity_edges() {
    let h = harness().await;
    h.state
        .update_key("rules", json!({"maxNodesPerDocument": 100, "maxRelationshipsPerNode": 1}))
        .await
        .unwrap();
    let a = create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;
    create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;
    create(&h, json!({"type": "x", "category": "c1", "value": 1})).await;

    let report = h.inference.analyze_node(&a).await.unwrap();

    assert_eq!(report.edges_created, 1);
    assert_eq!(report.edges_refused, 1);
    assert_eq!(h.state.get().await.relationship_count, 1);
}

#[tokio::test]
async fn analyze_missing_document_is_not_found() {
    let h = harness().await;
    let err = h.inference.analyze_document("doc_missing").await.unwrap_err();
    assert_eq!(
        tessera_core::error::TesseraError::error_code(&err),
        tessera_core::error::ErrorCode::NotFound
    );
}
