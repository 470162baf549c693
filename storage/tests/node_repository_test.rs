use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use storage::store::{EncryptedStore, FileEncryptedStore};
use storage::{EdgeCapacity, InMemoryEncryptedStore, NodeRepository, RepoError};
use tempfile::tempdir;
use tessera_core::model::Attributes;

fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn repo() -> NodeRepository {
    NodeRepository::new(Arc::new(InMemoryEncryptedStore::default()))
}

#[tokio::test]
async fn create_assigns_id_timestamps_and_empty_relationships() {
    let repo = repo();
    let node = repo.create(attrs(json!({"type": "person", "name": "Ada"}))).await.unwrap();

    assert!(node.id.starts_with("node_"));
    assert!(node.relationships.is_empty());
    assert_eq!(node.created_at, node.updated_at);
    assert_eq!(node.attribute("name"), Some(&json!("Ada")));
    assert_eq!(repo.get_all().await.unwrap(), vec![node]);
}

#[tokio::test]
async fn get_by_id_is_idempotent() {
    let repo = repo();
    let node = repo.create(attrs(json!({"type": "x"}))).await.unwrap();

    let first = repo.get_by_id(&node.id).await.unwrap();
    let second = repo.get_by_id(&node.id).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn created_ids_are_pairwise_distinct() {
    let repo = repo();
    let mut ids = HashSet::new();
    for _ in 0..50 {
        ids.insert(repo.create(Attributes::new()).await.unwrap().id);
    }
    assert_eq!(ids.len(), 50);
}

#[tokio::test]
async fn update_is_a_shallow_merge_with_fresh_updated_at() {
    let repo = repo();
    let node = repo
        .create(attrs(json!({"type": "x", "meta": {"a": 1, "b": 2}, "keep": true})))
        .await
        .unwrap();

    let updated = repo
        .update(&node.id, attrs(json!({"meta": {"a": 5}, "value": 3, "id": "forged"})))
        .await
        .unwrap();

    let fetched = repo.get_by_id(&node.id).await.unwrap();
    assert_eq!(fetched, updated);
    assert_eq!(fetched.id, node.id);
    assert_eq!(
        Value::Object(fetched.attributes.clone()),
        json!({"type": "x", "meta": {"a": 5}, "keep": true, "value": 3})
    );
    assert!(fetched.updated_at > node.updated_at);
    assert_eq!(fetched.created_at, node.created_at);
}

#[tokio::test]
async fn missing_ids_report_not_found() {
    let repo = repo();
    assert!(repo.get_by_id("node_missing").await.unwrap_err().is_not_found());
    assert!(repo
        .update("node_missing", Attributes::new())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(repo.delete("node_missing").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn delete_then_get_is_not_found() {
    let repo = repo();
    let node = repo.create(attrs(json!({"type": "x"}))).await.unwrap();

    let removed = repo.delete(&node.id).await.unwrap();
    assert_eq!(removed.id, node.id);
    assert!(repo.get_by_id(&node.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn add_relationship_appends_to_source_only() {
    let repo = repo();
    let a = repo.create(Attributes::new()).await.unwrap();
    let b = repo.create(Attributes::new()).await.unwrap();

    let source = repo.add_relationship(&a.id, &b.id, "knows").await.unwrap();
    assert_eq!(source.relationships.len(), 1);
    assert_eq!(source.relationships[0].target_node_id, b.id);
    assert_eq!(source.relationships[0].relation_type, "knows");
    assert!(source.updated_at > a.updated_at);

    assert!(repo.get_by_id(&b.id).await.unwrap().relationships.is_empty());
}

#[tokio::test]
async fn add_relationship_requires_both_endpoints() {
    let repo = repo();
    let a = repo.create(Attributes::new()).await.unwrap();

    let err = repo.add_relationship(&a.id, "node_gone", "knows").await.unwrap_err();
    assert!(err.is_not_found());
    let err = repo.add_relationship("node_gone", &a.id, "knows").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(repo.get_by_id(&a.id).await.unwrap().relationships.is_empty());
}

#[tokio::test]
async fn duplicate_edges_are_rejected() {
    let repo = repo();
    let a = repo.create(Attributes::new()).await.unwrap();
    let b = repo.create(Attributes::new()).await.unwrap();

    repo.add_relationship(&a.id, &b.id, "knows").await.unwrap();
    let err = repo.add_relationship(&a.id, &b.id, "knows").await.unwrap_err();
    assert!(matches!(err, RepoError::DuplicateEdge { .. }));

    // A different type to the same target is a different edge.
    repo.add_relationship(&a.id, &b.id, "likes").await.unwrap();
    assert_eq!(repo.get_by_id(&a.id).await.unwrap().relationships.len(), 2);
}

#[tokio::test]
async fn edge_capacity_bounds_are_enforced() {
    let repo = repo();
    let a = repo.create(Attributes::new()).await.unwrap();
    let b = repo.create(Attributes::new()).await.unwrap();

    repo.add_relationship_bounded(&a.id, &b.id, "r1", EdgeCapacity::PerSource(1))
        .await
        .unwrap();
    let err = repo
        .add_relationship_bounded(&a.id, &b.id, "r2", EdgeCapacity::PerSource(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::EdgeLimitExceeded { limit: 1, .. }));

    // b has no edges yet, but the graph already holds one.
    let err = repo
        .add_relationship_bounded(&b.id, &a.id, "r1", EdgeCapacity::Total(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::EdgeLimitExceeded { .. }));
}

#[tokio::test]
async fn delete_does_not_cascade_to_inbound_edges() {
    let repo = repo();
    let a = repo.create(Attributes::new()).await.unwrap();
    let b = repo.create(Attributes::new()).await.unwrap();
    repo.add_relationship(&a.id, &b.id, "knows").await.unwrap();

    repo.delete(&b.id).await.unwrap();

    let a = repo.get_by_id(&a.id).await.unwrap();
    assert_eq!(a.relationships.len(), 1);
    assert_eq!(a.relationships[0].target_node_id, b.id);
}

#[tokio::test]
async fn nodes_survive_reopening_the_file_store() {
    let dir = tempdir().unwrap();
    let id = {
        let store = Arc::new(FileEncryptedStore::open(dir.path()).await.unwrap());
        let repo = NodeRepository::new(store);
        repo.create(attrs(json!({"type": "x"}))).await.unwrap().id
    };

    let store = Arc::new(FileEncryptedStore::open(dir.path()).await.unwrap()) as Arc<dyn EncryptedStore>;
    let repo = NodeRepository::new(store);
    assert_eq!(repo.get_by_id(&id).await.unwrap().attribute("type"), Some(&json!("x")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_are_all_persisted() {
    let repo = Arc::new(repo());

    let mut tasks = Vec::new();
    for n in 0..24 {
        let repo = repo.clone();
        tasks.push(tokio::spawn(async move {
            repo.create(attrs(json!({"n": n}))).await.unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(repo.count().await.unwrap(), 24);
}
