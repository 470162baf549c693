use serde_json::{json, Value};
use std::sync::Arc;
use storage::{DocumentRepository, InMemoryEncryptedStore};
use tessera_core::model::Attributes;

fn attrs(value: Value) -> Attributes {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[tokio::test]
async fn document_crud_lifecycle() {
    let repo = DocumentRepository::new(Arc::new(InMemoryEncryptedStore::default()));

    let doc = repo
        .create(attrs(json!({"title": "Q3 report", "nodes": ["node_1"]})))
        .await
        .unwrap();
    assert!(doc.id.starts_with("doc_"));
    assert_eq!(doc.node_refs(), vec!["node_1".to_string()]);
    assert_eq!(repo.get_by_id(&doc.id).await.unwrap(), doc);

    let updated = repo
        .update(&doc.id, attrs(json!({"title": "Q4 report", "createdAt": "nope"})))
        .await
        .unwrap();
    assert_eq!(updated.attributes.get("title"), Some(&json!("Q4 report")));
    assert_eq!(updated.created_at, doc.created_at);
    assert!(updated.updated_at > doc.updated_at);
    assert_eq!(repo.count().await.unwrap(), 1);

    repo.delete(&doc.id).await.unwrap();
    assert!(repo.get_by_id(&doc.id).await.unwrap_err().is_not_found());
    assert!(repo.delete(&doc.id).await.unwrap_err().is_not_found());
    assert!(repo.get_all().await.unwrap().is_empty());
}
