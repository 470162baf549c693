use state::{AggregateState, StateError};
use std::collections::HashSet;
use std::sync::Arc;
use storage::{NodeRepository, RepoError};
use tessera_core::error::{ErrorCode, TesseraError};
use tessera_core::model::{Node, RelationshipRecord};
use thiserror::Error;

const RELATIONSHIP: &str = "relationship";

#[derive(Debug, Error)]
pub enum RelationshipError {
    #[error(transparent)]
    Repository(#[from] RepoError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("relationship {source_id} -> {target_id} points at a node that no longer exists")]
    DanglingReference { source_id: String, target_id: String },
}

impl TesseraError for RelationshipError {
    fn error_code(&self) -> ErrorCode {
        match self {
            RelationshipError::Repository(err) => err.error_code(),
            RelationshipError::State(err) => err.error_code(),
            RelationshipError::DanglingReference { .. } => ErrorCode::NotFound,
        }
    }
}

fn missing_edge(source_id: &str, target_id: &str) -> RepoError {
    RepoError::not_found(RELATIONSHIP, format!("{} -> {}", source_id, target_id))
}

/// Edge operations on top of the node repository. Creating or deleting an
/// edge refreshes the aggregate `relationshipCount`; renaming one does not.
pub struct RelationshipEngine {
    nodes: Arc<NodeRepository>,
    state: Arc<AggregateState>,
}

impl RelationshipEngine {
    pub fn new(nodes: Arc<NodeRepository>, state: Arc<AggregateState>) -> Self {
        Self { nodes, state }
    }

    pub async fn create(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: &str,
    ) -> Result<Node, RelationshipError> {
        let capacity = self.state.edge_capacity().await;
        let node = self
            .nodes
            .add_relationship_bounded(source_id, target_id, relation_type, capacity)
            .await?;

        tracing::debug!(source_id, target_id, relation_type, "relationship created");
        self.refresh_count().await;
        Ok(node)
    }

    /// Renames the first edge from `source_id` to `target_id`.
    pub async fn update(
        &self,
        source_id: &str,
        target_id: &str,
        new_type: &str,
    ) -> Result<Node, RelationshipError> {
        let (node, ()) = self
            .nodes
            .modify_relationships(source_id, |edges, now| {
                let index = edges
                    .iter()
                    .position(|edge| edge.target_node_id == target_id)
                    .ok_or_else(|| missing_edge(source_id, target_id))?;

                let clash = edges.iter().enumerate().any(|(i, edge)| {
                    i != index && edge.target_node_id == target_id && edge.relation_type == new_type
                });
                if clash {
                    return Err(RepoError::DuplicateEdge {
                        source_id: source_id.to_string(),
                        target_id: target_id.to_string(),
                        relation_type: new_type.to_string(),
                    });
                }

                let edge = &mut edges[index];
                edge.relation_type = new_type.to_string();
                edge.updated_at = tessera_core::clock::next_timestamp(edge.updated_at, now);
                Ok(())
            })
            .await?;

        tracing::debug!(source_id, target_id, new_type, "relationship renamed");
        Ok(node)
    }

    /// Removes every edge from `source_id` to `target_id`, whatever its type.
    pub async fn delete(&self, source_id: &str, target_id: &str) -> Result<Node, RelationshipError> {
        let (node, removed) = self
            .nodes
            .modify_relationships(source_id, |edges, _| {
                let before = edges.len();
                edges.retain(|edge| edge.target_node_id != target_id);
                match before - edges.len() {
                    0 => Err(missing_edge(source_id, target_id)),
                    removed => Ok(removed),
                }
            })
            .await?;

        tracing::debug!(source_id, target_id, removed, "relationships deleted");
        self.refresh_count().await;
        Ok(node)
    }

    pub async fn list_all(&self) -> Result<Vec<RelationshipRecord>, RelationshipError> {
        let nodes = self.nodes.get_all().await?;
        Ok(nodes.iter().flat_map(Node::relationship_records).collect())
    }

    /// Edges whose target node has been deleted.
    pub async fn dangling(&self) -> Result<Vec<RelationshipRecord>, RelationshipError> {
        let nodes = self.nodes.get_all().await?;
        let live: HashSet<&str> = nodes.iter().map(|node| node.id.as_str()).collect();
        Ok(nodes
            .iter()
            .flat_map(Node::relationship_records)
            .filter(|record| !live.contains(record.target_node_id.as_str()))
            .collect())
    }

    pub async fn resolve_target(&self, source_id: &str, target_id: &str) -> Result<Node, RelationshipError> {
        let source = self.nodes.get_by_id(source_id).await?;
        if source.edges_to(target_id).next().is_none() {
            return Err(missing_edge(source_id, target_id).into());
        }

        match self.nodes.get_by_id(target_id).await {
            Ok(target) => Ok(target),
            Err(err) if err.is_not_found() => Err(RelationshipError::DanglingReference {
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    // The edge change is already persisted; a stale count is repaired by the
    // next recompute or by `reconcile_counts`.
    async fn refresh_count(&self) {
        if let Err(err) = self.state.recompute_relationship_count().await {
            tracing::error!(error = %err, "failed to recompute relationshipCount");
        }
    }
}
