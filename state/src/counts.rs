use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use storage::{DocumentRepository, NodeRepository, RepoError};

/// Counts derived from the live collections rather than the stored aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedCounts {
    pub node_count: u64,
    pub document_count: u64,
    pub relationship_count: u64,
}

/// Where the aggregate state pulls its counts from.
#[async_trait]
pub trait CountSource: Send + Sync {
    async fn relationship_count(&self) -> Result<u64, RepoError>;

    async fn derived_counts(&self) -> Result<DerivedCounts, RepoError>;
}

pub struct RepositoryCounts {
    nodes: Arc<NodeRepository>,
    documents: Arc<DocumentRepository>,
}

impl RepositoryCounts {
    pub fn new(nodes: Arc<NodeRepository>, documents: Arc<DocumentRepository>) -> Self {
        Self { nodes, documents }
    }
}

#[async_trait]
impl CountSource for RepositoryCounts {
    async fn relationship_count(&self) -> Result<u64, RepoError> {
        let nodes = self.nodes.get_all().await?;
        Ok(nodes.iter().map(|node| node.relationships.len() as u64).sum())
    }

    async fn derived_counts(&self) -> Result<DerivedCounts, RepoError> {
        // One node read covers both the node and the edge count.
        let nodes = self.nodes.get_all().await?;
        Ok(DerivedCounts {
            node_count: nodes.len() as u64,
            document_count: self.documents.count().await?,
            relationship_count: nodes.iter().map(|node| node.relationships.len() as u64).sum(),
        })
    }
}
