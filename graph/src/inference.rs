use serde::Serialize;
use state::{AggregateState, StateError};
use std::fmt;
use std::sync::Arc;
use storage::{DocumentRepository, NodeRepository, RepoError};
use tessera_core::config::InferenceConfig;
use tessera_core::error::{ErrorCode, TesseraError};
use tessera_core::model::Node;
use thiserror::Error;

const TYPE_WEIGHT: u8 = 4;
const CATEGORY_WEIGHT: u8 = 3;
const VALUE_WEIGHT: u8 = 3;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Repository(#[from] RepoError),
    #[error(transparent)]
    State(#[from] StateError),
}

impl TesseraError for InferenceError {
    fn error_code(&self) -> ErrorCode {
        match self {
            InferenceError::Repository(err) => err.error_code(),
            InferenceError::State(err) => err.error_code(),
        }
    }
}

/// Attribute similarity in exact tenths, `0..=10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SimilarityScore(u8);

impl SimilarityScore {
    pub fn tenths(self) -> u8 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 10.0
    }

    /// Strict comparison; a threshold is compared at hundredth precision.
    pub fn exceeds(self, threshold: f64) -> bool {
        let threshold_hundredths = (threshold * 100.0).round() as i64;
        i64::from(self.0) * 10 > threshold_hundredths
    }
}

impl fmt::Display for SimilarityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.as_f64())
    }
}

/// `+0.4` for equal `type`, `+0.3` for equal `category`, `+0.3` for an equal
/// `value` present on both. Absent `type`/`category` on both sides count as equal.
/// Only a missing or `null` value is absent; `0`, `""` and `false` are values.
pub fn score(a: &Node, b: &Node) -> SimilarityScore {
    let mut tenths = 0;
    if a.attribute("type") == b.attribute("type") {
        tenths += TYPE_WEIGHT;
    }
    if a.attribute("category") == b.attribute("category") {
        tenths += CATEGORY_WEIGHT;
    }
    match (present(a, "value"), present(b, "value")) {
        (Some(left), Some(right)) if left == right => tenths += VALUE_WEIGHT,
        _ => {}
    }
    SimilarityScore(tenths)
}

fn present<'a>(node: &'a Node, key: &str) -> Option<&'a serde_json::Value> {
    node.attribute(key).filter(|value| !value.is_null())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceReport {
    pub nodes_analyzed: usize,
    pub edges_created: usize,
    /// Pairs above the threshold that already had the edge.
    pub edges_skipped: usize,
    /// Pairs above the threshold refused by the relationship limit.
    pub edges_refused: usize,
    /// Document node references that did not resolve.
    pub unresolved_references: usize,
}

impl InferenceReport {
    fn absorb(&mut self, other: InferenceReport) {
        self.nodes_analyzed += other.nodes_analyzed;
        self.edges_created += other.edges_created;
        self.edges_skipped += other.edges_skipped;
        self.edges_refused += other.edges_refused;
        self.unresolved_references += other.unresolved_references;
    }
}

/// Creates directed similarity edges between nodes whose attributes match
/// closely enough. Re-running a scan never duplicates an edge.
pub struct SimilarityInferenceEngine {
    nodes: Arc<NodeRepository>,
    documents: Arc<DocumentRepository>,
    state: Arc<AggregateState>,
    config: InferenceConfig,
}

impl SimilarityInferenceEngine {
    pub fn new(
        nodes: Arc<NodeRepository>,
        documents: Arc<DocumentRepository>,
        state: Arc<AggregateState>,
        config: InferenceConfig,
    ) -> Self {
        Self {
            nodes,
            documents,
            state,
            config,
        }
    }

    pub fn score(&self, a: &Node, b: &Node) -> SimilarityScore {
        score(a, b)
    }

    pub async fn analyze_node(&self, node: &Node) -> Result<InferenceReport, InferenceError> {
        let report = self.scan(std::slice::from_ref(node)).await?;
        self.state.recompute_relationship_count().await?;
        Ok(report)
    }

    pub async fn analyze_node_id(&self, node_id: &str) -> Result<InferenceReport, InferenceError> {
        let node = self.nodes.get_by_id(node_id).await?;
        self.analyze_node(&node).await
    }

    pub async fn analyze_document(&self, document_id: &str) -> Result<InferenceReport, InferenceError> {
        let document = self.documents.get_by_id(document_id).await?;
        let (sources, unresolved) = self.resolve_refs(&document.node_refs()).await?;

        let mut report = self.scan(&sources).await?;
        report.unresolved_references = unresolved;
        self.state.recompute_relationship_count().await?;

        tracing::info!(
            document_id,
            edges_created = report.edges_created,
            "document analyzed"
        );
        Ok(report)
    }

    pub async fn analyze_all_documents(&self) -> Result<InferenceReport, InferenceError> {
        let documents = self.documents.get_all().await?;
        let mut report = InferenceReport::default();

        for document in &documents {
            let (sources, unresolved) = self.resolve_refs(&document.node_refs()).await?;
            let mut partial = self.scan(&sources).await?;
            partial.unresolved_references = unresolved;
            report.absorb(partial);
        }
        self.state.recompute_relationship_count().await?;

        tracing::info!(
            documents = documents.len(),
            edges_created = report.edges_created,
            "all documents analyzed"
        );
        Ok(report)
    }

    /// Rescans every node once `nodeCount` exceeds the configured threshold.
    /// Below it, nothing is analyzed.
    ///
    /// The stored counts are reconciled with the collections first. Without a
    /// count source the stored `nodeCount` is used as is.
    pub async fn apply_threshold_rules(&self) -> Result<InferenceReport, InferenceError> {
        let node_count = match self.state.reconcile_counts().await {
            Ok(snapshot) => snapshot.node_count,
            Err(StateError::NoCountSource) => self.state.get().await.node_count,
            Err(err) => return Err(err.into()),
        };
        if node_count <= self.config.rescan_node_count {
            tracing::debug!(node_count, "threshold rescan not triggered");
            return Ok(InferenceReport::default());
        }

        tracing::info!(node_count, "applying threshold rescan");
        let nodes = self.nodes.get_all().await?;
        let report = self.scan(&nodes).await?;
        self.state.recompute_relationship_count().await?;
        Ok(report)
    }

    async fn resolve_refs(&self, refs: &[String]) -> Result<(Vec<Node>, usize), InferenceError> {
        let mut nodes = Vec::with_capacity(refs.len());
        let mut unresolved = 0;
        for node_id in refs {
            match self.nodes.get_by_id(node_id).await {
                Ok(node) => nodes.push(node),
                Err(err) if err.is_not_found() => {
                    unresolved += 1;
                    tracing::warn!(node_id = %node_id, "document references a missing node");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok((nodes, unresolved))
    }

    async fn scan(&self, sources: &[Node]) -> Result<InferenceReport, InferenceError> {
        let candidates = self.nodes.get_all().await?;
        let relation_type = self.config.relationship_type.as_str();
        let mut report = InferenceReport::default();

        for source in sources {
            report.nodes_analyzed += 1;
            // Edges already on the stored source, not the caller's possibly stale copy.
            let current = candidates.iter().find(|node| node.id == source.id).unwrap_or(source);

            for other in candidates.iter().filter(|other| other.id != source.id) {
                if !score(source, other).exceeds(self.config.similarity_threshold) {
                    continue;
                }
                if current.has_edge(&other.id, relation_type) {
                    report.edges_skipped += 1;
                    continue;
                }

                let capacity = self.state.edge_capacity().await;
                match self
                    .nodes
                    .add_relationship_bounded(&source.id, &other.id, relation_type, capacity)
                    .await
                {
                    Ok(_) => {
                        report.edges_created += 1;
                        tracing::debug!(source_id = %source.id, target_id = %other.id, "similarity edge created");
                    }
                    Err(RepoError::DuplicateEdge { .. }) => report.edges_skipped += 1,
                    Err(err @ RepoError::EdgeLimitExceeded { .. }) => {
                        report.edges_refused += 1;
                        tracing::warn!(source_id = %source.id, target_id = %other.id, error = %err, "similarity edge refused");
                    }
                    Err(err) if err.is_not_found() => {
                        tracing::warn!(source_id = %source.id, target_id = %other.id, error = %err, "similarity candidate vanished");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(report)
    }
}
