use crate::collection::{Collection, RepoError};
use crate::store::{EncryptedStore, NODES_KEY};
use std::sync::Arc;
use tessera_core::clock::{next_timestamp, Clock, SystemClock};
use tessera_core::ids::{IdGenerator, UuidGenerator, NODE_ID_PREFIX};
use tessera_core::model::{merge_attributes, Attributes, Edge, Node, RESERVED_NODE_KEYS};

const COLLECTION: &str = "node";

/// Bound applied when a new edge is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeCapacity {
    #[default]
    Unbounded,
    /// At most this many outgoing edges on the source node.
    PerSource(u64),
    /// At most this many edges across the whole graph.
    Total(u64),
}

impl EdgeCapacity {
    fn check(&self, nodes: &[Node], source: &Node) -> Result<(), RepoError> {
        match *self {
            EdgeCapacity::Unbounded => Ok(()),
            EdgeCapacity::PerSource(limit) => {
                if source.relationships.len() as u64 >= limit {
                    return Err(RepoError::EdgeLimitExceeded {
                        scope: "per node",
                        limit,
                    });
                }
                Ok(())
            }
            EdgeCapacity::Total(limit) => {
                let total: usize = nodes.iter().map(|node| node.relationships.len()).sum();
                if total as u64 >= limit {
                    return Err(RepoError::EdgeLimitExceeded {
                        scope: "graph-wide",
                        limit,
                    });
                }
                Ok(())
            }
        }
    }
}

pub struct NodeRepository {
    nodes: Collection<Node>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl NodeRepository {
    pub fn new(store: Arc<dyn EncryptedStore>) -> Self {
        Self::with_components(store, Arc::new(SystemClock), Arc::new(UuidGenerator))
    }

    pub fn with_components(
        store: Arc<dyn EncryptedStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            nodes: Collection::new(store, NODES_KEY),
            clock,
            ids,
        }
    }

    pub async fn get_all(&self) -> Result<Vec<Node>, RepoError> {
        self.nodes.load().await
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Node, RepoError> {
        self.nodes
            .load()
            .await?
            .into_iter()
            .find(|node| node.id == id)
            .ok_or_else(|| RepoError::not_found(COLLECTION, id))
    }

    pub async fn count(&self) -> Result<u64, RepoError> {
        Ok(self.nodes.load().await?.len() as u64)
    }

    pub async fn create(&self, payload: Attributes) -> Result<Node, RepoError> {
        let node = Node::new(
            self.ids.generate(NODE_ID_PREFIX),
            payload,
            self.clock.now(),
        );

        let created = node.clone();
        self.nodes
            .mutate(move |nodes| {
                nodes.push(node);
                Ok(())
            })
            .await?;

        tracing::debug!(node_id = %created.id, "node created");
        Ok(created)
    }

    /// Shallow-merges `partial` into the node. Reserved keys in `partial` are ignored.
    pub async fn update(&self, id: &str, partial: Attributes) -> Result<Node, RepoError> {
        let now = self.clock.now();
        self.nodes
            .mutate(|nodes| {
                let node = find_mut(nodes, id)?;
                merge_attributes(&mut node.attributes, partial, RESERVED_NODE_KEYS);
                node.updated_at = next_timestamp(node.updated_at, now);
                Ok(node.clone())
            })
            .await
    }

    /// Removes the node. Edges on other nodes that point at it are left alone.
    pub async fn delete(&self, id: &str) -> Result<Node, RepoError> {
        let removed = self
            .nodes
            .mutate(|nodes| {
                let index = nodes
                    .iter()
                    .position(|node| node.id == id)
                    .ok_or_else(|| RepoError::not_found(COLLECTION, id))?;
                Ok(nodes.remove(index))
            })
            .await?;

        tracing::debug!(node_id = %id, "node deleted");
        Ok(removed)
    }

    pub async fn add_relationship(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: &str,
    ) -> Result<Node, RepoError> {
        self.add_relationship_bounded(source_id, target_id, relation_type, EdgeCapacity::Unbounded)
            .await
    }

    /// Appends `source -[relation_type]-> target`. Both endpoints must exist,
    /// the `(target, relation_type)` pair must be new on the source, and
    /// `capacity` must leave room for one more edge.
    pub async fn add_relationship_bounded(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: &str,
        capacity: EdgeCapacity,
    ) -> Result<Node, RepoError> {
        let now = self.clock.now();
        self.nodes
            .mutate(|nodes| {
                if !nodes.iter().any(|node| node.id == target_id) {
                    return Err(RepoError::not_found(COLLECTION, target_id));
                }

                let source_index = nodes
                    .iter()
                    .position(|node| node.id == source_id)
                    .ok_or_else(|| RepoError::not_found(COLLECTION, source_id))?;

                let source = &nodes[source_index];
                if source.has_edge(target_id, relation_type) {
                    return Err(RepoError::DuplicateEdge {
                        source_id: source_id.to_string(),
                        target_id: target_id.to_string(),
                        relation_type: relation_type.to_string(),
                    });
                }
                capacity.check(nodes.as_slice(), source)?;

                let source = &mut nodes[source_index];
                source
                    .relationships
                    .push(Edge::new(target_id, relation_type, now));
                source.updated_at = next_timestamp(source.updated_at, now);
                Ok(source.clone())
            })
            .await
    }

    /// Runs `edit` on the node's edge list under the collection's writer lock.
    /// `updated_at` is refreshed only when `edit` succeeds.
    pub async fn modify_relationships<R, F>(&self, id: &str, edit: F) -> Result<(Node, R), RepoError>
    where
        F: FnOnce(&mut Vec<Edge>, chrono::DateTime<chrono::Utc>) -> Result<R, RepoError>,
    {
        let now = self.clock.now();
        self.nodes
            .mutate(|nodes| {
                let node = find_mut(nodes, id)?;
                let out = edit(&mut node.relationships, now)?;
                node.updated_at = next_timestamp(node.updated_at, now);
                Ok((node.clone(), out))
            })
            .await
    }
}

fn find_mut<'a>(nodes: &'a mut [Node], id: &str) -> Result<&'a mut Node, RepoError> {
    nodes
        .iter_mut()
        .find(|node| node.id == id)
        .ok_or_else(|| RepoError::not_found(COLLECTION, id))
}
