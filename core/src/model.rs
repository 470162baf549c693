use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Freeform user payload carried by nodes and documents.
pub type Attributes = Map<String, Value>;

/// Keys managed by the repositories; never taken from caller payloads.
pub const RESERVED_NODE_KEYS: &[&str] = &["id", "relationships", "createdAt", "updatedAt"];
pub const RESERVED_DOCUMENT_KEYS: &[&str] = &["id", "createdAt", "updatedAt"];

/// Attribute holding a document's node references.
pub const DOCUMENT_NODES_KEY: &str = "nodes";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(flatten)]
    pub attributes: Attributes,
    #[serde(default)]
    pub relationships: Vec<Edge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outgoing relationship embedded in its source node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub target_node_id: String,
    #[serde(rename = "type")]
    pub relation_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    #[serde(flatten)]
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Flattened view of one edge, as returned by relationship listings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRecord {
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(rename = "type")]
    pub relation_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(id: impl Into<String>, attributes: Attributes, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            attributes: strip_reserved(attributes, RESERVED_NODE_KEYS),
            relationships: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn has_edge(&self, target_node_id: &str, relation_type: &str) -> bool {
        self.relationships
            .iter()
            .any(|edge| edge.target_node_id == target_node_id && edge.relation_type == relation_type)
    }

    pub fn edges_to<'a>(&'a self, target_node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.relationships
            .iter()
            .filter(move |edge| edge.target_node_id == target_node_id)
    }

    pub fn relationship_records(&self) -> impl Iterator<Item = RelationshipRecord> + '_ {
        self.relationships.iter().map(|edge| RelationshipRecord {
            source_node_id: self.id.clone(),
            target_node_id: edge.target_node_id.clone(),
            relation_type: edge.relation_type.clone(),
            created_at: edge.created_at,
            updated_at: edge.updated_at,
        })
    }
}

impl Edge {
    pub fn new(
        target_node_id: impl Into<String>,
        relation_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            target_node_id: target_node_id.into(),
            relation_type: relation_type.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Document {
    pub fn new(id: impl Into<String>, attributes: Attributes, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            attributes: strip_reserved(attributes, RESERVED_DOCUMENT_KEYS),
            created_at: now,
            updated_at: now,
        }
    }

    /// Node ids referenced under `nodes`. Entries may be plain id strings or
    /// objects carrying an `id`; anything else is ignored.
    pub fn node_refs(&self) -> Vec<String> {
        let Some(Value::Array(entries)) = self.attributes.get(DOCUMENT_NODES_KEY) else {
            return Vec::new();
        };

        entries
            .iter()
            .filter_map(|entry| match entry {
                Value::String(id) => Some(id.clone()),
                Value::Object(fields) => fields.get("id").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect()
    }
}

/// Drops repository-managed keys from a caller payload.
pub fn strip_reserved(mut attributes: Attributes, reserved: &[&str]) -> Attributes {
    for key in reserved {
        attributes.remove(*key);
    }
    attributes
}

/// Shallow merge: every key present in `patch` replaces the existing value wholesale.
pub fn merge_attributes(target: &mut Attributes, patch: Attributes, reserved: &[&str]) {
    for (key, value) in strip_reserved(patch, reserved) {
        target.insert(key, value);
    }
}
