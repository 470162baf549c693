use crate::bus::{StateChangeBus, RESET_EVENT, SYNCHRONIZE_EVENT};
use crate::counts::{CountSource, DerivedCounts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use storage::store::STATE_KEY;
use storage::{EdgeCapacity, EncryptedStore, RepoError, StoreError};
use tessera_core::clock::{next_timestamp, Clock, SystemClock};
use tessera_core::config::{RelationshipLimitPolicy, StateConfig};
use tessera_core::error::{ErrorCode, TesseraError};
use thiserror::Error;
use tokio::sync::RwLock;

pub const DEFAULT_MAX_NODES_PER_DOCUMENT: u64 = 100;
pub const DEFAULT_MAX_RELATIONSHIPS_PER_NODE: u64 = 10;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("invalid state key: {0}")]
    InvalidKey(String),
    #[error("state key {0} is read-only")]
    ReadOnlyKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("rule violation: {0}")]
    RuleViolation(String),
    #[error("state storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no count source attached")]
    NoCountSource,
    #[error("count source failed: {0}")]
    CountSource(#[from] RepoError),
}

impl TesseraError for StateError {
    fn error_code(&self) -> ErrorCode {
        match self {
            StateError::InvalidKey(_)
            | StateError::ReadOnlyKey(_)
            | StateError::InvalidValue { .. }
            | StateError::RuleViolation(_) => ErrorCode::InvalidArgument,
            StateError::CountSource(err) => err.error_code(),
            StateError::Storage(_) | StateError::Serialization(_) | StateError::NoCountSource => {
                ErrorCode::Internal
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    pub encryption: bool,
    pub auto_sync: bool,
    pub logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            encryption: true,
            auto_sync: true,
            logging: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rules {
    pub max_nodes_per_document: u64,
    pub max_relationships_per_node: u64,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            max_nodes_per_document: DEFAULT_MAX_NODES_PER_DOCUMENT,
            max_relationships_per_node: DEFAULT_MAX_RELATIONSHIPS_PER_NODE,
        }
    }
}

// Signed so that negative limits reach the rule check instead of failing the shape check.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RulesInput {
    max_nodes_per_document: i64,
    max_relationships_per_node: i64,
}

/// Persisted aggregate, rewritten whole on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub last_modified: DateTime<Utc>,
    pub node_count: u64,
    pub document_count: u64,
    pub relationship_count: u64,
    pub settings: Settings,
    pub rules: Rules,
}

impl StateSnapshot {
    pub fn defaults(now: DateTime<Utc>) -> Self {
        Self {
            last_modified: now,
            node_count: 0,
            document_count: 0,
            relationship_count: 0,
            settings: Settings::default(),
            rules: Rules::default(),
        }
    }

    fn apply(&mut self, update: &StateUpdate) {
        match *update {
            StateUpdate::NodeCount(n) => self.node_count = n,
            StateUpdate::DocumentCount(n) => self.document_count = n,
            StateUpdate::RelationshipCount(n) => self.relationship_count = n,
            StateUpdate::Settings(settings) => self.settings = settings,
            StateUpdate::Rules(rules) => self.rules = rules,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    LastModified,
    NodeCount,
    DocumentCount,
    RelationshipCount,
    Settings,
    Rules,
}

impl StateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::LastModified => "lastModified",
            StateKey::NodeCount => "nodeCount",
            StateKey::DocumentCount => "documentCount",
            StateKey::RelationshipCount => "relationshipCount",
            StateKey::Settings => "settings",
            StateKey::Rules => "rules",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKey {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lastModified" => Ok(StateKey::LastModified),
            "nodeCount" => Ok(StateKey::NodeCount),
            "documentCount" => Ok(StateKey::DocumentCount),
            "relationshipCount" => Ok(StateKey::RelationshipCount),
            "settings" => Ok(StateKey::Settings),
            "rules" => Ok(StateKey::Rules),
            other => Err(StateError::InvalidKey(other.to_string())),
        }
    }
}

/// A validated, typed assignment to one writable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdate {
    NodeCount(u64),
    DocumentCount(u64),
    RelationshipCount(u64),
    Settings(Settings),
    Rules(Rules),
}

impl StateUpdate {
    pub fn key(&self) -> StateKey {
        match self {
            StateUpdate::NodeCount(_) => StateKey::NodeCount,
            StateUpdate::DocumentCount(_) => StateKey::DocumentCount,
            StateUpdate::RelationshipCount(_) => StateKey::RelationshipCount,
            StateUpdate::Settings(_) => StateKey::Settings,
            StateUpdate::Rules(_) => StateKey::Rules,
        }
    }
}

fn invalid(key: StateKey, reason: impl Into<String>) -> StateError {
    StateError::InvalidValue {
        key: key.as_str().to_string(),
        reason: reason.into(),
    }
}

fn count_value(key: StateKey, value: &Value) -> Result<u64, StateError> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    match value.as_i64() {
        Some(_) => Err(StateError::RuleViolation(format!("{} must not be negative", key))),
        None => Err(invalid(key, "expected an integer")),
    }
}

/// Checks a caller-supplied `value` for `key` against the current snapshot's
/// rules and counts under the given policy.
pub fn validate_against(
    key: StateKey,
    value: &Value,
    current: &StateSnapshot,
    policy: RelationshipLimitPolicy,
) -> Result<StateUpdate, StateError> {
    let rules = &current.rules;
    match key {
        StateKey::LastModified => Err(StateError::ReadOnlyKey(key.as_str().to_string())),
        StateKey::NodeCount => {
            let n = count_value(key, value)?;
            if n > rules.max_nodes_per_document {
                return Err(StateError::RuleViolation(format!(
                    "nodeCount must be between 0 and {}",
                    rules.max_nodes_per_document
                )));
            }
            Ok(StateUpdate::NodeCount(n))
        }
        StateKey::DocumentCount => Ok(StateUpdate::DocumentCount(count_value(key, value)?)),
        StateKey::RelationshipCount => {
            let n = count_value(key, value)?;
            if policy == RelationshipLimitPolicy::Global && n > rules.max_relationships_per_node {
                return Err(StateError::RuleViolation(format!(
                    "relationshipCount must be between 0 and {}",
                    rules.max_relationships_per_node
                )));
            }
            Ok(StateUpdate::RelationshipCount(n))
        }
        StateKey::Settings => {
            let settings: Settings =
                serde_json::from_value(value.clone()).map_err(|e| invalid(key, e.to_string()))?;
            Ok(StateUpdate::Settings(settings))
        }
        StateKey::Rules => {
            let input: RulesInput =
                serde_json::from_value(value.clone()).map_err(|e| invalid(key, e.to_string()))?;
            if input.max_nodes_per_document < 1 || input.max_relationships_per_node < 1 {
                return Err(StateError::RuleViolation(
                    "rule limits must be positive".to_string(),
                ));
            }
            let next = Rules {
                max_nodes_per_document: input.max_nodes_per_document as u64,
                max_relationships_per_node: input.max_relationships_per_node as u64,
            };
            check_limits_cover_counts(current, &next, policy)?;
            Ok(StateUpdate::Rules(next))
        }
    }
}

// A limit may stay where it is, or rise, whatever the counts are. It may
// only be lowered as far as the count it bounds.
fn check_limits_cover_counts(
    current: &StateSnapshot,
    next: &Rules,
    policy: RelationshipLimitPolicy,
) -> Result<(), StateError> {
    let lowered_below = |old: u64, new: u64, count: u64| new < old && new < count;

    if lowered_below(
        current.rules.max_nodes_per_document,
        next.max_nodes_per_document,
        current.node_count,
    ) {
        return Err(StateError::RuleViolation(format!(
            "maxNodesPerDocument cannot be lowered below the current nodeCount of {}",
            current.node_count
        )));
    }
    if policy == RelationshipLimitPolicy::Global
        && lowered_below(
            current.rules.max_relationships_per_node,
            next.max_relationships_per_node,
            current.relationship_count,
        )
    {
        return Err(StateError::RuleViolation(format!(
            "maxRelationshipsPerNode cannot be lowered below the current relationshipCount of {}",
            current.relationship_count
        )));
    }
    Ok(())
}

/// Process-wide aggregate: counts, settings and rules, persisted under the
/// `state` key and announced on the change bus.
///
/// Writers hold the snapshot's write lock across validate, persist and swap,
/// so a failed call leaves both the in-memory and persisted state untouched.
/// Listeners are notified after the lock is released.
pub struct AggregateState {
    store: Arc<dyn EncryptedStore>,
    current: RwLock<StateSnapshot>,
    bus: Arc<StateChangeBus>,
    clock: Arc<dyn Clock>,
    policy: RelationshipLimitPolicy,
    counts: Option<Arc<dyn CountSource>>,
}

impl AggregateState {
    pub async fn open(
        store: Arc<dyn EncryptedStore>,
        bus: Arc<StateChangeBus>,
        config: &StateConfig,
    ) -> Result<Self, StateError> {
        Self::open_with_clock(store, bus, config, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        store: Arc<dyn EncryptedStore>,
        bus: Arc<StateChangeBus>,
        config: &StateConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StateError> {
        let snapshot = match store.read(STATE_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => {
                let defaults = StateSnapshot::defaults(clock.now());
                store.write(STATE_KEY, &serde_json::to_vec(&defaults)?).await?;
                tracing::info!("initialized aggregate state with defaults");
                defaults
            }
        };

        Ok(Self {
            store,
            current: RwLock::new(snapshot),
            bus,
            clock,
            policy: config.relationship_limit,
            counts: None,
        })
    }

    pub fn with_count_source(mut self, counts: Arc<dyn CountSource>) -> Self {
        self.counts = Some(counts);
        self
    }

    pub fn policy(&self) -> RelationshipLimitPolicy {
        self.policy
    }

    pub fn bus(&self) -> &Arc<StateChangeBus> {
        &self.bus
    }

    pub async fn get(&self) -> StateSnapshot {
        self.current.read().await.clone()
    }

    pub async fn validate(&self, key: &str, value: &Value) -> Result<StateUpdate, StateError> {
        let key: StateKey = key.parse()?;
        let current = self.current.read().await;
        validate_against(key, value, &current, self.policy)
    }

    /// Capacity the node repository must honor when appending an edge.
    pub async fn edge_capacity(&self) -> EdgeCapacity {
        let limit = self.current.read().await.rules.max_relationships_per_node;
        match self.policy {
            RelationshipLimitPolicy::PerNode => EdgeCapacity::PerSource(limit),
            RelationshipLimitPolicy::Global => EdgeCapacity::Total(limit),
        }
    }

    pub async fn update_key(&self, key: &str, value: Value) -> Result<StateSnapshot, StateError> {
        let key: StateKey = key.parse()?;
        let snapshot = {
            let mut current = self.current.write().await;
            let update = validate_against(key, &value, &current, self.policy)?;
            self.commit(&mut current, |next| next.apply(&update)).await?
        };

        tracing::debug!(key = %key, "state key updated");
        self.bus.publish(key.as_str(), value);
        Ok(snapshot)
    }

    pub async fn reset(&self) -> Result<StateSnapshot, StateError> {
        let snapshot = {
            let mut current = self.current.write().await;
            self.commit(&mut current, |next| {
                *next = StateSnapshot::defaults(next.last_modified);
            })
            .await?
        };

        tracing::info!("aggregate state reset to defaults");
        self.bus.publish(RESET_EVENT, json!(snapshot));
        Ok(snapshot)
    }

    /// Announces the current snapshot without changing it.
    pub async fn synchronize(&self) -> StateSnapshot {
        let snapshot = self.get().await;
        self.bus.publish(SYNCHRONIZE_EVENT, json!(snapshot));
        snapshot
    }

    pub async fn live_counts(&self) -> Result<DerivedCounts, StateError> {
        let counts = self.counts.as_ref().ok_or(StateError::NoCountSource)?;
        Ok(counts.derived_counts().await?)
    }

    /// Pulls the live edge total and stores it as `relationshipCount`.
    ///
    /// The count source is read while the write lock is held, so concurrent
    /// recomputes commit in the order they observed the collections.
    pub async fn recompute_relationship_count(&self) -> Result<StateSnapshot, StateError> {
        let counts = self.counts.as_ref().ok_or(StateError::NoCountSource)?;
        let (snapshot, total) = {
            let mut current = self.current.write().await;
            let total = counts.relationship_count().await?;
            let snapshot = self
                .commit(&mut current, |next| next.relationship_count = total)
                .await?;
            (snapshot, total)
        };

        self.warn_if_beyond_rules(&snapshot);
        self.bus.publish(StateKey::RelationshipCount.as_str(), json!(total));
        Ok(snapshot)
    }

    /// Stores all three derived counts in one commit and publishes the keys
    /// that changed. Nothing is written when the counts already match.
    ///
    /// Observed counts are recorded as they are. The rules bound values a
    /// caller assigns through [`update_key`](Self::update_key), not the size
    /// of the collections.
    pub async fn reconcile_counts(&self) -> Result<StateSnapshot, StateError> {
        let counts = self.counts.as_ref().ok_or(StateError::NoCountSource)?;
        let (snapshot, changed) = {
            let mut current = self.current.write().await;
            let derived = counts.derived_counts().await?;
            let changed: Vec<(StateKey, u64)> = [
                (StateKey::NodeCount, current.node_count, derived.node_count),
                (StateKey::DocumentCount, current.document_count, derived.document_count),
                (
                    StateKey::RelationshipCount,
                    current.relationship_count,
                    derived.relationship_count,
                ),
            ]
            .into_iter()
            .filter(|(_, stored, live)| stored != live)
            .map(|(key, _, live)| (key, live))
            .collect();

            if changed.is_empty() {
                return Ok(current.clone());
            }
            let snapshot = self
                .commit(&mut current, |next| {
                    next.node_count = derived.node_count;
                    next.document_count = derived.document_count;
                    next.relationship_count = derived.relationship_count;
                })
                .await?;
            (snapshot, changed)
        };

        tracing::debug!(
            node_count = snapshot.node_count,
            document_count = snapshot.document_count,
            relationship_count = snapshot.relationship_count,
            "aggregate counts reconciled"
        );
        self.warn_if_beyond_rules(&snapshot);
        for (key, value) in changed {
            self.bus.publish(key.as_str(), json!(value));
        }
        Ok(snapshot)
    }

    fn warn_if_beyond_rules(&self, snapshot: &StateSnapshot) {
        if snapshot.node_count > snapshot.rules.max_nodes_per_document {
            tracing::warn!(
                node_count = snapshot.node_count,
                limit = snapshot.rules.max_nodes_per_document,
                "nodeCount is above maxNodesPerDocument"
            );
        }
        if self.policy == RelationshipLimitPolicy::Global
            && snapshot.relationship_count > snapshot.rules.max_relationships_per_node
        {
            tracing::warn!(
                relationship_count = snapshot.relationship_count,
                limit = snapshot.rules.max_relationships_per_node,
                "relationshipCount is above maxRelationshipsPerNode"
            );
        }
    }

    async fn commit<F>(&self, current: &mut StateSnapshot, edit: F) -> Result<StateSnapshot, StateError>
    where
        F: FnOnce(&mut StateSnapshot),
    {
        let mut next = current.clone();
        edit(&mut next);
        next.last_modified = next_timestamp(current.last_modified, self.clock.now());

        let bytes = serde_json::to_vec(&next)?;
        self.store.write(STATE_KEY, &bytes).await?;

        *current = next.clone();
        Ok(next)
    }
}
