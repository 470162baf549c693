use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    pub key_id: String,
    /// Key material; hashed into the data key. Supply through
    /// `TESSERA__STORAGE__ENCRYPTION__SECRET` rather than a checked-in file.
    pub secret: Option<String>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_id: "tessera-default".to_string(),
            secret: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub encryption: EncryptionConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data/encrypted".to_string(),
            encryption: EncryptionConfig::default(),
        }
    }
}

/// How `rules.maxRelationshipsPerNode` is enforced.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipLimitPolicy {
    /// Caps the outgoing edges of each node; `relationshipCount` only has to be non-negative.
    #[default]
    PerNode,
    /// Caps the graph-wide `relationshipCount`.
    Global,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct StateConfig {
    pub relationship_limit: RelationshipLimitPolicy,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct InferenceConfig {
    /// Scores strictly above this create an edge.
    pub similarity_threshold: f64,
    /// `apply_threshold_rules` rescans everything once `nodeCount` exceeds this.
    pub rescan_node_count: u64,
    pub relationship_type: String,
    pub job_queue_capacity: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            rescan_node_count: 50,
            relationship_type: "similarity".to_string(),
            job_queue_capacity: 64,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub state: StateConfig,
    pub inference: InferenceConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Layers `<dir>/default`, `<dir>/<RUN_MODE>` and `TESSERA__*` variables.
    pub fn load_from(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let dir = dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(dir.join("default")).required(false))
            .add_source(File::from(dir.join(&run_mode)).required(false))
            .add_source(Environment::with_prefix("TESSERA").separator("__"));

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load_from(dir.path()).unwrap();

        assert_eq!(config.inference.similarity_threshold, 0.7);
        assert_eq!(config.inference.rescan_node_count, 50);
        assert_eq!(config.state.relationship_limit, RelationshipLimitPolicy::PerNode);
        assert!(config.storage.encryption.enabled);
    }

    #[test]
    fn default_file_overrides_fields() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[storage]
data_dir = "/var/lib/tessera"

[state]
relationship_limit = "global"

[logging]
json = true
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.storage.data_dir, "/var/lib/tessera");
        assert_eq!(config.state.relationship_limit, RelationshipLimitPolicy::Global);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }
}
