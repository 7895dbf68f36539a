//! memtier configuration management

use crate::error::{Error, Result};
use crate::memory::{Category, Partition};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main memtier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemTierConfig {
    /// Relaxes adapter requirements and enables local embedder/summarizer
    #[serde(default)]
    pub development_mode: bool,

    /// Permit `reset_all()`, which also wipes self-knowledge
    #[serde(default)]
    pub allow_full_reset: bool,

    /// Enable autonomous background work (periodic snapshots)
    #[serde(default)]
    pub autonomy_enabled: bool,

    /// Per-partition limits
    #[serde(default)]
    pub partitions: PartitionsConfig,

    /// Snapshot schedule and retention
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Overflow condensation retry policy
    #[serde(default)]
    pub overflow: OverflowConfig,

    /// Embedding endpoint
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Summarization endpoint
    #[serde(default)]
    pub summarizer: SummarizerConfig,

    /// Content classification rules
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

impl Default for MemTierConfig {
    fn default() -> Self {
        Self {
            development_mode: false,
            allow_full_reset: false,
            autonomy_enabled: false,
            partitions: PartitionsConfig::default(),
            snapshot: SnapshotConfig::default(),
            overflow: OverflowConfig::default(),
            embedding: EmbeddingConfig::default(),
            summarizer: SummarizerConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl MemTierConfig {
    /// Parse a TOML configuration document
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Load and validate a configuration file, applying environment overrides
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Configuration for one partition
    pub fn partition(&self, partition: Partition) -> &PartitionConfig {
        match partition {
            Partition::SelfKnowledge => &self.partitions.self_knowledge,
            Partition::User => &self.partitions.user,
            Partition::Environment => &self.partitions.environment,
        }
    }

    /// Apply `MEMTIER_*` environment flags on top of the file values.
    ///
    /// Consent for destructive operations is asserted by the environment the
    /// process runs in, not only by the config file it was handed.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_flag("MEMTIER_ALLOW_FULL_RESET") {
            self.allow_full_reset = v;
        }
        if let Some(v) = env_flag("MEMTIER_DEVELOPMENT_MODE") {
            self.development_mode = v;
        }
        if let Some(v) = env_flag("MEMTIER_AUTONOMY") {
            self.autonomy_enabled = v;
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        for partition in Partition::ALL {
            let cfg = self.partition(partition);
            if cfg.max_items < 2 {
                return Err(Error::Config(format!(
                    "{partition}: max_items must be at least 2"
                )));
            }
            if !(-1.0..=1.0).contains(&cfg.min_score) {
                return Err(Error::Config(format!(
                    "{partition}: min_score must be within [-1, 1]"
                )));
            }
            if !(0.0..1.0).contains(&cfg.condensation_ratio) {
                return Err(Error::Config(format!(
                    "{partition}: condensation_ratio must be within [0, 1)"
                )));
            }
            if cfg.namespace.trim().is_empty() {
                return Err(Error::Config(format!("{partition}: namespace is empty")));
            }
        }
        if self.snapshot.retention == 0 {
            return Err(Error::Config("snapshot.retention must be at least 1".into()));
        }
        if self.snapshot.interval_secs == 0 {
            return Err(Error::Config("snapshot.interval_secs must be positive".into()));
        }
        if self.overflow.max_attempts == 0 {
            return Err(Error::Config("overflow.max_attempts must be at least 1".into()));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding.dimension must be positive".into()));
        }
        Ok(())
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!(var = name, value = other, "Ignoring unrecognised boolean flag");
            None
        }
    }
}

/// Limits for the three partitions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionsConfig {
    pub self_knowledge: PartitionConfig,
    pub user: PartitionConfig,
    pub environment: PartitionConfig,
}

impl Default for PartitionsConfig {
    fn default() -> Self {
        Self {
            self_knowledge: PartitionConfig {
                max_items: 200,
                min_score: 0.75,
                condensation_ratio: 0.5,
                namespace: "memtier_self_knowledge".to_string(),
            },
            user: PartitionConfig {
                max_items: 500,
                min_score: 0.6,
                condensation_ratio: 0.2,
                namespace: "memtier_user".to_string(),
            },
            environment: PartitionConfig {
                max_items: 1000,
                min_score: 0.45,
                condensation_ratio: 0.2,
                namespace: "memtier_environment".to_string(),
            },
        }
    }
}

/// Limits for a single partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Maximum number of items after a write completes
    pub max_items: usize,

    /// Minimum cosine similarity accepted during retrieval
    pub min_score: f64,

    /// Fraction of items kept when the partition is compacted
    pub condensation_ratio: f64,

    /// Storage namespace (collection name in the vector index)
    pub namespace: String,
}

/// Snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Directory holding snapshot archives
    pub dir: PathBuf,

    /// Seconds between automatic captures
    pub interval_secs: u64,

    /// Automatic snapshots to keep
    pub retention: usize,

    /// Restore the newest snapshot on start when the store is empty
    pub restore_on_start: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: default_snapshot_dir(),
            interval_secs: 3600,
            retention: 5,
            restore_on_start: true,
        }
    }
}

/// Default snapshot directory (~/.memtier/snapshots/)
pub fn default_snapshot_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".memtier")
        .join("snapshots")
}

/// Overflow condensation retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverflowConfig {
    /// Summarization attempts per overflow pass
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_backoff_ms: u64,

    /// Upper bound on a single retry delay
    pub max_backoff_ms: u64,

    /// Timeout applied to each summarization attempt
    pub timeout_secs: u64,
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            timeout_secs: 30,
        }
    }
}

/// Embedding endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible base URL (None = local hashing embedder)
    pub endpoint: Option<String>,

    /// Model name sent to the endpoint
    pub model: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Vector dimensionality
    pub dimension: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "text-embedding-3-small".to_string(),
            api_key_env: "MEMTIER_EMBEDDING_API_KEY".to_string(),
            dimension: 384,
            timeout_secs: 15,
        }
    }
}

/// Summarization endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// OpenAI-compatible base URL (None = local extractive summarizer)
    pub endpoint: Option<String>,

    /// Model name sent to the endpoint
    pub model: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "gpt-4o-mini".to_string(),
            api_key_env: "MEMTIER_SUMMARIZER_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Ordered rules; the first match wins
    pub rules: Vec<ClassificationRule>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rules: default_classification_rules(),
        }
    }
}

/// A lexical rule mapping content to a partition and category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationRule {
    /// Whole-word, case-insensitive vocabulary match
    Vocabulary {
        name: String,
        partition: Partition,
        category: Category,
        words: Vec<String>,
    },
    /// Raw regular expression match
    Pattern {
        name: String,
        partition: Partition,
        category: Category,
        pattern: String,
    },
}

impl ClassificationRule {
    /// Rule name
    pub fn name(&self) -> &str {
        match self {
            ClassificationRule::Vocabulary { name, .. } => name,
            ClassificationRule::Pattern { name, .. } => name,
        }
    }

    /// Target partition
    pub fn partition(&self) -> Partition {
        match self {
            ClassificationRule::Vocabulary { partition, .. } => *partition,
            ClassificationRule::Pattern { partition, .. } => *partition,
        }
    }

    /// Target category
    pub fn category(&self) -> Category {
        match self {
            ClassificationRule::Vocabulary { category, .. } => *category,
            ClassificationRule::Pattern { category, .. } => *category,
        }
    }
}

fn vocabulary(name: &str, partition: Partition, category: Category, words: &[&str]) -> ClassificationRule {
    ClassificationRule::Vocabulary {
        name: name.to_string(),
        partition,
        category,
        words: words.iter().map(|w| w.to_string()).collect(),
    }
}

/// Built-in rules: self-knowledge first, then environment, then user subtypes
pub fn default_classification_rules() -> Vec<ClassificationRule> {
    vec![
        vocabulary(
            "self_reflection",
            Partition::SelfKnowledge,
            Category::SelfReflection,
            &[
                "myself",
                "i realized",
                "i noticed that i",
                "my reasoning",
                "my mistake",
                "self-reflection",
                "introspection",
                "as an agent",
                "my own",
            ],
        ),
        vocabulary(
            "learned_behavior",
            Partition::SelfKnowledge,
            Category::LearnedBehavior,
            &[
                "i learned",
                "lesson learned",
                "i should have",
                "next time i",
                "my strategy",
                "my capabilities",
                "improve my",
            ],
        ),
        vocabulary(
            "sensor_reading",
            Partition::Environment,
            Category::SensorReading,
            &[
                "sensor",
                "telemetry",
                "temperature",
                "humidity",
                "voltage",
                "battery level",
                "gps",
                "meter reading",
            ],
        ),
        vocabulary(
            "webhook_event",
            Partition::Environment,
            Category::WebhookEvent,
            &["webhook", "callback payload", "event payload", "push notification"],
        ),
        ClassificationRule::Pattern {
            name: "api_response".to_string(),
            partition: Partition::Environment,
            category: Category::ApiResponse,
            pattern: r"(?i)\b(api|endpoint|http\s+\d{3}|status\s+code|rate\s+limit(ed)?)\b"
                .to_string(),
        },
        vocabulary(
            "user_preference",
            Partition::User,
            Category::UserPreference,
            &[
                "i prefer",
                "i like",
                "i love",
                "i hate",
                "i dislike",
                "favorite",
                "favourite",
                "please always",
                "please never",
            ],
        ),
        vocabulary(
            "user_fact",
            Partition::User,
            Category::UserFact,
            &["my name is", "i live in", "i work", "my birthday", "i am a"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MemTierConfig::default();
        config.validate().unwrap();
        assert!(!config.allow_full_reset);
        assert!(!config.autonomy_enabled);
        assert_eq!(config.partition(Partition::User).max_items, 500);
    }

    #[test]
    fn test_thresholds_descend_by_priority() {
        let config = MemTierConfig::default();
        let sk = config.partition(Partition::SelfKnowledge).min_score;
        let user = config.partition(Partition::User).min_score;
        let env = config.partition(Partition::Environment).min_score;
        assert!(sk > user && user > env);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = MemTierConfig::from_toml(
            r#"
            allow_full_reset = true

            [partitions.self_knowledge]
            max_items = 10
            min_score = 0.9
            condensation_ratio = 0.5
            namespace = "sk"

            [partitions.user]
            max_items = 20
            min_score = 0.5
            condensation_ratio = 0.25
            namespace = "u"

            [partitions.environment]
            max_items = 30
            min_score = 0.1
            condensation_ratio = 0.0
            namespace = "env"

            [snapshot]
            dir = "/tmp/memtier"
            interval_secs = 60
            retention = 2
            restore_on_start = false
            "#,
        )
        .unwrap();

        assert!(config.allow_full_reset);
        assert!(!config.development_mode);
        assert_eq!(config.partition(Partition::User).max_items, 20);
        assert_eq!(config.snapshot.retention, 2);
        assert_eq!(config.overflow.max_attempts, 3);
        assert_eq!(config.classifier.rules, default_classification_rules());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let mut config = MemTierConfig::default();
        config.partitions.user.condensation_ratio = 1.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_retention() {
        let mut config = MemTierConfig::default();
        config.snapshot.retention = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_min_score() {
        let mut config = MemTierConfig::default();
        config.partitions.environment.min_score = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rule_serialization_is_tagged() {
        let rule = &default_classification_rules()[0];
        let toml = toml::to_string(rule).unwrap();
        assert!(toml.contains("kind = \"vocabulary\""));
        let parsed: ClassificationRule = toml::from_str(&toml).unwrap();
        assert_eq!(&parsed, rule);
    }

    #[test]
    fn test_config_roundtrips_through_toml() {
        let config = MemTierConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed = MemTierConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.partitions.user.max_items, config.partitions.user.max_items);
        assert_eq!(parsed.classifier.rules.len(), config.classifier.rules.len());
    }
}
