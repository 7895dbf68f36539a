//! Memory data types
//!
//! A `MemoryItem` is the atomic unit of stored content. Every item lives in
//! exactly one `Partition`, carries the embedding it is searched by, and keeps
//! the provenance needed to audit or condense it later.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Metadata key naming the user who owns an item.
pub const USER_ID_KEY: &str = "user_id";

/// Memory partition, declared in retrieval priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Knowledge the agent derived about itself
    SelfKnowledge,
    /// Per-user conversational history and preferences
    User,
    /// Transient data from sensors, APIs and webhooks
    Environment,
}

impl Partition {
    /// All partitions, highest priority first.
    pub const ALL: [Partition; 3] = [
        Partition::SelfKnowledge,
        Partition::User,
        Partition::Environment,
    ];

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::SelfKnowledge => "self_knowledge",
            Partition::User => "user",
            Partition::Environment => "environment",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "self_knowledge" | "self" | "selfknowledge" => Ok(Partition::SelfKnowledge),
            "user" => Ok(Partition::User),
            "environment" | "env" => Ok(Partition::Environment),
            other => Err(Error::Memory(format!("unknown partition '{other}'"))),
        }
    }
}

/// Semantic subtype of a memory item.
///
/// Used for classification and auditing only; retrieval never looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SelfReflection,
    LearnedBehavior,
    UserPreference,
    UserFact,
    Conversation,
    General,
    SensorReading,
    ApiResponse,
    WebhookEvent,
    Observation,
}

impl Category {
    /// Category assigned when nothing more specific matched in `partition`.
    pub fn default_for(partition: Partition) -> Self {
        match partition {
            Partition::SelfKnowledge => Category::SelfReflection,
            Partition::User => Category::General,
            Partition::Environment => Category::Observation,
        }
    }
}

/// A stored unit of memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique item identifier
    pub id: Uuid,
    /// Text content, the basis for embedding and display
    pub content: String,
    /// Embedding vector produced by the embedding service
    pub embedding: Vec<f32>,
    /// Partition the item lives in
    pub partition: Partition,
    /// Semantic subtype
    pub category: Category,
    /// Free-form metadata (e.g. owning user)
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// True if produced by condensation
    #[serde(default)]
    pub is_summary: bool,
    /// Confidence in the content, 0.0 to 1.0
    pub confidence: f32,
    /// Provenance note
    #[serde(default)]
    pub source: String,
}

impl MemoryItem {
    /// Owning user, if recorded in metadata.
    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get(USER_ID_KEY).and_then(|v| v.as_str())
    }

    /// Whether the item belongs to `user_id`.
    ///
    /// Summaries covering several users carry an array of owners.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        match self.metadata.get(USER_ID_KEY) {
            Some(serde_json::Value::String(owner)) => owner == user_id,
            Some(serde_json::Value::Array(owners)) => {
                owners.iter().any(|o| o.as_str() == Some(user_id))
            }
            _ => false,
        }
    }
}

/// Builder for constructing `MemoryItem` instances
pub struct MemoryItemBuilder {
    partition: Partition,
    content: Option<String>,
    embedding: Vec<f32>,
    category: Option<Category>,
    metadata: HashMap<String, serde_json::Value>,
    created_at: Option<DateTime<Utc>>,
    is_summary: bool,
    confidence: f32,
    source: String,
}

impl MemoryItemBuilder {
    /// Create a new builder for an item in `partition`
    pub fn new(partition: Partition) -> Self {
        Self {
            partition,
            content: None,
            embedding: Vec::new(),
            category: None,
            metadata: HashMap::new(),
            created_at: None,
            is_summary: false,
            confidence: 1.0,
            source: String::new(),
        }
    }

    /// Set text content
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Set the embedding vector
    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    /// Set the category
    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Add a metadata entry
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Extend metadata from an iterator
    pub fn metadata_map(
        mut self,
        entries: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Self {
        self.metadata.extend(entries);
        self
    }

    /// Record the owning user
    pub fn user_id(self, user_id: impl Into<String>) -> Self {
        self.metadata(USER_ID_KEY, serde_json::Value::String(user_id.into()))
    }

    /// Override the creation timestamp
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Mark the item as a condensation summary
    pub fn summary(mut self, is_summary: bool) -> Self {
        self.is_summary = is_summary;
        self
    }

    /// Set confidence, clamped into [0.0, 1.0]
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = if confidence.is_nan() {
            1.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }

    /// Set the provenance note
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Build the item, returning an error if content or embedding is missing
    pub fn build(self) -> Result<MemoryItem> {
        let content = self
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::Memory("content is required".to_string()))?;
        if self.embedding.is_empty() {
            return Err(Error::Memory("embedding is required".to_string()));
        }

        Ok(MemoryItem {
            id: Uuid::new_v4(),
            content,
            embedding: self.embedding,
            partition: self.partition,
            category: self
                .category
                .unwrap_or_else(|| Category::default_for(self.partition)),
            metadata: self.metadata,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            is_summary: self.is_summary,
            confidence: self.confidence,
            source: self.source,
        })
    }
}

/// A retrieved item with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item: MemoryItem,
    pub score: f64,
}

/// Result of a cascading retrieval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// The original query string
    pub query: String,
    /// Matches ordered by partition priority, then similarity descending
    pub items: Vec<ScoredItem>,
    /// Number of items contributed by each partition
    pub partition_counts: BTreeMap<Partition, usize>,
    /// Partitions that were actually searched, in order
    pub searched: Vec<Partition>,
}

impl RetrievalResult {
    /// Create an empty result for `query`
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Number of returned items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing matched
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Matches contributed by `partition`
    pub fn count_for(&self, partition: Partition) -> usize {
        self.partition_counts.get(&partition).copied().unwrap_or(0)
    }

    /// Drop scores and return the ordered items
    pub fn into_items(self) -> Vec<MemoryItem> {
        self.items.into_iter().map(|s| s.item).collect()
    }
}
