//! Capacity enforcement through condensation
//!
//! When a partition grows past `max_items`, its oldest items (by creation
//! time) are condensed into a single summary item. One summarization call
//! covers the whole batch; the summary replaces the originals in one atomic
//! store operation, so there is never a moment where both are visible.
//!
//! Summarization is best-effort. Each attempt is bounded by a timeout and
//! retried with exponential backoff. If every attempt fails the partition is
//! left over capacity and the next write to it tries again.

use super::embedder::Embedder;
use super::item::{Category, MemoryItem, MemoryItemBuilder, Partition};
use super::store::{ChunkStore, PartitionLocks};
use super::summarizer::Summarizer;
use crate::config::{OverflowConfig, PartitionConfig, PartitionsConfig};
use crate::error::{Error, Result};
use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Source label carried by condensation summaries.
pub const SUMMARY_SOURCE: &str = "condensation";

/// Selections attempted before giving up on a partition that keeps changing
const MAX_PASSES: usize = 2;

/// Result of an overflow check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverflowOutcome {
    /// The partition is within its limit
    WithinCapacity { count: usize },
    /// A batch was condensed into one summary
    Condensed {
        summary_id: Uuid,
        removed: usize,
        count_after: usize,
    },
}

/// Enforces per-partition capacity
pub struct OverflowManager {
    store: Arc<dyn ChunkStore>,
    locks: Arc<PartitionLocks>,
    condensing: HashMap<Partition, Mutex<()>>,
    embedder: Arc<dyn Embedder>,
    summarizer: Arc<dyn Summarizer>,
    partitions: PartitionsConfig,
    policy: OverflowConfig,
    attempt_timeout: Duration,
}

impl OverflowManager {
    /// Create a manager for the configured partitions
    pub fn new(
        store: Arc<dyn ChunkStore>,
        locks: Arc<PartitionLocks>,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn Summarizer>,
        partitions: PartitionsConfig,
        policy: OverflowConfig,
    ) -> Self {
        let attempt_timeout = Duration::from_secs(policy.timeout_secs.max(1));
        Self {
            store,
            locks,
            condensing: Partition::ALL.iter().map(|p| (*p, Mutex::new(()))).collect(),
            embedder,
            summarizer,
            partitions,
            policy,
            attempt_timeout,
        }
    }

    /// Override the per-attempt summarization timeout
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    fn limits(&self, partition: Partition) -> &PartitionConfig {
        match partition {
            Partition::SelfKnowledge => &self.partitions.self_knowledge,
            Partition::User => &self.partitions.user,
            Partition::Environment => &self.partitions.environment,
        }
    }

    /// Condense `partition` if it exceeds its limit.
    ///
    /// The partition write lock is taken twice, to select the batch and to
    /// swap it for the summary, and is released while the summarizer runs.
    /// Condensations of the same partition run one at a time. A batch that
    /// lost items in the meantime is discarded and selected again.
    pub async fn check(&self, partition: Partition) -> Result<OverflowOutcome> {
        let _condensing = match self.condensing.get(&partition) {
            Some(lock) => lock.lock().await,
            None => {
                return Err(Error::Internal(format!(
                    "missing condensation lock for {partition}"
                )))
            }
        };
        let limits = self.limits(partition);

        for pass in 1..=MAX_PASSES {
            let batch = {
                let _guard = self.locks.lock(partition).await?;
                let count = self.store.count(partition).await?;
                if count <= limits.max_items {
                    return Ok(OverflowOutcome::WithinCapacity { count });
                }

                let mut items = self.store.all_items(partition).await?;
                items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
                let batch_size =
                    condensation_batch_size(items.len(), limits.max_items, limits.condensation_ratio);
                items.truncate(batch_size);

                tracing::info!(
                    partition = %partition,
                    count,
                    max_items = limits.max_items,
                    batch = batch_size,
                    "Partition over capacity, condensing oldest items"
                );
                items
            };

            let texts: Vec<String> = batch.iter().map(|i| i.content.clone()).collect();
            let condensed = self.condense_with_retry(&texts).await?;
            let embedding = self.embedder.embed(&condensed).await?;
            let summary = build_summary(partition, &batch, condensed, embedding)?;
            let summary_id = summary.id;
            let ids: Vec<Uuid> = batch.iter().map(|i| i.id).collect();

            let _guard = self.locks.lock(partition).await?;
            let present: HashSet<Uuid> = self
                .store
                .all_items(partition)
                .await?
                .into_iter()
                .map(|i| i.id)
                .collect();
            if !ids.iter().all(|id| present.contains(id)) {
                tracing::debug!(
                    partition = %partition,
                    pass,
                    "Batch changed during condensation, discarding summary"
                );
                continue;
            }

            let removed = self.store.replace_batch(&ids, summary).await?;
            let count_after = self.store.count(partition).await?;

            tracing::info!(
                partition = %partition,
                removed,
                count_after,
                summary_id = %summary_id,
                "Condensation complete"
            );
            return Ok(OverflowOutcome::Condensed {
                summary_id,
                removed,
                count_after,
            });
        }

        Err(Error::SummarizationFailed(format!(
            "{partition} changed during condensation {MAX_PASSES} times"
        )))
    }

    async fn condense_with_retry(&self, texts: &[String]) -> Result<String> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.attempt_timeout, self.summarizer.condense(texts)).await
            {
                Ok(Ok(summary)) => return Ok(summary),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("timed out after {:?}", self.attempt_timeout);
                }
            }
            tracing::warn!(attempt, attempts, error = %last_error, "Summarization attempt failed");

            if attempt < attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        Err(Error::SummarizationFailed(format!(
            "{} attempt(s) failed, last error: {}",
            attempts, last_error
        )))
    }

    /// Delay after failed attempt `attempt` (1-based), with up to 10% jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .policy
            .initial_backoff_ms
            .saturating_mul(1u64 << (attempt - 1).min(16))
            .min(self.policy.max_backoff_ms);
        let jitter = if base >= 10 {
            rand::thread_rng().gen_range(0..=base / 10)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

/// Number of oldest items to condense so that the partition, including the
/// new summary, ends at or below `max_items`.
pub fn condensation_batch_size(count: usize, max_items: usize, ratio: f64) -> usize {
    if count <= max_items {
        return 0;
    }
    let keep = ((count as f64) * ratio.clamp(0.0, 1.0)).floor() as usize;
    let by_ratio = count - keep.min(count);
    let required = count + 1 - max_items;
    by_ratio.max(required).max(2).min(count)
}

fn build_summary(
    partition: Partition,
    batch: &[MemoryItem],
    condensed: String,
    embedding: Vec<f32>,
) -> Result<MemoryItem> {
    let (first, last) = match (batch.first(), batch.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(Error::Internal("empty condensation batch".to_string())),
    };
    let confidence = batch.iter().map(|i| i.confidence).sum::<f32>() / batch.len() as f32;

    MemoryItemBuilder::new(partition)
        .content(condensed)
        .embedding(embedding)
        .category(dominant_category(batch).unwrap_or_else(|| Category::default_for(partition)))
        .metadata_map(merge_metadata(batch))
        .metadata("condensed_count", Value::from(batch.len()))
        .metadata("condensed_from", Value::String(first.created_at.to_rfc3339()))
        .metadata("condensed_to", Value::String(last.created_at.to_rfc3339()))
        .metadata("summarized_at", Value::String(Utc::now().to_rfc3339()))
        .created_at(last.created_at)
        .summary(true)
        .confidence(confidence)
        .source(SUMMARY_SOURCE)
        .build()
}

/// Most frequent category, ties resolved in favour of the earliest seen
fn dominant_category(batch: &[MemoryItem]) -> Option<Category> {
    let mut counts: Vec<(Category, usize)> = Vec::new();
    for item in batch {
        match counts.iter_mut().find(|(c, _)| *c == item.category) {
            Some((_, n)) => *n += 1,
            None => counts.push((item.category, 1)),
        }
    }
    let best = counts.iter().map(|(_, n)| *n).max()?;
    counts.into_iter().find(|(_, n)| *n == best).map(|(c, _)| c)
}

/// Union of metadata across a batch.
///
/// Keys whose values agree keep the value; disagreeing values become an array
/// of the distinct values in first-seen order. Array values are merged
/// element-wise.
fn merge_metadata(batch: &[MemoryItem]) -> HashMap<String, Value> {
    let mut merged: HashMap<String, Vec<Value>> = HashMap::new();
    for item in batch {
        for (key, value) in &item.metadata {
            let values = merged.entry(key.clone()).or_default();
            let incoming = match value {
                Value::Array(elements) => elements.clone(),
                other => vec![other.clone()],
            };
            for v in incoming {
                if !values.contains(&v) {
                    values.push(v);
                }
            }
        }
    }
    merged
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            (key, value)
        })
        .collect()
}
