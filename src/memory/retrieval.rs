//! Cascading retrieval across partitions
//!
//! Partitions are searched in priority order, each at its own quality bar:
//! Self-Knowledge first at the strictest threshold, then User, then
//! Environment at the most permissive one. The cascade stops as soon as `k`
//! matches are collected, so lower partitions are only consulted to fill the
//! remainder.

use super::embedder::Embedder;
use super::item::{Partition, RetrievalResult, ScoredItem};
use super::store::{ChunkQuery, ChunkStore};
use crate::config::PartitionsConfig;
use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Threshold-gated cascading search engine
pub struct RetrievalEngine {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    thresholds: BTreeMap<Partition, f64>,
}

impl RetrievalEngine {
    /// Create an engine using the per-partition `min_score` values
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        partitions: &PartitionsConfig,
    ) -> Self {
        let thresholds = BTreeMap::from([
            (Partition::SelfKnowledge, partitions.self_knowledge.min_score),
            (Partition::User, partitions.user.min_score),
            (Partition::Environment, partitions.environment.min_score),
        ]);
        Self {
            store,
            embedder,
            thresholds,
        }
    }

    /// Minimum accepted score for a partition
    pub fn threshold(&self, partition: Partition) -> f64 {
        self.thresholds.get(&partition).copied().unwrap_or(1.0)
    }

    /// Retrieve at most `k` items relevant to `query`.
    ///
    /// `user_id` restricts the User partition to that user's items. An
    /// unreachable partition contributes nothing; an embedding failure aborts.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        user_id: Option<&str>,
    ) -> Result<RetrievalResult> {
        let mut result = RetrievalResult::empty(query);
        if k == 0 {
            return Ok(result);
        }

        let embedding = self.embedder.embed(query).await?;

        for partition in Partition::ALL {
            let remaining = k - result.items.len();
            if remaining == 0 {
                break;
            }

            let owner = match partition {
                Partition::User => user_id,
                _ => None,
            };
            let chunk_query =
                ChunkQuery::new(partition, &embedding, self.threshold(partition), remaining)
                    .owned_by(owner);

            result.searched.push(partition);
            let hits = match self.store.query(chunk_query).await {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!(
                        partition = %partition,
                        error = %e,
                        "Partition query failed, continuing cascade"
                    );
                    Vec::new()
                }
            };

            result.partition_counts.insert(partition, hits.len().min(remaining));
            result.items.extend(
                hits.into_iter()
                    .take(remaining)
                    .map(|(item, score)| ScoredItem { item, score }),
            );
        }

        tracing::debug!(
            k,
            returned = result.items.len(),
            searched = result.searched.len(),
            "Retrieval complete"
        );
        Ok(result)
    }
}
