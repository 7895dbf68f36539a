//! Chunk store for partitioned memory items
//!
//! The `ChunkStore` trait is the storage seam: pure persistence plus
//! similarity search, no policy. `InMemoryChunkStore` keeps one
//! `tokio::sync::RwLock` per partition so that each partition query observes a
//! consistent view while other partitions are being written.

use super::item::{MemoryItem, Partition};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

/// A similarity query against a single partition.
#[derive(Debug, Clone)]
pub struct ChunkQuery<'a> {
    pub partition: Partition,
    pub embedding: &'a [f32],
    pub min_score: f64,
    pub limit: usize,
    /// Restrict matches to items owned by this user
    pub user_id: Option<&'a str>,
}

impl<'a> ChunkQuery<'a> {
    /// Create a query with no owner filter
    pub fn new(partition: Partition, embedding: &'a [f32], min_score: f64, limit: usize) -> Self {
        Self {
            partition,
            embedding,
            min_score,
            limit,
            user_id: None,
        }
    }

    /// Restrict the query to one user's items
    pub fn owned_by(mut self, user_id: Option<&'a str>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// Storage backend holding memory items per partition.
///
/// Implementations return `Error::StorageUnavailable` when the backing index
/// cannot be reached. Every mutating method is atomic.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert or replace an item by id
    async fn put(&self, item: MemoryItem) -> Result<()>;

    /// Fetch an item by id
    async fn get(&self, id: &Uuid) -> Result<Option<MemoryItem>>;

    /// Items scoring at or above `min_score`, best first, newer first on ties
    async fn query(&self, query: ChunkQuery<'_>) -> Result<Vec<(MemoryItem, f64)>>;

    /// Number of items in a partition
    async fn count(&self, partition: Partition) -> Result<usize>;

    /// Remove a set of items, returning how many existed
    async fn delete_batch(&self, ids: &[Uuid]) -> Result<usize>;

    /// Remove `ids` from the summary's partition and insert `summary` in one step
    async fn replace_batch(&self, ids: &[Uuid], summary: MemoryItem) -> Result<usize>;

    /// Enumerate every item in a partition
    async fn all_items(&self, partition: Partition) -> Result<Vec<MemoryItem>>;

    /// Remove every item in a partition, returning how many were removed
    async fn clear(&self, partition: Partition) -> Result<usize>;

    /// Replace a partition's entire content
    async fn restore(&self, partition: Partition, items: Vec<MemoryItem>) -> Result<()>;
}

/// Cosine similarity, `None` when dimensions differ or a vector is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x = f64::from(x);
        let y = f64::from(y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(dot / denom)
}

type Shard = RwLock<HashMap<Uuid, MemoryItem>>;

/// In-memory chunk store with one lock per partition
pub struct InMemoryChunkStore {
    shards: HashMap<Partition, Arc<Shard>>,
}

impl InMemoryChunkStore {
    /// Create a new empty store
    pub fn new() -> Self {
        let shards = Partition::ALL
            .iter()
            .map(|p| (*p, Arc::new(RwLock::new(HashMap::new()))))
            .collect();
        Self { shards }
    }

    fn shard(&self, partition: Partition) -> Result<&Arc<Shard>> {
        self.shards
            .get(&partition)
            .ok_or_else(|| Error::Internal(format!("missing shard for {partition}")))
    }
}

impl Default for InMemoryChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn put(&self, item: MemoryItem) -> Result<()> {
        if item.embedding.is_empty() {
            return Err(Error::Memory(format!("item {} has no embedding", item.id)));
        }
        // An id moving between partitions must not be left behind in the old one
        for (partition, shard) in &self.shards {
            if *partition != item.partition {
                shard.write().await.remove(&item.id);
            }
        }
        self.shard(item.partition)?
            .write()
            .await
            .insert(item.id, item);
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Option<MemoryItem>> {
        for partition in Partition::ALL {
            if let Some(item) = self.shard(partition)?.read().await.get(id) {
                return Ok(Some(item.clone()));
            }
        }
        Ok(None)
    }

    async fn query(&self, query: ChunkQuery<'_>) -> Result<Vec<(MemoryItem, f64)>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let shard = self.shard(query.partition)?.read().await;

        let mut scored: Vec<(&MemoryItem, f64)> = shard
            .values()
            .filter(|item| match query.user_id {
                Some(user) => item.is_owned_by(user),
                None => true,
            })
            .filter_map(|item| {
                cosine_similarity(query.embedding, &item.embedding).map(|score| (item, score))
            })
            .filter(|(_, score)| *score >= query.min_score)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.created_at.cmp(&a.0.created_at))
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(query.limit);

        Ok(scored
            .into_iter()
            .map(|(item, score)| (item.clone(), score))
            .collect())
    }

    async fn count(&self, partition: Partition) -> Result<usize> {
        Ok(self.shard(partition)?.read().await.len())
    }

    async fn delete_batch(&self, ids: &[Uuid]) -> Result<usize> {
        // Lock every shard up front so the batch disappears at once
        let mut guards = Vec::with_capacity(Partition::ALL.len());
        for partition in Partition::ALL {
            guards.push(self.shard(partition)?.write().await);
        }
        let mut removed = 0;
        for id in ids {
            for guard in guards.iter_mut() {
                if guard.remove(id).is_some() {
                    removed += 1;
                    break;
                }
            }
        }
        Ok(removed)
    }

    async fn replace_batch(&self, ids: &[Uuid], summary: MemoryItem) -> Result<usize> {
        if summary.embedding.is_empty() {
            return Err(Error::Memory(format!(
                "summary {} has no embedding",
                summary.id
            )));
        }
        let mut shard = self.shard(summary.partition)?.write().await;
        let removed = ids.iter().filter(|id| shard.remove(id).is_some()).count();
        shard.insert(summary.id, summary);
        Ok(removed)
    }

    async fn all_items(&self, partition: Partition) -> Result<Vec<MemoryItem>> {
        Ok(self
            .shard(partition)?
            .read()
            .await
            .values()
            .cloned()
            .collect())
    }

    async fn clear(&self, partition: Partition) -> Result<usize> {
        let mut shard = self.shard(partition)?.write().await;
        let removed = shard.len();
        shard.clear();
        Ok(removed)
    }

    async fn restore(&self, partition: Partition, items: Vec<MemoryItem>) -> Result<()> {
        if let Some(bad) = items
            .iter()
            .find(|i| i.partition != partition || i.embedding.is_empty())
        {
            return Err(Error::Memory(format!(
                "item {} cannot be restored into {partition}",
                bad.id
            )));
        }
        let map = items.into_iter().map(|i| (i.id, i)).collect();
        *self.shard(partition)?.write().await = map;
        Ok(())
    }
}

/// Per-partition write serialization.
///
/// Writers to the same partition queue behind one another; writers to
/// different partitions proceed concurrently. Readers never take these locks.
pub struct PartitionLocks {
    locks: HashMap<Partition, Mutex<()>>,
}

impl PartitionLocks {
    /// Create one lock per partition
    pub fn new() -> Self {
        Self {
            locks: Partition::ALL.iter().map(|p| (*p, Mutex::new(()))).collect(),
        }
    }

    /// Acquire the write lock for `partition`
    pub async fn lock(&self, partition: Partition) -> Result<MutexGuard<'_, ()>> {
        match self.locks.get(&partition) {
            Some(lock) => Ok(lock.lock().await),
            None => Err(Error::Internal(format!("missing lock for {partition}"))),
        }
    }

    /// Acquire the write locks for several partitions in priority order
    pub async fn lock_many(&self, partitions: &[Partition]) -> Result<Vec<MutexGuard<'_, ()>>> {
        let mut sorted = partitions.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for partition in sorted {
            guards.push(self.lock(partition).await?);
        }
        Ok(guards)
    }
}

impl Default for PartitionLocks {
    fn default() -> Self {
        Self::new()
    }
}
