//! Test doubles shared by the memory module tests

use super::embedder::Embedder;
use super::item::{MemoryItem, Partition};
use super::store::{ChunkQuery, ChunkStore, InMemoryChunkStore};
use super::summarizer::Summarizer;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Embedder returning fixed vectors for known texts
pub struct StaticEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    dimension: usize,
    pub calls: AtomicUsize,
}

impl StaticEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            vectors: Mutex::new(HashMap::new()),
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(self, text: &str, vector: Vec<f32>) -> Self {
        self.set(text, vector);
        self
    }

    pub fn set(&self, text: &str, vector: Vec<f32>) {
        self.vectors.lock().unwrap().insert(text.to_string(), vector);
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "static"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vectors
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .ok_or_else(|| Error::EmbeddingUnavailable(format!("no vector for '{text}'")))
    }
}

/// Embedder that is always down
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn dimension(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::EmbeddingUnavailable("backend down".to_string()))
    }
}

/// In-memory store that records queries and can be switched off
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryChunkStore,
    pub queried: Mutex<Vec<Partition>>,
    pub unavailable: AtomicBool,
    pub fail_next: AtomicUsize,
    pub failing_queries: Mutex<HashSet<Partition>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queried(&self) -> Vec<Partition> {
        self.queried.lock().unwrap().clone()
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Fail the next `n` operations with a transient error
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn fail_queries_for(&self, partition: Partition) {
        self.failing_queries.lock().unwrap().insert(partition);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable("index offline".to_string()));
        }
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::StorageUnavailable("index busy".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkStore for RecordingStore {
    async fn put(&self, item: MemoryItem) -> Result<()> {
        self.check()?;
        self.inner.put(item).await
    }

    async fn get(&self, id: &Uuid) -> Result<Option<MemoryItem>> {
        self.check()?;
        self.inner.get(id).await
    }

    async fn query(&self, query: ChunkQuery<'_>) -> Result<Vec<(MemoryItem, f64)>> {
        self.queried.lock().unwrap().push(query.partition);
        self.check()?;
        if self.failing_queries.lock().unwrap().contains(&query.partition) {
            return Err(Error::StorageUnavailable(format!(
                "{} index offline",
                query.partition
            )));
        }
        self.inner.query(query).await
    }

    async fn count(&self, partition: Partition) -> Result<usize> {
        self.check()?;
        self.inner.count(partition).await
    }

    async fn delete_batch(&self, ids: &[Uuid]) -> Result<usize> {
        self.check()?;
        self.inner.delete_batch(ids).await
    }

    async fn replace_batch(&self, ids: &[Uuid], summary: MemoryItem) -> Result<usize> {
        self.check()?;
        self.inner.replace_batch(ids, summary).await
    }

    async fn all_items(&self, partition: Partition) -> Result<Vec<MemoryItem>> {
        self.check()?;
        self.inner.all_items(partition).await
    }

    async fn clear(&self, partition: Partition) -> Result<usize> {
        self.check()?;
        self.inner.clear(partition).await
    }

    async fn restore(&self, partition: Partition, items: Vec<MemoryItem>) -> Result<()> {
        self.check()?;
        self.inner.restore(partition, items).await
    }
}

/// Summarizer failing its first `failures` calls
pub struct ScriptedSummarizer {
    failures: usize,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub batch_sizes: Mutex<Vec<usize>>,
}

impl ScriptedSummarizer {
    pub fn succeeding() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            delay: None,
            calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::succeeding()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn condense(&self, texts: &[String]) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(texts.len());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if call < self.failures {
            return Err(Error::SummarizationFailed(format!("scripted failure {}", call + 1)));
        }
        Ok(format!("summary of {} items", texts.len()))
    }
}
