//! Memory controller
//!
//! The explicitly constructed service instance that owns the chunk store and
//! wires classification, retrieval, overflow, snapshots and resets together.
//! Callers own the lifecycle: `start()` restores state and launches the
//! snapshot schedule, `stop()` cancels it. Every operation other than
//! `classify` requires a running controller.

use super::classifier::{Classification, ClassificationSource, Classifier};
use super::embedder::{Embedder, HashEmbedder, HttpEmbedder};
use super::item::{Category, MemoryItemBuilder, Partition, RetrievalResult};
use super::overflow::{OverflowManager, OverflowOutcome};
use super::reset::{ResetGate, ResetReport};
use super::retrieval::RetrievalEngine;
use super::snapshot::{SnapshotInfo, SnapshotManager, SnapshotMode};
use super::store::{ChunkStore, InMemoryChunkStore, PartitionLocks};
use super::summarizer::{ExtractiveSummarizer, HttpSummarizer, Summarizer};
use crate::config::MemTierConfig;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Content submitted for storage
#[derive(Debug, Clone, Default)]
pub struct MemoryInput {
    pub content: String,
    /// Partition name suggested by the caller
    pub partition_hint: Option<String>,
    pub user_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub source: Option<String>,
    pub confidence: Option<f32>,
}

impl MemoryInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.partition_hint = Some(hint.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// What happened to a stored item
#[derive(Debug, Clone)]
pub struct StoreReceipt {
    pub id: Uuid,
    pub partition: Partition,
    pub category: Category,
    pub classified_by: ClassificationSource,
    /// `None` when the overflow pass failed; the write itself succeeded
    pub overflow: Option<OverflowOutcome>,
}

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ControllerState {
    Created = 0,
    Running = 1,
    Stopped = 2,
}

impl ControllerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ControllerState::Running,
            2 => ControllerState::Stopped,
            _ => ControllerState::Created,
        }
    }
}

/// Occupancy of one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    pub count: usize,
    pub max_items: usize,
}

/// Controller statistics
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub state: ControllerState,
    pub partitions: BTreeMap<Partition, PartitionStats>,
}

impl MemoryStats {
    pub fn total(&self) -> usize {
        self.partitions.values().map(|p| p.count).sum()
    }
}

#[derive(Default)]
struct Background {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// Tiered memory service
pub struct MemoryController {
    config: MemTierConfig,
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    locks: Arc<PartitionLocks>,
    classifier: Classifier,
    retrieval: RetrievalEngine,
    overflow: OverflowManager,
    snapshots: Arc<SnapshotManager>,
    reset: ResetGate,
    state: AtomicU8,
    background: Mutex<Background>,
}

impl MemoryController {
    /// Wire a controller around explicit adapters
    pub fn new(
        config: MemTierConfig,
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Result<Self> {
        config.validate()?;
        let classifier = Classifier::new(config.classifier.rules.clone())?;
        let locks = Arc::new(PartitionLocks::new());

        let retrieval = RetrievalEngine::new(store.clone(), embedder.clone(), &config.partitions);
        let overflow = OverflowManager::new(
            store.clone(),
            locks.clone(),
            embedder.clone(),
            summarizer,
            config.partitions.clone(),
            config.overflow.clone(),
        );
        let snapshots = Arc::new(SnapshotManager::new(
            store.clone(),
            locks.clone(),
            config.snapshot.clone(),
            &config.partitions,
        ));
        let reset = ResetGate::new(store.clone(), locks.clone(), config.allow_full_reset);

        Ok(Self {
            config,
            store,
            embedder,
            locks,
            classifier,
            retrieval,
            overflow,
            snapshots,
            reset,
            state: AtomicU8::new(ControllerState::Created as u8),
            background: Mutex::new(Background::default()),
        })
    }

    /// Build a controller with an in-memory store and adapters chosen from
    /// configuration.
    ///
    /// Without a configured endpoint, development mode falls back to the
    /// local hashing embedder and extractive summarizer.
    pub fn from_config(config: MemTierConfig) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = match &config.embedding.endpoint {
            Some(_) => Arc::new(HttpEmbedder::from_config(&config.embedding)?),
            None if config.development_mode => {
                tracing::info!(
                    dimension = config.embedding.dimension,
                    "No embedding endpoint configured, using local hashing embedder"
                );
                Arc::new(HashEmbedder::new(config.embedding.dimension))
            }
            None => {
                return Err(Error::Config(
                    "embedding.endpoint is required outside development mode".to_string(),
                ))
            }
        };

        let summarizer: Arc<dyn Summarizer> = match &config.summarizer.endpoint {
            Some(_) => Arc::new(HttpSummarizer::from_config(&config.summarizer)?),
            None if config.development_mode => {
                tracing::info!("No summarizer endpoint configured, using extractive summarizer");
                Arc::new(ExtractiveSummarizer::default())
            }
            None => {
                return Err(Error::Config(
                    "summarizer.endpoint is required outside development mode".to_string(),
                ))
            }
        };

        Self::new(config, Arc::new(InMemoryChunkStore::new()), embedder, summarizer)
    }

    /// Effective configuration
    pub fn config(&self) -> &MemTierConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            ControllerState::Running => Ok(()),
            ControllerState::Created => Err(Error::NotRunning("call start() first".to_string())),
            ControllerState::Stopped => Err(Error::NotRunning("controller was stopped".to_string())),
        }
    }

    /// Restore from the latest snapshot if the store is empty, then start the
    /// periodic snapshot task when autonomy is enabled.
    ///
    /// Starting a running controller is a no-op; a stopped one cannot restart.
    pub async fn start(&self) -> Result<()> {
        let mut background = self.background.lock().await;
        match self.state() {
            ControllerState::Running => return Ok(()),
            ControllerState::Stopped => {
                return Err(Error::NotRunning("controller was stopped".to_string()))
            }
            ControllerState::Created => {}
        }

        if self.config.snapshot.restore_on_start {
            self.restore_latest().await?;
        }

        if self.config.autonomy_enabled {
            let cancel = CancellationToken::new();
            let interval = Duration::from_secs(self.config.snapshot.interval_secs);
            background.task = Some(self.snapshots.spawn_periodic(interval, cancel.clone()));
            background.cancel = Some(cancel);
            tracing::info!(
                interval_secs = self.config.snapshot.interval_secs,
                "Periodic snapshots enabled"
            );
        }

        self.state
            .store(ControllerState::Running as u8, Ordering::SeqCst);
        tracing::info!(
            development_mode = self.config.development_mode,
            autonomy = self.config.autonomy_enabled,
            embedder = self.embedder.model_name(),
            rules = self.classifier.rule_count(),
            full_reset_allowed = self.reset.full_reset_allowed(),
            "Memory controller started"
        );
        Ok(())
    }

    /// Load the newest readable snapshot into an empty store
    async fn restore_latest(&self) -> Result<()> {
        let mut existing = 0;
        for partition in Partition::ALL {
            existing += self.store.count(partition).await?;
        }
        if existing > 0 {
            tracing::debug!(existing, "Store not empty, skipping snapshot restore");
            return Ok(());
        }

        for snapshot in self.snapshots.list().await? {
            match self.snapshots.load(&snapshot.path).await {
                Ok(_) => return Ok(()),
                Err(e) => tracing::warn!(
                    path = %snapshot.path.display(),
                    error = %e,
                    "Skipping unreadable snapshot"
                ),
            }
        }
        tracing::info!(dir = %self.snapshots.dir().display(), "No snapshot restored, starting empty");
        Ok(())
    }

    /// Cancel background work and stop accepting traffic. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let mut background = self.background.lock().await;
        if let Some(cancel) = background.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = background.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Snapshot task ended abnormally");
            }
        }

        if self.state() != ControllerState::Stopped {
            self.state
                .store(ControllerState::Stopped as u8, Ordering::SeqCst);
            tracing::info!("Memory controller stopped");
        }
        Ok(())
    }

    /// Classify without storing
    pub fn classify(&self, text: &str, hint: Option<&str>) -> Classification {
        self.classifier.classify(text, hint)
    }

    /// Classify, embed and persist one item, then enforce capacity.
    ///
    /// A failed condensation is logged and leaves the partition temporarily
    /// over capacity; it never fails the write.
    pub async fn store(&self, input: MemoryInput) -> Result<StoreReceipt> {
        self.ensure_running()?;
        let content = input.content.trim();
        if content.is_empty() {
            return Err(Error::Memory("content is required".to_string()));
        }

        let classification = self
            .classifier
            .classify(content, input.partition_hint.as_deref());
        let embedding = self.embedder.embed(content).await?;
        if embedding.len() != self.embedder.dimension() {
            return Err(Error::EmbeddingUnavailable(format!(
                "expected dimension {}, got {}",
                self.embedder.dimension(),
                embedding.len()
            )));
        }

        let mut builder = MemoryItemBuilder::new(classification.partition)
            .content(content)
            .embedding(embedding)
            .category(classification.category)
            .metadata_map(input.metadata)
            .source(input.source.unwrap_or_default());
        if let Some(user_id) = input.user_id {
            builder = builder.user_id(user_id);
        }
        if let Some(confidence) = input.confidence {
            builder = builder.confidence(confidence);
        }
        let item = builder.build()?;
        let id = item.id;
        let partition = item.partition;

        {
            let _guard = self.locks.lock(partition).await?;
            self.store.put(item).await?;
        }

        let overflow = match self.overflow.check(partition).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(
                    partition = %partition,
                    error = %e,
                    "Overflow condensation failed, partition left over capacity"
                );
                None
            }
        };

        tracing::debug!(
            id = %id,
            partition = %partition,
            category = ?classification.category,
            "Stored memory item"
        );
        Ok(StoreReceipt {
            id,
            partition,
            category: classification.category,
            classified_by: classification.source,
            overflow,
        })
    }

    /// Cascading retrieval of up to `k` items
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        user_id: Option<&str>,
    ) -> Result<RetrievalResult> {
        self.ensure_running()?;
        self.retrieval.retrieve(query, k, user_id).await
    }

    /// Clear User and/or Environment
    pub async fn reset_tiers(&self, partitions: &[Partition]) -> Result<ResetReport> {
        self.ensure_running()?;
        self.reset.reset_tiers(partitions).await
    }

    /// Clear everything, Self-Knowledge included, if authorized
    pub async fn reset_all(&self) -> Result<ResetReport> {
        self.ensure_running()?;
        self.reset.reset_all().await
    }

    /// Remove one user's items
    pub async fn reset_user(&self, user_id: &str) -> Result<ResetReport> {
        self.ensure_running()?;
        self.reset.reset_user(user_id).await
    }

    /// Write a snapshot now.
    ///
    /// Automatic captures count toward retention and may prune older
    /// automatic archives; manual ones are kept until removed by hand.
    pub async fn create_snapshot(&self, mode: SnapshotMode) -> Result<SnapshotInfo> {
        self.ensure_running()?;
        self.snapshots.capture(mode).await
    }

    /// Snapshots on disk, newest first
    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>> {
        self.snapshots.list().await
    }

    /// Replace all partitions with the content of a snapshot
    pub async fn load_snapshot(&self, path: &Path) -> Result<BTreeMap<Partition, usize>> {
        self.ensure_running()?;
        self.snapshots.load(path).await
    }

    /// Per-partition counts and capacities
    pub async fn stats(&self) -> Result<MemoryStats> {
        let mut partitions = BTreeMap::new();
        for partition in Partition::ALL {
            partitions.insert(
                partition,
                PartitionStats {
                    count: self.store.count(partition).await?,
                    max_items: self.config.partition(partition).max_items,
                },
            );
        }
        Ok(MemoryStats {
            state: self.state(),
            partitions,
        })
    }
}
