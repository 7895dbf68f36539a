//! Tiered memory: three prioritized partitions behind one controller
//!
//! Self-Knowledge (highest priority): what the agent learned about itself.
//! User: per-user history and preferences.
//! Environment (lowest priority): sensor, API and webhook observations.

pub mod classifier;
pub mod controller;
pub mod embedder;
pub mod item;
pub mod overflow;
pub mod reset;
pub mod retrieval;
pub mod snapshot;
pub mod store;
pub mod summarizer;

#[cfg(test)]
mod testing;

pub use classifier::{Classification, ClassificationSource, Classifier};
pub use controller::{
    ControllerState, MemoryController, MemoryInput, MemoryStats, PartitionStats, StoreReceipt,
};
pub use embedder::{Embedder, HashEmbedder, HttpEmbedder};
pub use item::{Category, MemoryItem, MemoryItemBuilder, Partition, RetrievalResult, ScoredItem};
pub use overflow::{OverflowManager, OverflowOutcome};
pub use reset::{ResetGate, ResetReport};
pub use retrieval::RetrievalEngine;
pub use snapshot::{SnapshotArchive, SnapshotInfo, SnapshotManager, SnapshotMode, SnapshotState};
pub use store::{ChunkQuery, ChunkStore, InMemoryChunkStore, PartitionLocks};
pub use summarizer::{ExtractiveSummarizer, HttpSummarizer, Summarizer};
