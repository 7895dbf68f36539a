//! memtier - Tiered Memory Controller for Autonomous Agents
//!
//! memtier gives a long-running agent a memory that is organised by how much
//! each piece of knowledge matters, and keeps itself bounded.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                       MemoryController                          │
//! │                                                                 │
//! │   store(input)                          retrieve(query, k)      │
//! │        │                                        │               │
//! │  ┌─────▼──────┐   ┌──────────┐         ┌────────▼─────────┐     │
//! │  │ Classifier │──▶│ Embedder │         │ Retrieval Engine │     │
//! │  └────────────┘   └────┬─────┘         │  SK → User → Env │     │
//! │                        │               └────────┬─────────┘     │
//! │  ┌─────────────────────▼────────────────────────▼──────────┐    │
//! │  │                     Chunk Store                          │    │
//! │  │   Self-Knowledge   │      User       │   Environment     │    │
//! │  └─────▲───────────────────▲──────────────────▲────────────┘    │
//! │        │                   │                  │                 │
//! │  ┌─────┴──────────┐ ┌──────┴───────────┐ ┌────┴─────────────┐   │
//! │  │ Overflow Mgr   │ │ Snapshot Manager │ │ Reset Gate       │   │
//! │  │ (Summarizer)   │ │ (gzip archives)  │ │ (consent check)  │   │
//! │  └────────────────┘ └──────────────────┘ └──────────────────┘   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! ### Cascading Retrieval
//! - Partitions searched in priority order, each at its own threshold
//! - Lower partitions only fill what higher ones could not
//!
//! ### Bounded Growth
//! - Oldest items condensed into summaries when a partition overflows
//! - Summaries replace their originals atomically
//!
//! ### Durability and Safety
//! - Periodic and manual compressed snapshots, restored on start
//! - Full wipe requires environment-asserted consent
//!
//! ## Modules
//!
//! - [`memory`]: Partitions, store, classifier, retrieval, overflow, snapshots, resets
//! - [`config`]: Configuration management
//! - [`error`]: Error types

pub mod config;
pub mod error;
pub mod memory;

pub use config::MemTierConfig;
pub use error::{Error, Result};
pub use memory::{MemoryController, MemoryInput, Partition};
