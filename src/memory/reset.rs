//! Authorization gate for destructive operations
//!
//! Two distinct operations with independent authorization:
//!
//! - **Tier reset** clears User and/or Environment. Always permitted, but
//!   never touches Self-Knowledge.
//! - **Full reset** clears every partition, Self-Knowledge included. Only
//!   permitted when `allow_full_reset` is asserted.
//!
//! A user-scoped reset removes one user's items from the User partition.

use super::item::Partition;
use super::store::{ChunkStore, PartitionLocks};
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Default attempts for a storage call failing transiently
const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(200);

/// Items removed by a reset, per partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub removed: BTreeMap<Partition, usize>,
}

impl ResetReport {
    /// Items removed across all partitions
    pub fn total(&self) -> usize {
        self.removed.values().sum()
    }

    /// Items removed from `partition`
    pub fn removed_from(&self, partition: Partition) -> usize {
        self.removed.get(&partition).copied().unwrap_or(0)
    }
}

/// Gatekeeper for tier, user and full resets
pub struct ResetGate {
    store: Arc<dyn ChunkStore>,
    locks: Arc<PartitionLocks>,
    allow_full_reset: bool,
    max_attempts: u32,
    backoff: Duration,
}

impl ResetGate {
    pub fn new(store: Arc<dyn ChunkStore>, locks: Arc<PartitionLocks>, allow_full_reset: bool) -> Self {
        Self {
            store,
            locks,
            allow_full_reset,
            max_attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Override the transient-failure retry policy
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Whether `reset_all` is authorized
    pub fn full_reset_allowed(&self) -> bool {
        self.allow_full_reset
    }

    /// Clear the named partitions. Self-Knowledge cannot be named here.
    pub async fn reset_tiers(&self, partitions: &[Partition]) -> Result<ResetReport> {
        if partitions.contains(&Partition::SelfKnowledge) {
            tracing::warn!("Tier reset naming self_knowledge rejected");
            return Err(Error::PermissionDenied(
                "self_knowledge can only be cleared by a full reset".to_string(),
            ));
        }

        let report = self.clear_partitions(partitions).await?;
        tracing::warn!(
            partitions = ?partitions,
            removed = report.total(),
            "Tier reset completed"
        );
        Ok(report)
    }

    /// Clear every partition, Self-Knowledge included
    pub async fn reset_all(&self) -> Result<ResetReport> {
        if !self.allow_full_reset {
            tracing::warn!("Full reset rejected: allow_full_reset is not set");
            return Err(Error::PermissionDenied(
                "full reset requires allow_full_reset".to_string(),
            ));
        }

        let report = self.clear_partitions(&Partition::ALL).await?;
        tracing::warn!(removed = report.total(), "Full reset completed");
        Ok(report)
    }

    /// Remove every User item owned by `user_id`, shared summaries included
    pub async fn reset_user(&self, user_id: &str) -> Result<ResetReport> {
        if user_id.trim().is_empty() {
            return Err(Error::Memory("user_id is required".to_string()));
        }

        let _guard = self.locks.lock(Partition::User).await?;
        let items = self
            .retry(|| self.store.all_items(Partition::User))
            .await?;
        let ids: Vec<Uuid> = items
            .iter()
            .filter(|i| i.is_owned_by(user_id))
            .map(|i| i.id)
            .collect();

        let removed = if ids.is_empty() {
            0
        } else {
            self.retry(|| self.store.delete_batch(&ids)).await?
        };

        let mut report = ResetReport::default();
        report.removed.insert(Partition::User, removed);
        tracing::warn!(user_id, removed, "User reset completed");
        Ok(report)
    }

    async fn clear_partitions(&self, partitions: &[Partition]) -> Result<ResetReport> {
        let _guards = self.locks.lock_many(partitions).await?;

        let mut targets = partitions.to_vec();
        targets.sort();
        targets.dedup();

        let mut report = ResetReport::default();
        for partition in targets {
            let removed = self.retry(|| self.store.clear(partition)).await?;
            report.removed.insert(partition, removed);
        }
        Ok(report)
    }

    /// Run `op`, retrying transient failures with exponential backoff
    async fn retry<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                    tracing::warn!(attempt, error = %e, ?delay, "Storage call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
