//! Compressed point-in-time snapshots of every partition
//!
//! A snapshot is a gzip-compressed JSON `SnapshotArchive` written under a
//! timestamped file name. Archives are written to a temporary file and renamed
//! into place, so a partial file is never picked up as the latest snapshot.
//!
//! Automatic snapshots are pruned down to the configured retention; manual
//! snapshots are kept until removed by hand.

use super::item::{MemoryItem, Partition};
use super::store::{ChunkStore, PartitionLocks};
use crate::config::{PartitionsConfig, SnapshotConfig};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Archive format version written by this build
pub const SNAPSHOT_VERSION: u32 = 1;

const FILE_PREFIX: &str = "memtier-";
const FILE_SUFFIX: &str = ".json.gz";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

/// Who requested a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    Auto,
    Manual,
}

impl SnapshotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotMode::Auto => "auto",
            SnapshotMode::Manual => "manual",
        }
    }
}

impl fmt::Display for SnapshotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Snapshot manager state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SnapshotState {
    Idle = 0,
    /// Enumerating partitions under their write locks
    Capturing = 1,
    /// Compressing and writing the archive
    Writing = 2,
}

impl SnapshotState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SnapshotState::Capturing,
            2 => SnapshotState::Writing,
            _ => SnapshotState::Idle,
        }
    }
}

/// Items of one partition inside an archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSection {
    pub partition: Partition,
    pub namespace: String,
    pub items: Vec<MemoryItem>,
}

/// On-disk snapshot payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotArchive {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub mode: SnapshotMode,
    /// SHA-256 hex digest of the canonical JSON of `partitions`
    pub checksum: String,
    pub partitions: Vec<PartitionSection>,
}

impl SnapshotArchive {
    /// Build an archive, computing its checksum
    pub fn new(
        mode: SnapshotMode,
        created_at: DateTime<Utc>,
        partitions: Vec<PartitionSection>,
    ) -> Result<Self> {
        let checksum = checksum(&partitions)?;
        Ok(Self {
            version: SNAPSHOT_VERSION,
            created_at,
            mode,
            checksum,
            partitions,
        })
    }

    /// Check version, checksum and section consistency
    pub fn verify(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(Error::SnapshotIo(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        let actual = checksum(&self.partitions)?;
        if actual != self.checksum {
            return Err(Error::SnapshotIo(format!(
                "checksum mismatch: expected {}, found {}",
                self.checksum, actual
            )));
        }

        let mut seen = Vec::new();
        for section in &self.partitions {
            if seen.contains(&section.partition) {
                return Err(Error::SnapshotIo(format!(
                    "partition {} appears twice",
                    section.partition
                )));
            }
            seen.push(section.partition);
            if let Some(bad) = section
                .items
                .iter()
                .find(|i| i.partition != section.partition || i.embedding.is_empty())
            {
                return Err(Error::SnapshotIo(format!(
                    "item {} does not belong in section {}",
                    bad.id, section.partition
                )));
            }
        }
        Ok(())
    }

    /// Items stored for `partition`
    pub fn items_for(&self, partition: Partition) -> Vec<MemoryItem> {
        self.partitions
            .iter()
            .find(|s| s.partition == partition)
            .map(|s| s.items.clone())
            .unwrap_or_default()
    }

    /// Item count per partition
    pub fn counts(&self) -> BTreeMap<Partition, usize> {
        Partition::ALL
            .iter()
            .map(|p| {
                let n = self
                    .partitions
                    .iter()
                    .find(|s| s.partition == *p)
                    .map_or(0, |s| s.items.len());
                (*p, n)
            })
            .collect()
    }

    /// Gzip-compressed JSON encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&json)
            .map_err(|e| Error::SnapshotIo(format!("compression failed: {}", e)))?;
        encoder
            .finish()
            .map_err(|e| Error::SnapshotIo(format!("compression failed: {}", e)))
    }

    /// Decode and verify an archive
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut json = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut json)
            .map_err(|e| Error::SnapshotIo(format!("decompression failed: {}", e)))?;
        let archive: SnapshotArchive = serde_json::from_slice(&json)
            .map_err(|e| Error::SnapshotIo(format!("malformed archive: {}", e)))?;
        archive.verify()?;
        Ok(archive)
    }

    /// Read, decode and verify an archive file
    pub async fn read_from(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| io_error(path, "read", e))?;
        Self::decode(&bytes)
    }
}

/// Digest over `serde_json::Value`, whose maps are key-sorted, so metadata
/// order does not affect the result.
fn checksum(partitions: &[PartitionSection]) -> Result<String> {
    let canonical = serde_json::to_vec(&serde_json::to_value(partitions)?)?;
    let digest = Sha256::digest(&canonical);
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

fn io_error(path: &Path, action: &str, e: std::io::Error) -> Error {
    Error::SnapshotIo(format!("failed to {} {}: {}", action, path.display(), e))
}

/// A snapshot file on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub mode: SnapshotMode,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// File name for a snapshot taken at `at`
pub fn snapshot_file_name(at: DateTime<Utc>, mode: SnapshotMode) -> String {
    format!(
        "{}{}-{}{}",
        FILE_PREFIX,
        at.format(TIMESTAMP_FORMAT),
        mode.as_str(),
        FILE_SUFFIX
    )
}

/// Parse a snapshot file name, `None` if it does not follow the scheme
pub fn parse_file_name(name: &str) -> Option<(DateTime<Utc>, SnapshotMode)> {
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    let (timestamp, mode) = stem.rsplit_once('-')?;
    let mode = match mode {
        "auto" => SnapshotMode::Auto,
        "manual" => SnapshotMode::Manual,
        _ => return None,
    };
    let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    Some((Utc.from_utc_datetime(&naive), mode))
}

/// Resets the manager to `Idle` when a capture ends, however it ends
struct StateGuard<'a>(&'a AtomicU8);

impl<'a> StateGuard<'a> {
    fn enter(state: &'a AtomicU8, next: SnapshotState) -> Self {
        state.store(next as u8, Ordering::SeqCst);
        Self(state)
    }

    fn set(&self, next: SnapshotState) {
        self.0.store(next as u8, Ordering::SeqCst);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.0.store(SnapshotState::Idle as u8, Ordering::SeqCst);
    }
}

/// Captures, lists, prunes and restores snapshots
pub struct SnapshotManager {
    store: Arc<dyn ChunkStore>,
    locks: Arc<PartitionLocks>,
    config: SnapshotConfig,
    namespaces: BTreeMap<Partition, String>,
    state: AtomicU8,
    capture_lock: Mutex<()>,
}

impl SnapshotManager {
    /// Create a manager writing into `config.dir`
    pub fn new(
        store: Arc<dyn ChunkStore>,
        locks: Arc<PartitionLocks>,
        config: SnapshotConfig,
        partitions: &PartitionsConfig,
    ) -> Self {
        let namespaces = BTreeMap::from([
            (
                Partition::SelfKnowledge,
                partitions.self_knowledge.namespace.clone(),
            ),
            (Partition::User, partitions.user.namespace.clone()),
            (Partition::Environment, partitions.environment.namespace.clone()),
        ]);
        Self {
            store,
            locks,
            config,
            namespaces,
            state: AtomicU8::new(SnapshotState::Idle as u8),
            capture_lock: Mutex::new(()),
        }
    }

    /// Snapshot directory
    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Current state
    pub fn state(&self) -> SnapshotState {
        SnapshotState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Capture every partition and write a new archive.
    ///
    /// Partition write locks are held only while items are enumerated.
    /// Concurrent calls are serialized.
    pub async fn capture(&self, mode: SnapshotMode) -> Result<SnapshotInfo> {
        let _serial = self.capture_lock.lock().await;
        let state = StateGuard::enter(&self.state, SnapshotState::Capturing);

        let mut sections = Vec::with_capacity(Partition::ALL.len());
        {
            let _guards = self.locks.lock_many(&Partition::ALL).await?;
            for partition in Partition::ALL {
                let mut items = self.store.all_items(partition).await?;
                items.sort_by(|a, b| {
                    a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
                });
                sections.push(PartitionSection {
                    partition,
                    namespace: self.namespaces.get(&partition).cloned().unwrap_or_default(),
                    items,
                });
            }
        }

        state.set(SnapshotState::Writing);
        let created_at = Utc::now();
        let archive = SnapshotArchive::new(mode, created_at, sections)?;
        let bytes = archive.encode()?;
        let path = self.write_archive(created_at, mode, &bytes).await?;

        let info = SnapshotInfo {
            path,
            mode,
            created_at,
            size_bytes: bytes.len() as u64,
        };
        tracing::info!(
            path = %info.path.display(),
            mode = %mode,
            items = archive.counts().values().sum::<usize>(),
            size_bytes = info.size_bytes,
            "Snapshot written"
        );
        drop(state);

        // The archive is already in place; a pruning failure only delays cleanup
        if mode == SnapshotMode::Auto {
            if let Err(e) = self.prune().await {
                tracing::warn!(error = %e, "Snapshot written but pruning failed");
            }
        }
        Ok(info)
    }

    async fn write_archive(
        &self,
        created_at: DateTime<Utc>,
        mode: SnapshotMode,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = &self.config.dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_error(dir, "create", e))?;

        // Two captures in the same millisecond must not overwrite each other
        let mut at = created_at;
        let mut path = dir.join(snapshot_file_name(at, mode));
        while tokio::fs::metadata(&path).await.is_ok() {
            at += chrono::Duration::milliseconds(1);
            path = dir.join(snapshot_file_name(at, mode));
        }

        let tmp = dir.join(format!(
            ".{}.tmp",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("snapshot")
        ));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| io_error(&tmp, "write", e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(&path, "rename into", e));
        }
        Ok(path)
    }

    /// Snapshots in the directory, newest first
    pub async fn list(&self) -> Result<Vec<SnapshotInfo>> {
        list_snapshots(&self.config.dir).await
    }

    /// Delete automatic snapshots beyond the retention count
    pub async fn prune(&self) -> Result<usize> {
        let stale: Vec<SnapshotInfo> = self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.mode == SnapshotMode::Auto)
            .skip(self.config.retention)
            .collect();

        let mut removed = 0;
        for snapshot in &stale {
            match tokio::fs::remove_file(&snapshot.path).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(
                    path = %snapshot.path.display(),
                    error = %e,
                    "Failed to prune snapshot"
                ),
            }
        }
        if removed > 0 {
            tracing::debug!(removed, retention = self.config.retention, "Pruned snapshots");
        }
        Ok(removed)
    }

    /// Replace every partition with the content of the archive at `path`.
    ///
    /// Nothing is modified unless the archive decodes and verifies.
    pub async fn load(&self, path: &Path) -> Result<BTreeMap<Partition, usize>> {
        let archive = SnapshotArchive::read_from(path).await?;
        self.restore(&archive).await?;
        let counts = archive.counts();
        tracing::info!(path = %path.display(), ?counts, "Snapshot restored");
        Ok(counts)
    }

    /// Replace every partition with the content of `archive`
    pub async fn restore(&self, archive: &SnapshotArchive) -> Result<()> {
        archive.verify()?;
        let _guards = self.locks.lock_many(&Partition::ALL).await?;

        let mut previous = Vec::with_capacity(Partition::ALL.len());
        for partition in Partition::ALL {
            previous.push((partition, self.store.all_items(partition).await?));
        }

        for partition in Partition::ALL {
            if let Err(e) = self.store.restore(partition, archive.items_for(partition)).await {
                tracing::warn!(partition = %partition, error = %e, "Restore failed, rolling back");
                for (p, items) in previous {
                    if let Err(rollback) = self.store.restore(p, items).await {
                        tracing::warn!(partition = %p, error = %rollback, "Rollback failed");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Capture automatic snapshots every `interval` until `cancel` fires
    pub fn spawn_periodic(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Periodic snapshot task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = manager.capture(SnapshotMode::Auto).await {
                            tracing::warn!(error = %e, "Periodic snapshot failed, retrying next interval");
                        }
                    }
                }
            }
        })
    }
}

/// Snapshots found in `dir`, newest first. A missing directory is empty.
pub async fn list_snapshots(dir: &Path) -> Result<Vec<SnapshotInfo>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(dir, "read", e)),
    };

    let mut snapshots = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error(dir, "read", e))?
    {
        let name = entry.file_name();
        let Some((created_at, mode)) = name.to_str().and_then(parse_file_name) else {
            continue;
        };
        let size_bytes = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
        snapshots.push(SnapshotInfo {
            path: entry.path(),
            mode,
            created_at,
            size_bytes,
        });
    }

    snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.path.cmp(&a.path)));
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemTierConfig;
    use crate::memory::item::MemoryItemBuilder;
    use crate::memory::store::InMemoryChunkStore;
    use crate::memory::testing::RecordingStore;
    use tempfile::TempDir;

    fn manager_in(dir: &TempDir, store: Arc<dyn ChunkStore>, retention: usize) -> SnapshotManager {
        let config = MemTierConfig::default();
        SnapshotManager::new(
            store,
            Arc::new(PartitionLocks::new()),
            SnapshotConfig {
                dir: dir.path().to_path_buf(),
                interval_secs: 60,
                retention,
                restore_on_start: true,
            },
            &config.partitions,
        )
    }

    fn item(partition: Partition, content: &str) -> MemoryItem {
        MemoryItemBuilder::new(partition)
            .content(content)
            .embedding(vec![0.25, -0.5, 1.0])
            .metadata("tag", serde_json::json!({"b": 1, "a": [1, 2]}))
            .user_id("alice")
            .build()
            .unwrap()
    }

    async fn populated_store() -> Arc<InMemoryChunkStore> {
        let store = Arc::new(InMemoryChunkStore::new());
        store.put(item(Partition::SelfKnowledge, "I learned to ask first")).await.unwrap();
        store.put(item(Partition::User, "alice prefers tea")).await.unwrap();
        store.put(item(Partition::User, "alice lives in Lyon")).await.unwrap();
        store.put(item(Partition::Environment, "temperature 21C")).await.unwrap();
        store
    }

    #[test]
    fn test_file_name_roundtrip() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap()
            + chrono::Duration::milliseconds(89);
        let name = snapshot_file_name(at, SnapshotMode::Manual);
        assert_eq!(name, "memtier-20260304T050607.089Z-manual.json.gz");
        assert_eq!(parse_file_name(&name), Some((at, SnapshotMode::Manual)));

        assert!(parse_file_name("memtier-garbage-auto.json.gz").is_none());
        assert!(parse_file_name("memtier-20260304T050607.089Z-other.json.gz").is_none());
        assert!(parse_file_name("notes.txt").is_none());
    }

    #[test]
    fn test_file_names_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = early + chrono::Duration::seconds(1);
        assert!(
            snapshot_file_name(early, SnapshotMode::Manual)
                < snapshot_file_name(late, SnapshotMode::Auto)
        );
    }

    #[tokio::test]
    async fn test_capture_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = populated_store().await;
        let manager = manager_in(&dir, store.clone(), 5);

        let before: BTreeMap<_, _> = store
            .all_items(Partition::User)
            .await
            .unwrap()
            .into_iter()
            .map(|i| (i.id, i.content))
            .collect();

        let info = manager.capture(SnapshotMode::Manual).await.unwrap();
        assert_eq!(info.mode, SnapshotMode::Manual);
        assert!(info.size_bytes > 0);
        assert_eq!(manager.state(), SnapshotState::Idle);

        for p in Partition::ALL {
            store.clear(p).await.unwrap();
        }

        let counts = manager.load(&info.path).await.unwrap();
        assert_eq!(counts[&Partition::SelfKnowledge], 1);
        assert_eq!(counts[&Partition::User], 2);
        assert_eq!(counts[&Partition::Environment], 1);

        let after: BTreeMap<_, _> = store
            .all_items(Partition::User)
            .await
            .unwrap()
            .into_iter()
            .map(|i| (i.id, i.content))
            .collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_tampered_archive_is_rejected_without_changes() {
        let dir = TempDir::new().unwrap();
        let store = populated_store().await;
        let manager = manager_in(&dir, store.clone(), 5);
        let info = manager.capture(SnapshotMode::Manual).await.unwrap();

        let mut archive = SnapshotArchive::read_from(&info.path).await.unwrap();
        archive.partitions[1].items[0].content = "tampered".to_string();
        let bad_path = dir.path().join("tampered.json.gz");
        std::fs::write(&bad_path, archive.encode().unwrap()).unwrap();

        store.clear(Partition::Environment).await.unwrap();
        let result = manager.load(&bad_path).await;
        assert!(matches!(result, Err(Error::SnapshotIo(_))));
        assert_eq!(store.count(Partition::User).await.unwrap(), 2);
        assert_eq!(store.count(Partition::Environment).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_version_is_rejected() {
        let mut archive = SnapshotArchive::new(SnapshotMode::Manual, Utc::now(), Vec::new()).unwrap();
        archive.version = 99;
        let bytes = archive.encode().unwrap();
        assert!(matches!(
            SnapshotArchive::decode(&bytes),
            Err(Error::SnapshotIo(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_file_is_rejected() {
        assert!(matches!(
            SnapshotArchive::decode(b"not gzip at all"),
            Err(Error::SnapshotIo(_))
        ));
    }

    #[tokio::test]
    async fn test_retention_prunes_only_automatic() {
        let dir = TempDir::new().unwrap();
        let store = populated_store().await;
        let manager = manager_in(&dir, store, 2);

        manager.capture(SnapshotMode::Manual).await.unwrap();
        for _ in 0..4 {
            manager.capture(SnapshotMode::Auto).await.unwrap();
        }

        let snapshots = manager.list().await.unwrap();
        let autos = snapshots.iter().filter(|s| s.mode == SnapshotMode::Auto).count();
        let manuals = snapshots.iter().filter(|s| s.mode == SnapshotMode::Manual).count();
        assert_eq!(autos, 2);
        assert_eq!(manuals, 1);
    }

    #[tokio::test]
    async fn test_list_newest_first_and_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        let store = populated_store().await;
        let manager = manager_in(&dir, store, 5);

        std::fs::write(dir.path().join("README.txt"), "hello").unwrap();
        let first = manager.capture(SnapshotMode::Auto).await.unwrap();
        let second = manager.capture(SnapshotMode::Manual).await.unwrap();

        let snapshots = manager.list().await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].path, second.path);
        assert_eq!(snapshots[1].path, first.path);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prune_failure_keeps_written_snapshot() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = populated_store().await;
        let manager = manager_in(&dir, store, 1);

        // Writable but not listable, so pruning cannot enumerate archives
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o300)).unwrap();
        if std::fs::read_dir(dir.path()).is_ok() {
            // Permission bits are not enforced for this user
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700)).unwrap();
            return;
        }

        let result = manager.capture(SnapshotMode::Auto).await;
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700)).unwrap();

        let info = result.unwrap();
        assert!(info.path.exists());
        assert_eq!(manager.state(), SnapshotState::Idle);
        SnapshotArchive::read_from(&info.path).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_snapshots(&missing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capture_with_store_down_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RecordingStore::new());
        store.set_unavailable(true);
        let manager = manager_in(&dir, store, 5);

        let result = manager.capture(SnapshotMode::Manual).await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
        assert_eq!(manager.state(), SnapshotState::Idle);
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_periodic_task_captures_until_cancelled() {
        let dir = TempDir::new().unwrap();
        let store = populated_store().await;
        let manager = Arc::new(manager_in(&dir, store, 10));
        let cancel = CancellationToken::new();

        let handle = manager.spawn_periodic(Duration::from_millis(20), cancel.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        handle.await.unwrap();

        let taken = manager.list().await.unwrap().len();
        assert!(taken >= 1);
        assert!(manager.list().await.unwrap().iter().all(|s| s.mode == SnapshotMode::Auto));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(manager.list().await.unwrap().len(), taken);
    }
}
