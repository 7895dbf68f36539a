//! memtier error types

use thiserror::Error;

/// memtier error type
#[derive(Error, Debug)]
pub enum Error {
    /// The chunk store backend could not be reached
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Text could not be vectorized
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Overflow condensation failed after all retries
    #[error("Summarization failed: {0}")]
    SummarizationFailed(String),

    /// A destructive operation was attempted without authorization
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Snapshot capture or load failed
    #[error("Snapshot IO failed: {0}")]
    SnapshotIo(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid memory item or request
    #[error("Memory error: {0}")]
    Memory(String),

    /// Controller is not accepting traffic
    #[error("Controller not running: {0}")]
    NotRunning(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry may change the outcome.
    ///
    /// Permission and embedding failures are surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::StorageUnavailable(_) | Error::SummarizationFailed(_)
        )
    }
}

/// Result type alias for memtier operations
pub type Result<T> = std::result::Result<T, Error>;
