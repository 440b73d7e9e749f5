//! Checkpoint contract.
//!
//! A checkpoint is the persisted upper bound ("watermark") of every physical
//! value a stream has handed out. Saves are compare-and-swap against the
//! version that was last read; this is the only thing that keeps two
//! processes from both believing they own a stream.

use async_trait::async_trait;
use thiserror::Error;

use crate::stream::StreamKey;

/// Durable record for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Every physical value issued on the stream is below this.
    pub saved_physical: i64,
    /// Optimistic concurrency token, incremented by every successful save.
    pub version: u64,
}

/// Error type for checkpoint store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another save succeeded since `expected` was read.
    #[error("checkpoint version conflict: expected {expected}, found {actual:?}")]
    VersionConflict { expected: u64, actual: Option<u64> },

    /// The backend could not be reached; the operation may be retried.
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

impl StoreError {
    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::VersionConflict { .. } => false,
            Self::Unavailable(_) | Self::Pool(_) => true,
            Self::Database(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
        }
    }
}

/// Linearizable, versioned storage of one checkpoint per stream.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for `stream`, or `None` if it was never saved.
    async fn load(&self, stream: &StreamKey) -> Result<Option<Checkpoint>, StoreError>;

    /// Save `saved_physical` if the stored version still equals
    /// `expected_version` (`0` meaning "not saved yet").
    ///
    /// Returns the new version.
    async fn save(
        &self,
        stream: &StreamKey,
        saved_physical: i64,
        expected_version: u64,
    ) -> Result<u64, StoreError>;
}
