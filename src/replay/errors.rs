//! Replay error types.

use std::error::Error as StdError;

use thiserror::Error;

use crate::snapshot::SnapshotError;
use crate::store::Index;
use crate::stream::StreamError;

/// Convenience alias for replay operations.
pub type ReplayResult<T> = Result<T, ReplayError>;

#[derive(Debug, Error)]
pub enum ReplayError {
    // ==================
    // Fold Failures
    // ==================
    #[error("Reducer failed at index {index}: {source}")]
    Reducer {
        index: Index,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The snapshot claims a version beyond the stream's current tail, so
    /// the stream was deleted or trimmed after the snapshot was taken.
    /// Delete the snapshot before folding again.
    #[error("Snapshot '{snapshot_id}' at version {snapshot_version} is ahead of its stream")]
    StaleSnapshot {
        snapshot_id: String,
        snapshot_version: Index,
    },

    // ==================
    // Passthrough
    // ==================
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}
