//! Snapshot error types.

use thiserror::Error;

use crate::store::StoreError;

/// Convenience alias for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

#[derive(Debug, Error)]
pub enum SnapshotError {
    // ==================
    // State Encoding
    // ==================
    #[error("Snapshot state encoding failed: {0}")]
    Payload(#[from] serde_json::Error),

    // ==================
    // Passthrough
    // ==================
    #[error(transparent)]
    Store(#[from] StoreError),
}
