//! Store-level error types.

use thiserror::Error;

use super::chunk::Index;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by backend adapters.
///
/// A duplicate operation id is deliberately absent here: it is reported as
/// an outcome (`AppendOutcome::AlreadyApplied`), not an error.
#[derive(Debug, Error)]
pub enum StoreError {
    // ==================
    // Constraint Errors
    // ==================
    /// An explicit-index append, or an auto-indexed append that exhausted
    /// its retry budget, collided on `(partition_id, index)`.
    #[error("Duplicate index {index} in partition '{partition_id}'")]
    DuplicateStreamIndex { partition_id: String, index: Index },

    /// A delete matched no chunks.
    #[error("Delete matched nothing in partition '{partition_id}' (indexes {from}..={to})")]
    DeleteEmpty {
        partition_id: String,
        from: Index,
        to: Index,
    },

    // ==================
    // Scan Errors
    // ==================
    /// The cancellation token was already triggered when the operation
    /// started.
    #[error("Operation cancelled")]
    Cancelled,

    /// A subscriber callback failed while consuming a scan.
    #[error("Subscriber failed")]
    Subscriber(#[source] Box<dyn std::error::Error + Send + Sync>),

    // ==================
    // Durability Errors
    // ==================
    /// A persisted record or file header failed validation.
    #[error("Corrupt store data at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// A persisted record carries a codec tag no configured codec accepts.
    #[error("Unknown payload codec tag '{0}'")]
    UnknownCodec(String),

    /// Payload encoding or decoding failed.
    #[error("Payload codec failure")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A failed durable write could not be rolled back. Later writes
    /// would land behind torn bytes and be truncated away on recovery,
    /// so the store refuses them until it is reopened.
    #[error("Store closed to writes: {reason}")]
    Closed { reason: String },

    // ==================
    // Internal Errors
    // ==================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Another thread panicked while holding the store state lock.
    pub(crate) fn poisoned() -> Self {
        Self::Internal("store state lock poisoned".to_string())
    }
}
