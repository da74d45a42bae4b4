//! Stream-level error types.

use thiserror::Error;

use crate::store::StoreError;

/// Convenience alias for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    // ==================
    // Usage Errors
    // ==================
    /// An optimistic stream must observe its current version through an
    /// unbounded read before it may append.
    #[error("Stream '{partition_id}' has no established version; read it before appending")]
    AppendBeforeRead { partition_id: String },

    #[error("Stream '{partition_id}' is read-only")]
    ReadOnly { partition_id: String },

    // ==================
    // Passthrough
    // ==================
    #[error(transparent)]
    Store(#[from] StoreError),
}
