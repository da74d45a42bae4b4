//! Stream contract: a partition viewed as a unit of work.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::store::{AppendOutcome, Index, Subscriber};

use super::errors::StreamResult;

/// Cached version of a stream that has not been read yet.
pub const UNKNOWN_VERSION: Index = -1;

/// One partition of the store, read and written as a unit.
///
/// `read` and `append` take `&mut self` because some implementations keep
/// per-handle state (an optimistic stream caches the version it saw).
/// Handles are cheap; create one per unit of work rather than sharing.
#[async_trait]
pub trait Stream: Send {
    fn partition_id(&self) -> &str;

    fn is_writable(&self) -> bool {
        true
    }

    /// Deliver the chunks with indexes in `from_index..=to_index`,
    /// ascending.
    async fn read(
        &mut self,
        from_index: Index,
        to_index: Index,
        subscriber: &mut dyn Subscriber,
        token: &CancellationToken,
    ) -> StreamResult<()>;

    /// Append one chunk. The index strategy is the implementation's:
    /// backend-assigned for a plain partition stream, version-checked for
    /// an optimistic one.
    async fn append(
        &mut self,
        payload: Value,
        operation_id: Option<String>,
    ) -> StreamResult<AppendOutcome>;

    /// Remove every chunk of the stream.
    async fn delete(&mut self) -> StreamResult<()>;

    /// Index of the most recent chunk, `None` for an empty stream.
    async fn last_index(&self) -> StreamResult<Option<Index>>;
}
