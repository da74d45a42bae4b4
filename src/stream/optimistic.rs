//! Optimistic-concurrency stream.
//!
//! The handle caches the stream version it last observed and appends at
//! exactly `version + 1`. When another writer got there first the backend
//! reports `DuplicateStreamIndex`; the caller re-reads and retries its
//! unit of work against the fresh state.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::store::{AppendOutcome, Chunk, ChunkStore, Index, StoreError, StoreResult, Subscriber};

use super::contract::{Stream, UNKNOWN_VERSION};
use super::errors::{StreamError, StreamResult};

/// Stream handle that enforces read-before-append and appends with an
/// explicit expected index.
pub struct OptimisticStream {
    store: Arc<dyn ChunkStore>,
    partition_id: String,
    version: Index,
}

impl OptimisticStream {
    pub fn new(store: Arc<dyn ChunkStore>, partition_id: impl Into<String>) -> Self {
        Self {
            store,
            partition_id: partition_id.into(),
            version: UNKNOWN_VERSION,
        }
    }

    /// The version this handle observed, [`UNKNOWN_VERSION`] before the
    /// first establishing read.
    pub fn version(&self) -> Index {
        self.version
    }
}

/// Wraps the caller's subscriber to record how far the scan got and
/// whether it ran to completion.
struct VersionTracker<'a> {
    target: &'a mut dyn Subscriber,
    last_index: Index,
    completed: bool,
}

#[async_trait]
impl Subscriber for VersionTracker<'_> {
    async fn on_start(&mut self, position: i64) -> StoreResult<()> {
        self.target.on_start(position).await
    }

    async fn on_next(&mut self, chunk: Chunk) -> StoreResult<bool> {
        let index = chunk.index;
        let keep_going = self.target.on_next(chunk).await?;
        self.last_index = index;
        Ok(keep_going)
    }

    async fn on_completed(&mut self, position: i64) -> StoreResult<()> {
        self.completed = true;
        self.target.on_completed(position).await
    }

    async fn on_stopped(&mut self, position: i64) -> StoreResult<()> {
        self.target.on_stopped(position).await
    }

    async fn on_error(&mut self, position: i64, error: &StoreError) {
        self.target.on_error(position, error).await
    }
}

#[async_trait]
impl Stream for OptimisticStream {
    fn partition_id(&self) -> &str {
        &self.partition_id
    }

    /// Reads to `i64::MAX` that run to completion establish the version:
    /// the last index the scan delivered, or 0 when the range was empty.
    /// Bounded or stopped reads leave the cached version alone.
    async fn read(
        &mut self,
        from_index: Index,
        to_index: Index,
        subscriber: &mut dyn Subscriber,
        token: &CancellationToken,
    ) -> StreamResult<()> {
        let mut tracker = VersionTracker {
            target: subscriber,
            last_index: 0,
            completed: false,
        };
        self.store
            .read_forward(&self.partition_id, from_index, to_index, None, &mut tracker, token)
            .await?;
        if to_index == i64::MAX && tracker.completed {
            self.version = tracker.last_index;
        }
        Ok(())
    }

    async fn append(
        &mut self,
        payload: Value,
        operation_id: Option<String>,
    ) -> StreamResult<AppendOutcome> {
        if self.version < 0 {
            return Err(StreamError::AppendBeforeRead {
                partition_id: self.partition_id.clone(),
            });
        }
        let next = self.version + 1;
        let outcome = self
            .store
            .append(&self.partition_id, next, payload, operation_id)
            .await?;
        // An idempotent replay did not write; the cached version must not
        // move past state this handle has not seen.
        if outcome.is_applied() {
            self.version = next;
        }
        Ok(outcome)
    }

    async fn delete(&mut self) -> StreamResult<()> {
        self.store.delete(&self.partition_id, 0, i64::MAX).await?;
        self.version = UNKNOWN_VERSION;
        Ok(())
    }

    async fn last_index(&self) -> StreamResult<Option<Index>> {
        let chunk = self
            .store
            .read_last_chunk(&self.partition_id, i64::MAX)
            .await?;
        Ok(chunk.map(|c| c.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::store::Collector;
    use serde_json::json;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    async fn establish(stream: &mut OptimisticStream) {
        let mut collector = Collector::new();
        stream
            .read(1, i64::MAX, &mut collector, &token())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_before_read_is_rejected() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let mut stream = OptimisticStream::new(store, "cart-1");

        let err = stream.append(json!(1), None).await.unwrap_err();
        assert!(matches!(err, StreamError::AppendBeforeRead { .. }));
    }

    #[tokio::test]
    async fn test_read_establishes_version_then_appends() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let mut stream = OptimisticStream::new(store, "cart-1");

        establish(&mut stream).await;
        assert_eq!(stream.version(), 0);

        let chunk = stream
            .append(json!({ "item": "a" }), None)
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(chunk.index, 1);
        assert_eq!(stream.version(), 1);
    }

    #[tokio::test]
    async fn test_bounded_read_does_not_establish_version() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let mut writer = OptimisticStream::new(Arc::clone(&store), "cart-1");
        establish(&mut writer).await;
        writer.append(json!(1), None).await.unwrap();
        writer.append(json!(2), None).await.unwrap();

        let mut reader = OptimisticStream::new(store, "cart-1");
        let mut collector = Collector::new();
        reader.read(1, 1, &mut collector, &token()).await.unwrap();
        assert_eq!(collector.len(), 1);
        assert_eq!(reader.version(), UNKNOWN_VERSION);
    }

    #[tokio::test]
    async fn test_losing_writer_gets_duplicate_index() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let mut left = OptimisticStream::new(Arc::clone(&store), "cart-1");
        let mut right = OptimisticStream::new(store, "cart-1");
        establish(&mut left).await;
        establish(&mut right).await;

        left.append(json!("left"), None).await.unwrap();
        let err = right.append(json!("right"), None).await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::Store(StoreError::DuplicateStreamIndex { index: 1, .. })
        ));

        // Re-reading picks up the winner's write and the retry lands.
        establish(&mut right).await;
        let chunk = right
            .append(json!("right"), None)
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(chunk.index, 2);
    }

    #[tokio::test]
    async fn test_replayed_operation_keeps_version() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let mut stream = OptimisticStream::new(store, "cart-1");
        establish(&mut stream).await;

        stream
            .append(json!(1), Some("op-1".to_string()))
            .await
            .unwrap();
        let outcome = stream
            .append(json!(1), Some("op-1".to_string()))
            .await
            .unwrap();
        assert_eq!(outcome, AppendOutcome::AlreadyApplied);
        assert_eq!(stream.version(), 1);
    }

    #[tokio::test]
    async fn test_delete_resets_version() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let mut stream = OptimisticStream::new(store, "cart-1");
        establish(&mut stream).await;
        stream.append(json!(1), None).await.unwrap();

        stream.delete().await.unwrap();
        assert_eq!(stream.version(), UNKNOWN_VERSION);

        let err = stream.append(json!(2), None).await.unwrap_err();
        assert!(matches!(err, StreamError::AppendBeforeRead { .. }));
    }
}
