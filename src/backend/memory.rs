//! In-memory backend adapter.
//!
//! The whole store is a [`ChunkIndex`] behind a mutex. Position allocation
//! and auto-index candidates are computed outside the state lock, exactly
//! as they are against a shared server, so the insert/conflict/retry
//! protocol runs for real under concurrent writers; only the constraint
//! check plus insert is atomic.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::index::{ChunkIndex, ConflictKind};
use super::scan::deliver;
use super::sequence::{LocalSequence, SequenceAllocator};
use crate::store::{
    AppendOutcome, Chunk, ChunkStore, Index, Position, StoreError, StoreResult, Subscriber,
    WriteOutcome, WriteRequest,
};

/// Tuning for [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Attempts at recomputing a backend-assigned index after an index
    /// collision before the conflict is surfaced.
    pub max_index_retries: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_index_retries: 10,
        }
    }
}

/// Volatile store for tests and ephemeral use.
pub struct MemoryStore {
    state: Mutex<ChunkIndex>,
    sequence: Arc<dyn SequenceAllocator>,
    config: MemoryConfig,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        Self::with_sequence(config, Arc::new(LocalSequence::new()))
    }

    /// Swap in a different position source, e.g. a counter shared by
    /// several stores that interleave into one logical log.
    pub fn with_sequence(config: MemoryConfig, sequence: Arc<dyn SequenceAllocator>) -> Self {
        Self {
            state: Mutex::new(ChunkIndex::new()),
            sequence,
            config,
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, ChunkIndex>> {
        self.state.lock().map_err(|_| StoreError::poisoned())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn append(
        &self,
        partition_id: &str,
        index: Index,
        payload: Value,
        operation_id: Option<String>,
    ) -> StoreResult<AppendOutcome> {
        let operation_id = operation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let auto = index < 0;
        let position = self.sequence.allocate().await?;
        let mut candidate = if auto {
            self.lock()?.last_index(partition_id) + 1
        } else {
            index
        };

        let mut attempt = 0u32;
        loop {
            let final_attempt = !auto || attempt >= self.config.max_index_retries;
            let chunk = Chunk {
                position,
                partition_id: partition_id.to_string(),
                index: candidate,
                operation_id: operation_id.clone(),
                payload: payload.clone(),
            };

            let conflict = {
                let mut state = self.lock()?;
                let conflict = state.check(partition_id, chunk.index, &operation_id);
                match conflict {
                    None => state.commit(chunk.clone()),
                    Some(ConflictKind::Operation) => state.commit(Chunk::filler(position)),
                    Some(ConflictKind::Index) => {
                        if final_attempt {
                            state.commit(Chunk::filler(position));
                        } else {
                            // Reload the authoritative tail for the retry.
                            candidate = state.last_index(partition_id) + 1;
                        }
                    }
                }
                conflict
            };

            match conflict {
                None => return Ok(AppendOutcome::Applied(chunk)),
                Some(ConflictKind::Operation) => {
                    debug!(
                        partition_id,
                        operation_id, position, "Duplicate operation, filler written"
                    );
                    return Ok(AppendOutcome::AlreadyApplied);
                }
                Some(ConflictKind::Index) if final_attempt => {
                    return Err(StoreError::DuplicateStreamIndex {
                        partition_id: chunk.partition_id,
                        index: chunk.index,
                    });
                }
                Some(ConflictKind::Index) => {
                    attempt += 1;
                    debug!(partition_id, candidate, attempt, "Index collision, retrying");
                }
            }
        }
    }

    async fn read_forward(
        &self,
        partition_id: &str,
        from_index: Index,
        to_index: Index,
        limit: Option<usize>,
        subscriber: &mut dyn Subscriber,
        token: &CancellationToken,
    ) -> StoreResult<()> {
        let page = self.lock()?.page_forward(partition_id, from_index, to_index, limit);
        deliver(subscriber, from_index, page, |c| c.index, token).await
    }

    async fn read_backward(
        &self,
        partition_id: &str,
        from_index: Index,
        to_index: Index,
        limit: Option<usize>,
        subscriber: &mut dyn Subscriber,
        token: &CancellationToken,
    ) -> StoreResult<()> {
        let page = self.lock()?.page_backward(partition_id, from_index, to_index, limit);
        deliver(subscriber, from_index, page, |c| c.index, token).await
    }

    async fn read_last_chunk(
        &self,
        partition_id: &str,
        max_index: Index,
    ) -> StoreResult<Option<Chunk>> {
        Ok(self.lock()?.last_chunk(partition_id, max_index))
    }

    async fn read_all(
        &self,
        from_position: Position,
        limit: Option<usize>,
        subscriber: &mut dyn Subscriber,
        token: &CancellationToken,
    ) -> StoreResult<()> {
        let page = self.lock()?.page_all(from_position, limit);
        deliver(subscriber, from_position, page, |c| c.position, token).await
    }

    async fn read_last_position(&self) -> StoreResult<Position> {
        Ok(self.lock()?.last_position())
    }

    async fn delete(
        &self,
        partition_id: &str,
        from_index: Index,
        to_index: Index,
    ) -> StoreResult<()> {
        let removed = self.lock()?.delete_range(partition_id, from_index, to_index);
        if removed.is_empty() {
            return Err(StoreError::DeleteEmpty {
                partition_id: partition_id.to_string(),
                from: from_index,
                to: to_index,
            });
        }
        debug!(partition_id, removed = removed.len(), "Deleted index range");
        Ok(())
    }

    async fn read_by_operation_id(
        &self,
        partition_id: &str,
        operation_id: &str,
    ) -> StoreResult<Option<Chunk>> {
        Ok(self.lock()?.find_operation(partition_id, operation_id))
    }

    async fn append_batch(
        &self,
        requests: Vec<WriteRequest>,
        token: &CancellationToken,
    ) -> StoreResult<Vec<WriteOutcome>> {
        if token.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let mut positions = Vec::with_capacity(requests.len());
        for _ in &requests {
            positions.push(self.sequence.allocate().await?);
        }

        let mut state = self.lock()?;
        let mut outcomes = Vec::with_capacity(requests.len());
        for (request, position) in requests.into_iter().zip(positions) {
            let operation_id = request
                .operation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let index = if request.index < 0 {
                state.last_index(&request.partition_id) + 1
            } else {
                request.index
            };
            match state.check(&request.partition_id, index, &operation_id) {
                None => {
                    let chunk = Chunk {
                        position,
                        partition_id: request.partition_id,
                        index,
                        operation_id,
                        payload: request.payload,
                    };
                    state.commit(chunk.clone());
                    outcomes.push(WriteOutcome::Applied(chunk));
                }
                Some(ConflictKind::Operation) => {
                    state.commit(Chunk::filler(position));
                    outcomes.push(WriteOutcome::DuplicateOperation);
                }
                Some(ConflictKind::Index) => {
                    state.commit(Chunk::filler(position));
                    outcomes.push(WriteOutcome::DuplicateIndex);
                }
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Collector, AUTO_INDEX, EMPTY_PARTITION};
    use serde_json::json;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    async fn append(store: &MemoryStore, partition: &str, payload: Value) -> Chunk {
        store
            .append(partition, AUTO_INDEX, payload, None)
            .await
            .unwrap()
            .applied()
            .expect("append should insert")
    }

    #[tokio::test]
    async fn test_auto_indexes_are_dense_per_partition() {
        let store = MemoryStore::new();
        for i in 1..=3 {
            let chunk = append(&store, "a", json!(i)).await;
            assert_eq!(chunk.index, i);
        }
        // A second partition starts over at 1 while positions keep going.
        let chunk = append(&store, "b", json!(1)).await;
        assert_eq!(chunk.index, 1);
        assert_eq!(chunk.position, 4);
    }

    #[tokio::test]
    async fn test_explicit_index_conflict_is_fatal_and_consumes_position() {
        let store = MemoryStore::new();
        append(&store, "a", json!(1)).await;
        let err = store
            .append("a", 1, json!("again"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateStreamIndex { index: 1, .. }));

        // The burned position shows up as a filler in the global log.
        let mut collector = Collector::new();
        store
            .read_all(0, None, &mut collector, &token())
            .await
            .unwrap();
        assert_eq!(collector.positions(), vec![1, 2]);
        assert!(collector.chunks()[1].is_filler());
    }

    #[tokio::test]
    async fn test_duplicate_operation_returns_already_applied() {
        let store = MemoryStore::new();
        let first = store
            .append("a", AUTO_INDEX, json!(1), Some("op-1".to_string()))
            .await
            .unwrap();
        assert!(first.is_applied());

        let second = store
            .append("a", AUTO_INDEX, json!(1), Some("op-1".to_string()))
            .await
            .unwrap();
        assert_eq!(second, AppendOutcome::AlreadyApplied);

        // One real chunk, one filler, no gap.
        let mut collector = Collector::new();
        store
            .read_all(0, None, &mut collector, &token())
            .await
            .unwrap();
        assert_eq!(collector.positions(), vec![1, 2]);
        assert_eq!(collector.chunks()[1].partition_id, EMPTY_PARTITION);
    }

    #[tokio::test]
    async fn test_idempotent_retry_of_explicit_index_write() {
        let store = MemoryStore::new();
        store
            .append("a", 1, json!(1), Some("op-1".to_string()))
            .await
            .unwrap();
        // Same explicit index and same operation id: this is a retry, not
        // a concurrency conflict.
        let outcome = store
            .append("a", 1, json!(1), Some("op-1".to_string()))
            .await
            .unwrap();
        assert_eq!(outcome, AppendOutcome::AlreadyApplied);
    }

    #[tokio::test]
    async fn test_read_by_operation_id() {
        let store = MemoryStore::new();
        store
            .append("a", AUTO_INDEX, json!(7), Some("op-7".to_string()))
            .await
            .unwrap();
        let found = store.read_by_operation_id("a", "op-7").await.unwrap();
        assert_eq!(found.map(|c| c.index), Some(1));
        assert_eq!(store.read_by_operation_id("a", "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_then_reappend_same_index() {
        let store = MemoryStore::new();
        append(&store, "a", json!(1)).await;
        append(&store, "a", json!(2)).await;
        store.delete("a", 1, 2).await.unwrap();

        let err = store.delete("a", 1, 2).await.unwrap_err();
        assert!(matches!(err, StoreError::DeleteEmpty { .. }));

        // Constraints are released; positions are not reused.
        let chunk = store
            .append("a", 1, json!("fresh"), None)
            .await
            .unwrap()
            .applied()
            .unwrap();
        assert_eq!(chunk.index, 1);
        assert_eq!(chunk.position, 3);
    }

    #[tokio::test]
    async fn test_batch_resolves_conflicts_per_item() {
        let store = MemoryStore::new();
        store
            .append("a", 1, json!(1), Some("op-1".to_string()))
            .await
            .unwrap();

        let outcomes = store
            .append_batch(
                vec![
                    WriteRequest::new("a", AUTO_INDEX, json!(2)),
                    WriteRequest::new("a", 1, json!("dup-index")),
                    WriteRequest::new("a", AUTO_INDEX, json!("dup-op"))
                        .with_operation_id("op-1"),
                    WriteRequest::new("b", AUTO_INDEX, json!(1)),
                ],
                &token(),
            )
            .await
            .unwrap();

        assert!(matches!(&outcomes[0], WriteOutcome::Applied(c) if c.index == 2));
        assert_eq!(outcomes[1], WriteOutcome::DuplicateIndex);
        assert_eq!(outcomes[2], WriteOutcome::DuplicateOperation);
        assert!(matches!(&outcomes[3], WriteOutcome::Applied(c) if c.index == 1));

        // Every request consumed a position: 1 seed + 4 batch entries.
        assert_eq!(store.read_last_position().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_read_forward_and_backward() {
        let store = MemoryStore::new();
        for i in 1..=5 {
            append(&store, "a", json!(i)).await;
        }

        let mut fwd = Collector::new();
        store
            .read_forward("a", 2, 4, None, &mut fwd, &token())
            .await
            .unwrap();
        assert_eq!(fwd.indexes(), vec![2, 3, 4]);

        let mut bwd = Collector::new();
        store
            .read_backward("a", 5, 1, Some(2), &mut bwd, &token())
            .await
            .unwrap();
        assert_eq!(bwd.indexes(), vec![5, 4]);
    }
}
