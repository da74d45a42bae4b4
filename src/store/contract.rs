//! Store contract implemented by every backend adapter.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::chunk::{Chunk, Index, Position};
use super::errors::StoreResult;
use super::subscriber::Subscriber;

/// Outcome of a single append.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// The chunk was inserted.
    Applied(Chunk),
    /// The operation id was seen before; the write was a no-op and the
    /// allocated position went to a filler chunk.
    AlreadyApplied,
}

impl AppendOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// The inserted chunk, if this append actually wrote one.
    pub fn applied(self) -> Option<Chunk> {
        match self {
            Self::Applied(chunk) => Some(chunk),
            Self::AlreadyApplied => None,
        }
    }
}

/// One entry of a batch append.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub partition_id: String,
    /// Explicit index, or any negative value for backend-assigned.
    pub index: Index,
    pub payload: Value,
    /// Idempotency key; a fresh random one is used when absent.
    pub operation_id: Option<String>,
}

impl WriteRequest {
    pub fn new(partition_id: impl Into<String>, index: Index, payload: Value) -> Self {
        Self {
            partition_id: partition_id.into(),
            index,
            payload,
            operation_id: None,
        }
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }
}

/// Per-item outcome of a batch append. Constraint conflicts are reported
/// here instead of failing the rest of the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Applied(Chunk),
    DuplicateIndex,
    DuplicateOperation,
}

/// The store contract.
///
/// Every backend enforces the same pair of uniqueness constraints,
/// `(partition_id, index)` and `(partition_id, operation_id)`, and
/// allocates global positions so that the committed log is strictly
/// increasing and gapless: a write that cannot land (duplicate operation,
/// final index conflict) consumes its allocated position with a filler
/// chunk in [`EMPTY_PARTITION`](super::EMPTY_PARTITION).
///
/// Scans deliver through the [`Subscriber`] protocol. A token already
/// cancelled at entry fails with `StoreError::Cancelled`; cancellation
/// observed mid-scan stops delivery cleanly (`on_stopped`) and already
/// delivered chunks stay delivered.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Append one chunk to `partition_id`.
    ///
    /// A negative `index` requests the next backend-assigned index for the
    /// partition; a non-negative one asserts that exact index and fails
    /// with `DuplicateStreamIndex` if it is taken. A repeated
    /// `operation_id` yields `AlreadyApplied`.
    async fn append(
        &self,
        partition_id: &str,
        index: Index,
        payload: Value,
        operation_id: Option<String>,
    ) -> StoreResult<AppendOutcome>;

    /// Deliver chunks of `partition_id` with indexes in
    /// `from_index..=to_index`, ascending.
    async fn read_forward(
        &self,
        partition_id: &str,
        from_index: Index,
        to_index: Index,
        limit: Option<usize>,
        subscriber: &mut dyn Subscriber,
        token: &CancellationToken,
    ) -> StoreResult<()>;

    /// Deliver chunks of `partition_id` with indexes in
    /// `to_index..=from_index`, descending from `from_index`.
    async fn read_backward(
        &self,
        partition_id: &str,
        from_index: Index,
        to_index: Index,
        limit: Option<usize>,
        subscriber: &mut dyn Subscriber,
        token: &CancellationToken,
    ) -> StoreResult<()>;

    /// The most recent chunk of `partition_id` at or below `max_index`.
    async fn read_last_chunk(
        &self,
        partition_id: &str,
        max_index: Index,
    ) -> StoreResult<Option<Chunk>>;

    /// Deliver the whole log from `from_position`, ascending by global
    /// position, fillers included.
    async fn read_all(
        &self,
        from_position: Position,
        limit: Option<usize>,
        subscriber: &mut dyn Subscriber,
        token: &CancellationToken,
    ) -> StoreResult<()>;

    /// Position of the last committed chunk, 0 for an empty store.
    async fn read_last_position(&self) -> StoreResult<Position>;

    /// Remove the chunks of `partition_id` with indexes in
    /// `from_index..=to_index`. Fails with `DeleteEmpty` when nothing
    /// matched. Removed chunks release their uniqueness constraints; their
    /// positions are never reused.
    async fn delete(&self, partition_id: &str, from_index: Index, to_index: Index)
        -> StoreResult<()>;

    /// Look up the chunk a given operation id produced, if any.
    async fn read_by_operation_id(
        &self,
        partition_id: &str,
        operation_id: &str,
    ) -> StoreResult<Option<Chunk>>;

    /// Apply a queue of writes as one local transaction, resolving
    /// conflicts per item. Outcomes are returned in request order.
    async fn append_batch(
        &self,
        requests: Vec<WriteRequest>,
        token: &CancellationToken,
    ) -> StoreResult<Vec<WriteOutcome>>;
}
