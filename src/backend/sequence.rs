//! Global position allocation.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;

use crate::store::{Position, StoreResult};

/// Source of global positions for a backend.
///
/// Implementations hand out strictly increasing values and never repeat
/// one, even across conflicts: a position, once allocated, is either
/// committed as a chunk, consumed by a filler, or lost to a write failure.
/// Backends resync the allocator after recovery so reopened stores
/// continue past their durable tail.
#[async_trait]
pub trait SequenceAllocator: Send + Sync {
    /// Claim the next unused position.
    async fn allocate(&self) -> StoreResult<Position>;

    /// Raise the counter to at least `tail`. Never lowers it.
    async fn resync(&self, tail: Position) -> StoreResult<()>;
}

/// In-process atomic counter, the default for embedded backends where the
/// store instance is the sole writer authority for its data.
#[derive(Debug)]
pub struct LocalSequence {
    last: AtomicI64,
}

impl LocalSequence {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// A counter that has already handed out every position up to `last`.
    pub fn starting_at(last: Position) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }
}

impl Default for LocalSequence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SequenceAllocator for LocalSequence {
    async fn allocate(&self) -> StoreResult<Position> {
        Ok(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn resync(&self, tail: Position) -> StoreResult<()> {
        self.last.fetch_max(tail, Ordering::SeqCst);
        Ok(())
    }
}
