//! Subscriber protocol: a push visitor over a chunk scan.

use async_trait::async_trait;

use super::chunk::{Chunk, Index, Position};
use super::errors::{StoreError, StoreResult};

/// Consumer side of a scan.
///
/// A scan calls the hooks in order: `on_start`, zero or more `on_next`,
/// then exactly one of `on_completed` (range exhausted), `on_stopped`
/// (consumer returned `false` or the scan was cancelled mid-flight) or
/// `on_error`.
///
/// Partition scans pass partition indexes for the position arguments;
/// global-log scans pass global positions.
#[async_trait]
pub trait Subscriber: Send {
    /// The scan is about to begin at `position`.
    async fn on_start(&mut self, _position: i64) -> StoreResult<()> {
        Ok(())
    }

    /// Deliver one chunk. Return `false` to stop the scan.
    async fn on_next(&mut self, chunk: Chunk) -> StoreResult<bool>;

    /// The scan exhausted its range; `position` is the last one delivered.
    async fn on_completed(&mut self, _position: i64) -> StoreResult<()> {
        Ok(())
    }

    /// The consumer asked to stop, or cancellation interrupted the scan.
    async fn on_stopped(&mut self, _position: i64) -> StoreResult<()> {
        Ok(())
    }

    /// The scan or the consumer failed. Informational; the error still
    /// propagates to the caller of the scan.
    async fn on_error(&mut self, _position: i64, _error: &StoreError) {}
}

/// Collects every delivered chunk into a `Vec`.
#[derive(Debug, Default)]
pub struct Collector {
    chunks: Vec<Chunk>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }

    pub fn indexes(&self) -> Vec<Index> {
        self.chunks.iter().map(|c| c.index).collect()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.chunks.iter().map(|c| c.position).collect()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl Subscriber for Collector {
    async fn on_next(&mut self, chunk: Chunk) -> StoreResult<bool> {
        self.chunks.push(chunk);
        Ok(true)
    }
}

/// Lifts a closure into the subscriber protocol. The closure returns
/// `false` to stop the scan.
pub struct FnSubscriber<F> {
    f: F,
}

impl<F> FnSubscriber<F>
where
    F: FnMut(Chunk) -> bool + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Subscriber for FnSubscriber<F>
where
    F: FnMut(Chunk) -> bool + Send,
{
    async fn on_next(&mut self, chunk: Chunk) -> StoreResult<bool> {
        Ok((self.f)(chunk))
    }
}
