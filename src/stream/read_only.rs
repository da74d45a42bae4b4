//! Read-only view of a partition.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::store::{AppendOutcome, ChunkStore, Index, Subscriber};

use super::contract::Stream;
use super::errors::{StreamError, StreamResult};

/// Stream handle that refuses every mutation. Useful for handing a
/// projection code path a stream it cannot write back through.
pub struct ReadOnlyStream {
    store: Arc<dyn ChunkStore>,
    partition_id: String,
}

impl ReadOnlyStream {
    pub fn new(store: Arc<dyn ChunkStore>, partition_id: impl Into<String>) -> Self {
        Self {
            store,
            partition_id: partition_id.into(),
        }
    }

    fn read_only(&self) -> StreamError {
        StreamError::ReadOnly {
            partition_id: self.partition_id.clone(),
        }
    }
}

#[async_trait]
impl Stream for ReadOnlyStream {
    fn partition_id(&self) -> &str {
        &self.partition_id
    }

    fn is_writable(&self) -> bool {
        false
    }

    async fn read(
        &mut self,
        from_index: Index,
        to_index: Index,
        subscriber: &mut dyn Subscriber,
        token: &CancellationToken,
    ) -> StreamResult<()> {
        self.store
            .read_forward(&self.partition_id, from_index, to_index, None, subscriber, token)
            .await?;
        Ok(())
    }

    async fn append(
        &mut self,
        _payload: Value,
        _operation_id: Option<String>,
    ) -> StreamResult<AppendOutcome> {
        Err(self.read_only())
    }

    async fn delete(&mut self) -> StreamResult<()> {
        Err(self.read_only())
    }

    async fn last_index(&self) -> StreamResult<Option<Index>> {
        let chunk = self
            .store
            .read_last_chunk(&self.partition_id, i64::MAX)
            .await?;
        Ok(chunk.map(|c| c.index))
    }
}
