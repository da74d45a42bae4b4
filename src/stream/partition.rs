//! Plain partition stream with backend-assigned indexes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::store::{AppendOutcome, ChunkStore, Index, Subscriber, AUTO_INDEX};

use super::contract::Stream;
use super::errors::StreamResult;

/// Stream over one partition. Appends take the next free index, so
/// concurrent writers interleave instead of conflicting.
pub struct PartitionStream {
    store: Arc<dyn ChunkStore>,
    partition_id: String,
}

impl PartitionStream {
    pub fn new(store: Arc<dyn ChunkStore>, partition_id: impl Into<String>) -> Self {
        Self {
            store,
            partition_id: partition_id.into(),
        }
    }
}

#[async_trait]
impl Stream for PartitionStream {
    fn partition_id(&self) -> &str {
        &self.partition_id
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
        payload: Value,
        operation_id: Option<String>,
    ) -> StreamResult<AppendOutcome> {
        let outcome = self
            .store
            .append(&self.partition_id, AUTO_INDEX, payload, operation_id)
            .await?;
        Ok(outcome)
    }

    async fn delete(&mut self) -> StreamResult<()> {
        self.store.delete(&self.partition_id, 0, i64::MAX).await?;
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

    #[tokio::test]
    async fn test_appends_take_consecutive_indexes() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let mut stream = PartitionStream::new(store, "orders-1");

        for i in 1..=3 {
            let chunk = stream
                .append(json!({ "n": i }), None)
                .await
                .unwrap()
                .applied()
                .unwrap();
            assert_eq!(chunk.index, i);
        }
        assert_eq!(stream.last_index().await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_delete_empties_the_stream() {
        let store: Arc<dyn ChunkStore> = Arc::new(MemoryStore::new());
        let mut stream = PartitionStream::new(store, "orders-1");
        stream.append(json!(1), None).await.unwrap();
        stream.append(json!(2), None).await.unwrap();

        stream.delete().await.unwrap();

        let mut collector = Collector::new();
        stream
            .read(1, i64::MAX, &mut collector, &CancellationToken::new())
            .await
            .unwrap();
        assert!(collector.is_empty());
        assert_eq!(stream.last_index().await.unwrap(), None);
    }
}
