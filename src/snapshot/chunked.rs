//! Snapshots stored as chunks in the backing store.
//!
//! Each snapshot becomes one chunk in the partition named by its source
//! id, with the stream version as the chunk index. `read_last_chunk` with
//! a version ceiling then doubles as snapshot lookup, and snapshots ride
//! the store's durability for free.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::store::{ChunkStore, Index, StoreError};

use super::errors::SnapshotResult;
use super::info::SnapshotInfo;
use super::store::SnapshotStore;

/// Chunk payload layout for a persisted snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct StoredState {
    schema_version: String,
    state: Value,
}

/// [`SnapshotStore`] backed by any [`ChunkStore`].
pub struct ChunkSnapshots {
    store: Arc<dyn ChunkStore>,
}

impl ChunkSnapshots {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SnapshotStore for ChunkSnapshots {
    async fn get_last(&self, source_id: &str) -> SnapshotResult<Option<SnapshotInfo>> {
        self.get(source_id, i64::MAX).await
    }

    async fn get(
        &self,
        source_id: &str,
        max_version: Index,
    ) -> SnapshotResult<Option<SnapshotInfo>> {
        let Some(chunk) = self.store.read_last_chunk(source_id, max_version).await? else {
            return Ok(None);
        };
        let stored: StoredState = serde_json::from_value(chunk.payload)?;
        Ok(Some(SnapshotInfo {
            source_id: source_id.to_string(),
            source_version: chunk.index,
            payload: stored.state,
            schema_version: stored.schema_version,
        }))
    }

    async fn add(&self, snapshot: SnapshotInfo) -> SnapshotResult<()> {
        if snapshot.is_empty() {
            debug!(source_id = %snapshot.source_id, "Dropping empty snapshot");
            return Ok(());
        }
        let payload = serde_json::to_value(StoredState {
            schema_version: snapshot.schema_version,
            state: snapshot.payload,
        })?;
        let source_id = snapshot.source_id;
        match self
            .store
            .append(&source_id, snapshot.source_version, payload, None)
            .await
        {
            Ok(_) => Ok(()),
            // Another run already captured this version.
            Err(StoreError::DuplicateStreamIndex { index, .. }) => {
                debug!(source_id, version = index, "Snapshot already captured");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(
        &self,
        source_id: &str,
        from_version: Index,
        to_version: Index,
    ) -> SnapshotResult<()> {
        match self
            .store
            .delete(source_id, from_version, to_version)
            .await
        {
            Ok(()) | Err(StoreError::DeleteEmpty { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
