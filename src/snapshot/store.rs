//! Snapshot store contract.

use async_trait::async_trait;

use crate::store::Index;

use super::errors::SnapshotResult;
use super::info::SnapshotInfo;

/// Where fold snapshots live.
///
/// Snapshots are a cache: `add` and `delete` are forgiving (an already
/// captured version or an empty range is not an error), and a reader must
/// tolerate `get` returning nothing.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// The most recent snapshot of `source_id`.
    async fn get_last(&self, source_id: &str) -> SnapshotResult<Option<SnapshotInfo>>;

    /// The most recent snapshot of `source_id` at or below `max_version`.
    async fn get(&self, source_id: &str, max_version: Index)
        -> SnapshotResult<Option<SnapshotInfo>>;

    /// Persist a snapshot. Empty snapshots and versions already captured
    /// are dropped silently.
    async fn add(&self, snapshot: SnapshotInfo) -> SnapshotResult<()>;

    /// Remove the snapshots of `source_id` with versions in
    /// `from_version..=to_version`. A range with no snapshots is fine.
    async fn delete(
        &self,
        source_id: &str,
        from_version: Index,
        to_version: Index,
    ) -> SnapshotResult<()>;
}
