//! Snapshot payload carried between fold runs.

use serde_json::Value;

use crate::store::Index;

/// Reducer state captured at a specific stream version.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotInfo {
    /// Identity of the snapshotted source, usually `{stream}/{reducer}`.
    pub source_id: String,
    /// Stream version the state was folded up to.
    pub source_version: Index,
    /// Serialized reducer state.
    pub payload: Value,
    /// Reducer schema tag; a mismatch invalidates the snapshot.
    pub schema_version: String,
}

impl SnapshotInfo {
    pub fn new(
        source_id: impl Into<String>,
        source_version: Index,
        payload: Value,
        schema_version: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_version,
            payload,
            schema_version: schema_version.into(),
        }
    }

    /// An empty snapshot carries no usable state and is never persisted.
    pub fn is_empty(&self) -> bool {
        self.source_version <= 0 || self.payload.is_null()
    }
}
