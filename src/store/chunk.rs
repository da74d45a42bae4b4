//! Chunk model shared by every backend adapter.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Global, store-wide sequence number of a chunk.
pub type Position = i64;

/// Per-partition sequence number of a chunk.
pub type Index = i64;

/// Any negative index passed to an append requests backend-assigned
/// (auto-increment) indexing.
pub const AUTO_INDEX: Index = -1;

/// Reserved partition that receives filler chunks. Positions allocated to
/// writes that could not land in their target partition are parked here so
/// the global sequence stays contiguous.
pub const EMPTY_PARTITION: &str = "$empty";

/// One persisted record in the log.
///
/// Identity is `(partition_id, index)`; `position` orders the chunk in the
/// store-wide log and `payload` is never interpreted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Global position, strictly increasing across the whole store and
    /// never reused, even for failed or duplicate writes.
    pub position: Position,
    /// The stream this chunk belongs to.
    pub partition_id: String,
    /// Position within the partition; caller-supplied or backend-assigned.
    pub index: Index,
    /// Idempotency key, unique per `(partition_id, operation_id)`.
    pub operation_id: String,
    /// Opaque caller payload.
    pub payload: Value,
}

impl Chunk {
    /// Placeholder consuming `position` in the reserved partition.
    ///
    /// The filler's index and operation id are derived from the position,
    /// which is unique, so fillers can never collide with each other.
    pub fn filler(position: Position) -> Self {
        Self {
            position,
            partition_id: EMPTY_PARTITION.to_string(),
            index: position,
            operation_id: format!("_{position}"),
            payload: Value::Null,
        }
    }

    /// True for position-consuming placeholders in the reserved partition.
    pub fn is_filler(&self) -> bool {
        self.partition_id == EMPTY_PARTITION
    }
}

impl PartialEq for Chunk {
    fn eq(&self, other: &Self) -> bool {
        self.partition_id == other.partition_id && self.index == other.index
    }
}

impl Eq for Chunk {}

impl Hash for Chunk {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.partition_id.hash(state);
        self.index.hash(state);
    }
}
