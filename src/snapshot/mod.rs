//! Fold snapshots.
//!
//! A snapshot is reducer state captured at a stream version so a later
//! fold can start there instead of at the beginning. Snapshots are an
//! acceleration cache, never the source of truth: losing one costs a
//! longer replay, nothing else.
//!
//! The default [`ChunkSnapshots`] keeps snapshots inside the chunk store
//! itself, one partition per `{stream}/{reducer}` pair.

mod chunked;
mod errors;
mod info;
mod store;

pub use chunked::ChunkSnapshots;
pub use errors::{SnapshotError, SnapshotResult};
pub use info::SnapshotInfo;
pub use store::SnapshotStore;
