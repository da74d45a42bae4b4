//! Store backends.
//!
//! Two implementations of [`crate::store::ChunkStore`] share one write
//! protocol:
//!
//! 1. Allocate a position from the [`SequenceAllocator`].
//! 2. Resolve conflicts against the in-memory [`index::ChunkIndex`] under a
//!    single lock, operation id before stream index.
//! 3. Commit the chunk, or a filler when the position cannot carry the
//!    logical write, so the log stays gapless.
//!
//! [`MemoryStore`] keeps everything in the index and is the reference for
//! tests and ephemeral embedding. [`file::FileStore`] adds an fsynced
//! append-only log underneath the same index and recovers it on open.

pub mod file;
mod index;
mod memory;
mod scan;
mod sequence;

pub use file::{FileStore, FileStoreConfig, FileStoreStats, PartitionStats};
pub use memory::{MemoryConfig, MemoryStore};
pub use sequence::{LocalSequence, SequenceAllocator};
