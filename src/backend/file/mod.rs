//! File-backed store: append-only log plus rebuilt in-memory index.

mod records;
mod store;

pub use store::{FileStore, FileStoreConfig, FileStoreStats, PartitionStats, LOG_FILE};
