//! Stream handles over store partitions.
//!
//! A [`Stream`] is a cheap, per-unit-of-work view of one partition. Three
//! flavors cover the write disciplines the store supports:
//!
//! - [`PartitionStream`]: backend-assigned indexes, writers interleave.
//! - [`OptimisticStream`]: read-before-append with a cached version;
//!   concurrent writers race and the loser re-reads.
//! - [`ReadOnlyStream`]: reads only, every mutation refused.

mod contract;
mod errors;
mod optimistic;
mod partition;
mod read_only;

pub use contract::{Stream, UNKNOWN_VERSION};
pub use errors::{StreamError, StreamResult};
pub use optimistic::OptimisticStream;
pub use partition::PartitionStream;
pub use read_only::ReadOnlyStream;
