//! siltdb - an embeddable, append-only chunk store
//!
//! One globally ordered log of opaque chunks, partitioned into streams.
//! Writes are idempotent by operation id; folds materialize stream state
//! with snapshot acceleration; polling subscriptions follow the tail.

pub mod backend;
pub mod cli;
pub mod replay;
pub mod snapshot;
pub mod store;
pub mod stream;
pub mod subscription;
