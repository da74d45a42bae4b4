//! Chunk store contract and the model types shared by every backend.
//!
//! The store is an append-only, globally-ordered log of opaque chunks,
//! partitioned into named streams.
//!
//! # Design Principles
//!
//! - One global position sequence, strictly increasing and gapless
//! - Two uniqueness constraints per partition: index and operation id
//! - Duplicate operations are outcomes, not errors
//! - Payloads are opaque; durable backends serialize them through a codec
//! - Scans push chunks through the subscriber protocol
//!
//! # Invariants Enforced
//!
//! - Positions are never reused, even for failed or duplicate writes
//! - A collision on either constraint never overwrites an existing chunk
//! - A scan never delivers a chunk whose write has not fully committed

mod chunk;
mod contract;
mod errors;
mod payload;
mod subscriber;

pub use chunk::{Chunk, Index, Position, AUTO_INDEX, EMPTY_PARTITION};
pub use contract::{AppendOutcome, ChunkStore, WriteOutcome, WriteRequest};
pub use errors::{StoreError, StoreResult};
pub use payload::{JsonCodec, PayloadCodec};
pub use subscriber::{Collector, FnSubscriber, Subscriber};
