//! Stream replay: fold chunks into state, snapshot the result.
//!
//! # Design Principles
//!
//! - Snapshots only ever accelerate; a fold's result never depends on
//!   whether one existed.
//! - A fold reads each chunk at most once per run and applies them in
//!   index order.
//! - Gaps left by deletes are policy, not errors: the caller chooses to
//!   skip or stop through [`HoleAction`].

mod errors;
mod reducer;
mod replayer;

pub use errors::{ReplayError, ReplayResult};
pub use reducer::{Reducer, ReducerFn};
pub use replayer::{HoleAction, ReplayOptions, Replayer};
