//! Catch-up subscriptions.
//!
//! # Invariants Enforced
//!
//! - One task owns the subscriber; hooks never run concurrently.
//! - The checkpoint advances only past accepted chunks, so a stopped or
//!   restarted client never skips anything it has not consumed.
//! - `catch_up` targets the log tail observed at call time, not a moving
//!   target, so it terminates under continuous writes.

mod client;
mod errors;

pub use client::{PollingClient, PollingConfig};
pub use errors::{SubscriptionError, SubscriptionResult};
