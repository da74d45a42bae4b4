//! Subscription error types.

use thiserror::Error;

use crate::store::{Position, StoreError};

/// Convenience alias for subscription operations.
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    // ==================
    // Lifecycle
    // ==================
    #[error("Subscription is not running")]
    NotRunning,

    /// `start` raced a `stop` that has not parked the poller yet.
    #[error("Subscription is stopping; wait for stop to finish")]
    Stopping,

    #[error("Polling task failed")]
    LoopFailed,

    // ==================
    // Catch-up
    // ==================
    #[error("Catch-up timed out at position {position}, target {target}")]
    CatchUpTimeout { position: Position, target: Position },

    // ==================
    // Passthrough
    // ==================
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Subscription internal error: {0}")]
    Internal(String),
}
