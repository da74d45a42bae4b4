//! CLI error types.

use thiserror::Error;

use crate::store::StoreError;
use crate::subscription::SubscriptionError;

/// Convenience alias for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    // ==================
    // Input / Output
    // ==================
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    // ==================
    // Engine
    // ==================
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}
