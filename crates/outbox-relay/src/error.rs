//! Relay error types.

use thiserror::Error;

/// Errors that abort a relay tick.
///
/// Publish failures for individual entries are not errors; they are logged
/// and the entry is retried on the next tick.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Store error: {0}")]
    Store(#[from] order_store::StoreError),
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
