//! Worker error types.

use thiserror::Error;

/// Errors that cause a delivery to be requeued.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Store error: {0}")]
    Store(#[from] order_store::StoreError),

    #[error("Broker error: {0}")]
    Broker(#[from] broker::BrokerError),
}

/// Result type for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;
