//! Domain error types.

use order_store::StoreError;
use thiserror::Error;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The request is not well-formed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error occurred in the order store.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
