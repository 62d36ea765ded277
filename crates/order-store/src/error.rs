use common::OrderId;
use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order was modified since it was read: the expected version no
    /// longer matches. Another writer won the race.
    #[error("Stale write for order {order_id}: expected version {expected}")]
    StaleWrite { order_id: OrderId, expected: Version },

    /// A stored row could not be mapped back into an entity.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// The store could not be reached or refused the write.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if this is an optimistic concurrency conflict.
    pub fn is_stale_write(&self) -> bool {
        matches!(self, StoreError::StaleWrite { .. })
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
