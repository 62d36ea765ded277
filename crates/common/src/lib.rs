//! Shared types for the order pipeline.

mod money;
mod types;

pub use money::Money;
pub use types::{CustomerId, OrderId, ProductId};
