//! Relational persistence for the order pipeline.
//!
//! The store is the single synchronization point between the submission
//! handler, the outbox relay and the order workers. All coordination happens
//! through row state: order status, outbox `published_at` and the per-order
//! version counter.

pub mod entity;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{CustomerId, Money, OrderId, ProductId};
pub use entity::{
    Finalization, InsertOutcome, InventoryItem, NewOrder, Order, OrderLine, OrderStatus,
    OutboxEntry, OutboxId, StatusCount, StockAdjustment, Version,
};
pub use error::{Result, StoreError};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use store::{OrderStore, OrderStoreExt};
