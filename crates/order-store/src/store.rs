use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId};

use crate::{
    Finalization, InsertOutcome, InventoryItem, NewOrder, Order, OutboxEntry, OutboxId, Result,
    StatusCount, Version,
};

/// Core trait for order store implementations.
///
/// All implementations must be thread-safe (Send + Sync); the store is
/// shared between request handlers, the relay loop and worker instances.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a pending order together with its outbox entry.
    ///
    /// Both rows are written atomically, or neither is. If an order with the
    /// same id already exists nothing is written and
    /// [`InsertOutcome::AlreadyExists`] is returned; the existing row is
    /// never touched.
    async fn insert_order_with_outbox(&self, order: NewOrder) -> Result<InsertOutcome>;

    /// Loads an order by id.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Returns up to `limit` unpublished outbox entries, oldest first.
    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    /// Stamps `published_at` on an entry that has not been published yet.
    ///
    /// Returns false if the entry was already published (or does not
    /// exist); an existing timestamp is never overwritten.
    async fn mark_published(&self, entry_id: OutboxId, published_at: DateTime<Utc>)
    -> Result<bool>;

    /// Returns every outbox entry recorded for an order.
    async fn outbox_entries_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxEntry>>;

    /// Loads the inventory rows for the given products. Unknown products
    /// are simply absent from the result.
    async fn get_inventory(&self, product_ids: &[ProductId]) -> Result<Vec<InventoryItem>>;

    /// Lists the whole inventory ordered by product id.
    async fn list_inventory(&self) -> Result<Vec<InventoryItem>>;

    /// Inserts or replaces an inventory row.
    async fn upsert_inventory(&self, item: InventoryItem) -> Result<()>;

    /// Moves a pending order to Processed and applies its stock adjustments.
    ///
    /// Fails with `StaleWrite` if the order is no longer at
    /// `expected_version`; in that case nothing is written. Returns the new
    /// version of the order.
    async fn finalize_order(&self, finalization: Finalization) -> Result<Version>;

    /// Counts orders grouped by status. Statuses with no orders are omitted.
    async fn count_orders_by_status(&self) -> Result<Vec<StatusCount>>;

    /// Counts orders created at or after `since`.
    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64>;

    /// Counts orders finalized at or after `since`.
    async fn count_processed_since(&self, since: DateTime<Utc>) -> Result<u64>;
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Checks if an order exists.
    async fn order_exists(&self, order_id: OrderId) -> Result<bool> {
        Ok(self.get_order(order_id).await?.is_some())
    }

    /// Loads a single inventory row.
    async fn get_inventory_item(&self, product_id: &ProductId) -> Result<Option<InventoryItem>> {
        let mut items = self.get_inventory(std::slice::from_ref(product_id)).await?;
        Ok(items.pop())
    }
}

// Blanket implementation for all OrderStore implementations
impl<T: OrderStore + ?Sized> OrderStoreExt for T {}
