use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId};
use tokio::sync::RwLock;

use crate::{
    Finalization, InsertOutcome, InventoryItem, NewOrder, Order, OrderStatus, OutboxEntry,
    OutboxId, Result, StatusCount, StoreError, Version, store::OrderStore,
};

#[derive(Default)]
struct MemoryState {
    orders: HashMap<OrderId, Order>,
    outbox: Vec<OutboxEntry>,
    inventory: BTreeMap<ProductId, InventoryItem>,
    next_outbox_id: i64,
    fail_on_finalize: bool,
}

/// In-memory order store implementation for testing.
///
/// Every operation runs under a single lock, which gives the same atomicity
/// the PostgreSQL implementation gets from transactions.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with the given inventory.
    pub async fn with_inventory(items: impl IntoIterator<Item = InventoryItem>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write().await;
            for item in items {
                state.inventory.insert(item.product_id.clone(), item);
            }
        }
        store
    }

    /// Configures finalization to fail with `Unavailable` until reset.
    pub async fn set_fail_on_finalize(&self, fail: bool) {
        self.state.write().await.fail_on_finalize = fail;
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the number of stored outbox entries.
    pub async fn outbox_count(&self) -> usize {
        self.state.read().await.outbox.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert_order_with_outbox(&self, order: NewOrder) -> Result<InsertOutcome> {
        let mut state = self.state.write().await;

        if state.orders.contains_key(&order.id) {
            return Ok(InsertOutcome::AlreadyExists);
        }

        state.next_outbox_id += 1;
        let outbox_id = OutboxId::new(state.next_outbox_id);
        state.outbox.push(OutboxEntry {
            id: outbox_id,
            order_id: order.id,
            created_at: order.created_at,
            published_at: None,
        });
        state.orders.insert(order.id, order.into_order());

        Ok(InsertOutcome::Created { outbox_id })
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .outbox
            .iter()
            .filter(|e| e.published_at.is_none())
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn mark_published(
        &self,
        entry_id: OutboxId,
        published_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .outbox
            .iter_mut()
            .find(|e| e.id == entry_id && e.published_at.is_none())
        {
            Some(entry) => {
                entry.published_at = Some(published_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn outbox_entries_for_order(&self, order_id: OrderId) -> Result<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn get_inventory(&self, product_ids: &[ProductId]) -> Result<Vec<InventoryItem>> {
        let state = self.state.read().await;
        let mut items: Vec<_> = product_ids
            .iter()
            .filter_map(|id| state.inventory.get(id).cloned())
            .collect();
        items.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        items.dedup_by(|a, b| a.product_id == b.product_id);
        Ok(items)
    }

    async fn list_inventory(&self) -> Result<Vec<InventoryItem>> {
        Ok(self.state.read().await.inventory.values().cloned().collect())
    }

    async fn upsert_inventory(&self, item: InventoryItem) -> Result<()> {
        self.state
            .write()
            .await
            .inventory
            .insert(item.product_id.clone(), item);
        Ok(())
    }

    async fn finalize_order(&self, finalization: Finalization) -> Result<Version> {
        let mut state = self.state.write().await;

        if state.fail_on_finalize {
            return Err(StoreError::Unavailable(
                "finalize rejected by test configuration".to_string(),
            ));
        }

        let order = match state.orders.get_mut(&finalization.order_id) {
            Some(order) if order.version == finalization.expected_version && order.is_pending() => {
                order
            }
            _ => {
                return Err(StoreError::StaleWrite {
                    order_id: finalization.order_id,
                    expected: finalization.expected_version,
                });
            }
        };

        order.status = OrderStatus::Processed;
        order.total_amount = Some(finalization.total_amount);
        order.processed_at = Some(finalization.processed_at);
        order.version = order.version.next();
        let new_version = order.version;

        for adjustment in &finalization.adjustments {
            if let Some(item) = state.inventory.get_mut(&adjustment.product_id) {
                item.quantity = item.quantity.saturating_sub(adjustment.decrement);
            }
        }

        Ok(new_version)
    }

    async fn count_orders_by_status(&self) -> Result<Vec<StatusCount>> {
        let state = self.state.read().await;
        let mut counts: BTreeMap<OrderStatus, u64> = BTreeMap::new();
        for order in state.orders.values() {
            *counts.entry(order.status).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect())
    }

    async fn count_created_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.created_at >= since)
            .count() as u64)
    }

    async fn count_processed_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.processed_at.is_some_and(|at| at >= since))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OrderLine, OrderStoreExt, StockAdjustment};
    use common::{CustomerId, Money};

    fn new_order(id: OrderId, customer: &str) -> NewOrder {
        NewOrder {
            id,
            customer_id: CustomerId::new(customer),
            items: vec![OrderLine::new("P1", 2)],
            created_at: Utc::now(),
        }
    }

    fn finalization(order: &Order, adjustments: Vec<StockAdjustment>) -> Finalization {
        Finalization {
            order_id: order.id,
            expected_version: order.version,
            total_amount: Money::from_cents(5998),
            processed_at: Utc::now(),
            adjustments,
        }
    }

    #[tokio::test]
    async fn insert_creates_order_and_outbox_entry_together() {
        let store = InMemoryOrderStore::new();
        let id = OrderId::new();

        let outcome = store
            .insert_order_with_outbox(new_order(id, "alice"))
            .await
            .unwrap();

        assert!(matches!(outcome, InsertOutcome::Created { .. }));
        assert_eq!(store.order_count().await, 1);
        let entries = store.outbox_entries_for_order(id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].published_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_writes_nothing_and_keeps_original_customer() {
        let store = InMemoryOrderStore::new();
        let id = OrderId::new();

        store
            .insert_order_with_outbox(new_order(id, "alice"))
            .await
            .unwrap();
        let outcome = store
            .insert_order_with_outbox(new_order(id, "mallory"))
            .await
            .unwrap();

        assert_eq!(outcome, InsertOutcome::AlreadyExists);
        assert_eq!(store.order_count().await, 1);
        assert_eq!(store.outbox_count().await, 1);
        let order = store.get_order(id).await.unwrap().unwrap();
        assert_eq!(order.customer_id.as_str(), "alice");
    }

    #[tokio::test]
    async fn fetch_unpublished_is_fifo_and_limited() {
        let store = InMemoryOrderStore::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let id = OrderId::new();
            store
                .insert_order_with_outbox(new_order(id, "c"))
                .await
                .unwrap();
            ids.push(id);
        }

        let batch = store.fetch_unpublished(3).await.unwrap();
        let batch_ids: Vec<_> = batch.iter().map(|e| e.order_id).collect();
        assert_eq!(batch_ids, ids[..3].to_vec());
    }

    #[tokio::test]
    async fn mark_published_only_transitions_once() {
        let store = InMemoryOrderStore::new();
        let id = OrderId::new();
        store
            .insert_order_with_outbox(new_order(id, "c"))
            .await
            .unwrap();
        let entry = store.fetch_unpublished(10).await.unwrap().remove(0);

        let first_stamp = Utc::now();
        assert!(store.mark_published(entry.id, first_stamp).await.unwrap());
        assert!(
            !store
                .mark_published(entry.id, first_stamp + chrono::Duration::seconds(5))
                .await
                .unwrap()
        );

        let entries = store.outbox_entries_for_order(id).await.unwrap();
        assert_eq!(entries[0].published_at, Some(first_stamp));
        assert!(store.fetch_unpublished(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finalize_applies_total_and_floors_stock() {
        let store =
            InMemoryOrderStore::with_inventory([InventoryItem::new("P1", 1, Money::from_cents(2999))])
                .await;
        let id = OrderId::new();
        store
            .insert_order_with_outbox(new_order(id, "c"))
            .await
            .unwrap();
        let order = store.get_order(id).await.unwrap().unwrap();

        let version = store
            .finalize_order(finalization(
                &order,
                vec![StockAdjustment {
                    product_id: ProductId::new("P1"),
                    decrement: 2,
                }],
            ))
            .await
            .unwrap();

        assert_eq!(version, Version::new(2));
        let order = store.get_order(id).await.unwrap().unwrap();
        assert!(order.is_processed());
        assert_eq!(order.total_amount, Some(Money::from_cents(5998)));
        let item = store
            .get_inventory_item(&ProductId::new("P1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.quantity, 0);
    }

    #[tokio::test]
    async fn finalize_with_stale_version_is_rejected_without_changes() {
        let store =
            InMemoryOrderStore::with_inventory([InventoryItem::new("P1", 10, Money::from_cents(100))])
                .await;
        let id = OrderId::new();
        store
            .insert_order_with_outbox(new_order(id, "c"))
            .await
            .unwrap();
        let loaded = store.get_order(id).await.unwrap().unwrap();
        let adjust = || {
            vec![StockAdjustment {
                product_id: ProductId::new("P1"),
                decrement: 2,
            }]
        };

        store
            .finalize_order(finalization(&loaded, adjust()))
            .await
            .unwrap();
        let err = store
            .finalize_order(finalization(&loaded, adjust()))
            .await
            .unwrap_err();

        assert!(err.is_stale_write());
        let item = store
            .get_inventory_item(&ProductId::new("P1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.quantity, 8);
    }

    #[tokio::test]
    async fn injected_finalize_failure_is_not_a_stale_write() {
        let store = InMemoryOrderStore::new();
        let id = OrderId::new();
        store
            .insert_order_with_outbox(new_order(id, "c"))
            .await
            .unwrap();
        let order = store.get_order(id).await.unwrap().unwrap();
        store.set_fail_on_finalize(true).await;

        let err = store
            .finalize_order(finalization(&order, Vec::new()))
            .await
            .unwrap_err();

        assert!(!err.is_stale_write());
        assert!(store.get_order(id).await.unwrap().unwrap().is_pending());
    }

    #[tokio::test]
    async fn status_counts_and_windows() {
        let store = InMemoryOrderStore::new();
        let before = Utc::now() - chrono::Duration::seconds(1);
        for _ in 0..3 {
            store
                .insert_order_with_outbox(new_order(OrderId::new(), "c"))
                .await
                .unwrap();
        }

        let counts = store.count_orders_by_status().await.unwrap();
        assert_eq!(
            counts,
            vec![StatusCount {
                status: OrderStatus::Pending,
                count: 3
            }]
        );
        assert_eq!(store.count_created_since(before).await.unwrap(), 3);
        assert_eq!(store.count_processed_since(before).await.unwrap(), 0);
    }
}
