//! Persistent entities: orders, outbox entries and inventory items.

use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, ProductId};
use serde::{Deserialize, Serialize};

/// Version token for an order row, used for optimistic concurrency control.
///
/// A freshly submitted order is at version 1; every successful write
/// increments it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of a newly inserted row.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an order.
///
/// ```text
/// Pending ──► Processed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Persisted, waiting for a worker to price and finalize it.
    Pending,
    /// Priced and finalized (terminal).
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processed => "Processed",
        }
    }

    /// Parses the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(OrderStatus::Pending),
            "Processed" => Some(OrderStatus::Processed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A requested product and quantity. Not validated at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// An order row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderLine>,
    /// Absent while the order is pending.
    pub total_amount: Option<Money>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    /// Absent while the order is pending.
    pub processed_at: Option<DateTime<Utc>>,
    pub version: Version,
}

impl Order {
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    pub fn is_processed(&self) -> bool {
        self.status == OrderStatus::Processed
    }
}

/// Input for the atomic order + outbox insert.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Materializes the pending order row this input creates.
    pub fn into_order(self) -> Order {
        Order {
            id: self.id,
            customer_id: self.customer_id,
            items: self.items,
            total_amount: None,
            status: OrderStatus::Pending,
            created_at: self.created_at,
            processed_at: None,
            version: Version::first(),
        }
    }
}

/// Result of the atomic order + outbox insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Both rows were written.
    Created { outbox_id: OutboxId },
    /// An order with this id already existed; nothing was written.
    AlreadyExists,
}

/// Monotonic identifier of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(i64);

impl OutboxId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending or relayed notification for an order. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxId,
    pub order_id: OrderId,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }
}

/// Stock level and price of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl InventoryItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
            unit_price,
        }
    }
}

/// A zero-floored stock decrement applied during finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockAdjustment {
    pub product_id: ProductId,
    pub decrement: u32,
}

/// The compare-and-swap write that moves an order from Pending to Processed.
///
/// Applied only if the stored order is still at `expected_version`; the
/// stock adjustments commit in the same transaction.
#[derive(Debug, Clone)]
pub struct Finalization {
    pub order_id: OrderId,
    pub expected_version: Version,
    pub total_amount: Money,
    pub processed_at: DateTime<Utc>,
    pub adjustments: Vec<StockAdjustment>,
}

/// Number of orders in a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: OrderStatus,
    pub count: u64,
}
