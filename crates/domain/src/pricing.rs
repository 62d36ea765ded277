//! Pricing and stock rules applied when an order is finalized.
//!
//! - Unknown products contribute nothing to the total.
//! - Short stock never blocks an order: the full requested quantity is
//!   billed and stock is decremented down to zero at most.

use std::collections::{BTreeMap, HashMap};

use common::{Money, ProductId};
use order_store::{InventoryItem, OrderLine, StockAdjustment};

/// A product requested in larger quantity than was in stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: u32,
}

/// Outcome of pricing an order against current inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedOrder {
    pub total: Money,
    /// One decrement per known product, in product id order.
    pub adjustments: Vec<StockAdjustment>,
    pub missing_products: Vec<ProductId>,
    pub shortfalls: Vec<Shortfall>,
}

/// Prices `items` against `inventory`.
///
/// Lines naming the same product are checked against the stock left after
/// the earlier lines, and their decrements are merged.
pub fn price_order(items: &[OrderLine], inventory: &[InventoryItem]) -> PricedOrder {
    let by_product: HashMap<&ProductId, &InventoryItem> =
        inventory.iter().map(|i| (&i.product_id, i)).collect();

    let mut total = Money::zero();
    let mut remaining: HashMap<&ProductId, u32> = HashMap::new();
    let mut decrements: BTreeMap<ProductId, u32> = BTreeMap::new();
    let mut missing_products = Vec::new();
    let mut shortfalls = Vec::new();

    for line in items {
        let Some(&item) = by_product.get(&line.product_id) else {
            missing_products.push(line.product_id.clone());
            continue;
        };

        let available = remaining.entry(&item.product_id).or_insert(item.quantity);
        if *available < line.quantity {
            shortfalls.push(Shortfall {
                product_id: line.product_id.clone(),
                requested: line.quantity,
                available: *available,
            });
        }
        *available = available.saturating_sub(line.quantity);

        total += item.unit_price.multiply(line.quantity);
        let decrement = decrements.entry(item.product_id.clone()).or_default();
        *decrement = decrement.saturating_add(line.quantity);
    }

    PricedOrder {
        total,
        adjustments: decrements
            .into_iter()
            .map(|(product_id, decrement)| StockAdjustment {
                product_id,
                decrement,
            })
            .collect(),
        missing_products,
        shortfalls,
    }
}
