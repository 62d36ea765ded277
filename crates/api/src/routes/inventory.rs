//! Inventory listing endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use order_store::{InventoryItem, OrderStore};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItemResponse {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub unit_price: String,
}

impl From<InventoryItem> for InventoryItemResponse {
    fn from(item: InventoryItem) -> Self {
        Self {
            product_id: item.product_id.to_string(),
            quantity: item.quantity,
            unit_price_cents: item.unit_price.cents(),
            unit_price: item.unit_price.to_string(),
        }
    }
}

/// GET /inventory: current stock and prices, ordered by product id.
pub async fn list<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<InventoryItemResponse>>, ApiError> {
    let items = state.store.list_inventory().await?;
    Ok(Json(items.into_iter().map(Into::into).collect()))
}
