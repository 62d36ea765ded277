//! Order submission and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId};
use domain::SubmitOrder;
use order_store::{Order, OrderLine, OrderStore};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOrderRequest {
    pub id: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub items: Vec<OrderLineRequest>,
}

/// A quantity that is not a non-negative integer fails extraction with 422.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: u32,
}

// -- Response types --

/// Same body for new and repeated submissions.
#[derive(Serialize)]
pub struct AcceptedResponse {
    pub id: String,
    pub status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    pub customer_id: String,
    pub items: Vec<OrderLine>,
    pub total_amount_cents: Option<i64>,
    pub total_amount: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id.to_string(),
            customer_id: order.customer_id.to_string(),
            total_amount_cents: order.total_amount.map(|m| m.cents()),
            total_amount: order.total_amount.map(|m| m.to_string()),
            status: order.status.to_string(),
            created_at: order.created_at,
            processed_at: order.processed_at,
            version: order.version.as_i64(),
            items: order.items,
        }
    }
}

fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(raw).map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}

// -- Handlers --

/// POST /orders: accept an order; repeated ids are acknowledged unchanged.
#[tracing::instrument(skip(state, req), fields(order_id = %req.id))]
pub async fn submit<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<SubmitOrderRequest>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let order_id = parse_order_id(&req.id)?;
    let items = req
        .items
        .into_iter()
        .map(|line| OrderLine::new(ProductId::new(line.product_id), line.quantity))
        .collect();

    let receipt = state
        .submissions
        .submit(SubmitOrder::new(order_id, req.customer_id, items))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            id: receipt.order_id.to_string(),
            status: "Accepted",
        }),
    ))
}

/// GET /orders/{id}: the full order record.
pub async fn get<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .submissions
        .lookup(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} not found")))?;
    Ok(Json(order.into()))
}
