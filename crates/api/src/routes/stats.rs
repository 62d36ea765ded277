//! Pipeline statistics endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use domain::OrderStats;
use order_store::OrderStore;

use crate::AppState;
use crate::error::ApiError;

/// GET /stats: order counts and best-effort queue depth.
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<OrderStats>, ApiError> {
    Ok(Json(state.stats.collect().await?))
}
