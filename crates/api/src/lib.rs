//! HTTP API and process wiring for the order pipeline.
//!
//! Provides REST endpoints for order submission, lookup and pipeline
//! statistics, with structured logging (tracing) and Prometheus metrics.
//! Also hosts the pieces shared by the `api` and `order-worker` binaries.

pub mod config;
pub mod error;
pub mod routes;
pub mod shutdown;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use broker::QueueDiagnostics;
use domain::{StatsAggregator, SubmissionHandler};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore> {
    pub submissions: SubmissionHandler<S>,
    pub stats: StatsAggregator<S>,
    pub store: S,
}

impl<S: OrderStore + Clone> AppState<S> {
    pub fn new(store: S, diagnostics: Arc<dyn QueueDiagnostics>) -> Self {
        Self {
            submissions: SubmissionHandler::new(store.clone()),
            stats: StatsAggregator::new(store.clone(), diagnostics),
            store,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::submit::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/stats", get(routes::stats::get::<S>))
        .route("/inventory", get(routes::inventory::list::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
