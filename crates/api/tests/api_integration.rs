//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use broker::InMemoryBroker;
use common::Money;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, InventoryItem, OrderStore};
use order_worker::OrderWorker;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn setup() -> (axum::Router, InMemoryOrderStore, InMemoryBroker) {
    let store = InMemoryOrderStore::with_inventory([
        InventoryItem::new("P1", 100, Money::from_cents(2999)),
        InventoryItem::new("P2", 5, Money::from_cents(1499)),
    ])
    .await;
    let broker = InMemoryBroker::new();
    let state = Arc::new(api::AppState::new(store.clone(), Arc::new(broker.clone())));
    let app = api::create_app(state, get_metrics_handle());
    (app, store, broker)
}

async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post_order(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/orders")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _, _) = setup().await;

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_submit_order_is_accepted() {
    let (app, store, _) = setup().await;
    let id = uuid::Uuid::new_v4();

    let response = app
        .oneshot(post_order(serde_json::json!({
            "id": id,
            "customerId": "alice",
            "items": [{ "productId": "P1", "quantity": 2 }]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json["id"], id.to_string());
    assert_eq!(json["status"], "Accepted");
    assert_eq!(store.order_count().await, 1);
    assert_eq!(store.outbox_count().await, 1);
}

#[tokio::test]
async fn test_resubmission_returns_same_response_without_writes() {
    let (app, store, _) = setup().await;
    let id = uuid::Uuid::new_v4();

    let first = app
        .clone()
        .oneshot(post_order(serde_json::json!({
            "id": id,
            "customerId": "alice",
            "items": [{ "productId": "P1", "quantity": 2 }]
        })))
        .await
        .unwrap();
    let second = app
        .clone()
        .oneshot(post_order(serde_json::json!({
            "id": id,
            "customerId": "bob",
            "items": []
        })))
        .await
        .unwrap();

    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(first).await, json_body(second).await);
    assert_eq!(store.order_count().await, 1);
    assert_eq!(store.outbox_count().await, 1);

    let order = json_body(app.oneshot(get(&format!("/orders/{id}"))).await.unwrap()).await;
    assert_eq!(order["customerId"], "alice");
}

#[tokio::test]
async fn test_invalid_order_id_is_rejected() {
    let (app, store, _) = setup().await;

    let response = app
        .oneshot(post_order(serde_json::json!({
            "id": "not-a-uuid",
            "customerId": "alice",
            "items": []
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(store.order_count().await, 0);
}

#[tokio::test]
async fn test_missing_customer_is_rejected() {
    let (app, store, _) = setup().await;

    let response = app
        .oneshot(post_order(serde_json::json!({
            "id": uuid::Uuid::new_v4(),
            "items": [{ "productId": "P1", "quantity": 1 }]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert!(json["error"].as_str().unwrap().contains("customerId"));
    assert_eq!(store.order_count().await, 0);
}

#[tokio::test]
async fn test_negative_quantity_is_rejected_before_any_write() {
    let (app, store, _) = setup().await;

    let response = app
        .oneshot(post_order(serde_json::json!({
            "id": uuid::Uuid::new_v4(),
            "customerId": "alice",
            "items": [{ "productId": "P1", "quantity": -3 }]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(store.order_count().await, 0);
    assert_eq!(store.outbox_count().await, 0);
}

#[tokio::test]
async fn test_get_pending_then_processed_order() {
    let (app, store, _) = setup().await;
    let id = uuid::Uuid::new_v4();
    app.clone()
        .oneshot(post_order(serde_json::json!({
            "id": id,
            "customerId": "alice",
            "items": [{ "productId": "P1", "quantity": 2 }]
        })))
        .await
        .unwrap();

    let pending = app
        .clone()
        .oneshot(get(&format!("/orders/{id}")))
        .await
        .unwrap();
    assert_eq!(pending.status(), StatusCode::OK);
    let pending = json_body(pending).await;
    assert_eq!(pending["status"], "Pending");
    assert!(pending["totalAmountCents"].is_null());
    assert!(pending["processedAt"].is_null());
    assert_eq!(pending["items"][0]["productId"], "P1");

    OrderWorker::new(store.clone())
        .process(common::OrderId::from_uuid(id))
        .await
        .unwrap();

    let processed = json_body(app.oneshot(get(&format!("/orders/{id}"))).await.unwrap()).await;
    assert_eq!(processed["status"], "Processed");
    assert_eq!(processed["totalAmountCents"], 5998);
    assert_eq!(processed["totalAmount"], "59.98");
    assert!(processed["processedAt"].is_string());
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let (app, _, _) = setup().await;
    let fake_id = uuid::Uuid::new_v4();

    let response = app.oneshot(get(&format!("/orders/{fake_id}"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats_reflect_submissions() {
    let (app, _, _) = setup().await;
    for _ in 0..3 {
        app.clone()
            .oneshot(post_order(serde_json::json!({
                "id": uuid::Uuid::new_v4(),
                "customerId": "alice",
                "items": []
            })))
            .await
            .unwrap();
    }

    let response = app.oneshot(get("/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let stats = json_body(response).await;
    assert_eq!(stats["totalOrders"], 3);
    assert!(stats["lastMinute"]["created"].as_u64().unwrap() >= 3);
    assert_eq!(stats["lastMinute"]["processed"], 0);
    assert_eq!(stats["totalByStatus"][0]["status"], "Pending");
    assert_eq!(stats["totalByStatus"][0]["count"], 3);
    assert_eq!(stats["queue"]["messagesInQueue"], 0);
    assert!(stats["timestamp"].is_string());
}

#[tokio::test]
async fn test_inventory_listing() {
    let (app, store, _) = setup().await;
    store
        .upsert_inventory(InventoryItem::new("P0", 7, Money::from_cents(500)))
        .await
        .unwrap();

    let response = app.oneshot(get("/inventory")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let items = json_body(response).await;
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["productId"], "P0");
    assert_eq!(items[1]["unitPriceCents"], 2999);
    assert_eq!(items[1]["unitPrice"], "29.99");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _, _) = setup().await;

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}
