//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::InMemoryOrderRepository;
use saga::{InMemoryCatalog, InMemoryPaymentGateway};
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    catalog: InMemoryCatalog,
    gateway: InMemoryPaymentGateway,
}

async fn setup() -> TestApp {
    let catalog = InMemoryCatalog::new()
        .with_product("P1", "Coffee", 10.0, 50)
        .with_product("P2", "Tea", 5.0, 1);
    let gateway = InMemoryPaymentGateway::new();
    let state = api::create_in_memory_state(
        InMemoryOrderRepository::seeded(),
        catalog.clone(),
        gateway.clone(),
    )
    .await
    .unwrap();

    TestApp {
        app: api::create_app(state, get_metrics_handle()),
        catalog,
        gateway,
    }
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn order_body(product_id: &str, quantity: u32) -> Value {
    json!({
        "payment_method_id": 1,
        "items": [{"product_id": product_id, "quantity": quantity}]
    })
}

#[tokio::test]
async fn test_health_check() {
    let t = setup().await;

    let (status, json) = send(&t.app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_place_order() {
    let t = setup().await;

    let (status, json) = send(&t.app, post_json("/orders", order_body("P1", 2))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "success");
    assert_eq!(json["data"]["amount"], 2000);
    assert_eq!(json["data"]["fee"], 14);
    assert_eq!(json["data"]["status"], "pending");
    assert_eq!(json["data"]["payment_type"], "qris");
    assert!(json["data"]["transaction_number"].as_str().is_some());
    assert_eq!(t.catalog.quantity_of("P1"), Some(48));
    assert_eq!(t.gateway.charge_count(), 1);
}

#[tokio::test]
async fn test_place_and_get_order() {
    let t = setup().await;

    let (_, created) = send(&t.app, post_json("/orders", order_body("P1", 3))).await;
    let id = created["data"]["order_id"].as_i64().unwrap();

    let (status, json) = send(&t.app, get(&format!("/orders/{id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["id"], id);
    assert_eq!(json["data"]["amount"], 3000);
    assert_eq!(json["data"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(json["data"]["items"][0]["quantity"], 3);
}

#[tokio::test]
async fn test_list_orders() {
    let t = setup().await;
    send(&t.app, post_json("/orders", order_body("P1", 1))).await;
    send(&t.app, post_json("/orders", order_body("P1", 1))).await;

    let (status, json) = send(&t.app, get("/orders")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_insufficient_stock_is_conflict() {
    let t = setup().await;

    let (status, json) = send(&t.app, post_json("/orders", order_body("P2", 100))).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["status"], "error");
    assert!(json["errors"].as_str().unwrap().contains("Insufficient stock"));
    assert_eq!(t.catalog.quantity_of("P2"), Some(1));
    assert_eq!(t.gateway.charge_count(), 0);
}

#[tokio::test]
async fn test_empty_cart_is_bad_request() {
    let t = setup().await;

    let (status, json) = send(
        &t.app,
        post_json("/orders", json!({"payment_method_id": 1, "items": []})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_oversized_quantity_is_bad_request() {
    let t = setup().await;

    let body = order_body("P1", 3_000_000_000);
    let (status, json) = send(&t.app, post_json("/orders", body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["errors"].as_str().unwrap().contains("Invalid quantity"));
    assert_eq!(t.catalog.batch_calls(), 0);
    assert_eq!(t.gateway.charge_count(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let t = setup().await;

    let (status, json) = send(&t.app, post_json("/orders", json!({"items": "nope"}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_unknown_product_is_not_found() {
    let t = setup().await;

    let (status, _) = send(&t.app, post_json("/orders", order_body("P9", 1))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(t.catalog.batch_calls(), 0);
}

#[tokio::test]
async fn test_gateway_failure_restores_stock() {
    let t = setup().await;
    t.gateway.set_fail_on_charge(true);

    let (status, _) = send(&t.app, post_json("/orders", order_body("P1", 5))).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(t.catalog.quantity_of("P1"), Some(50));
}

#[tokio::test]
async fn test_get_unknown_order_is_not_found() {
    let t = setup().await;

    let (status, json) = send(&t.app, get("/orders/999")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_get_order_with_invalid_id() {
    let t = setup().await;

    let (status, _) = send(&t.app, get("/orders/not-a-number")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_settlement_notification_marks_order_paid() {
    let t = setup().await;
    let (_, created) = send(&t.app, post_json("/orders", order_body("P1", 1))).await;
    let txn = created["data"]["transaction_number"].as_str().unwrap().to_string();
    let id = created["data"]["order_id"].as_i64().unwrap();

    let (status, json) = send(
        &t.app,
        post_json(
            "/orders/payments/notifications",
            json!({"order_id": txn, "transaction_status": "settlement", "fraud_status": "accept"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["payment_status"], "success");

    let (_, order) = send(&t.app, get(&format!("/orders/{id}"))).await;
    assert_eq!(order["data"]["payment_status"], "success");
    assert!(order["data"]["paid_at"].as_str().is_some());
}

#[tokio::test]
async fn test_unknown_transaction_notification_is_not_found() {
    let t = setup().await;

    let (status, _) = send(
        &t.app,
        post_json(
            "/orders/payments/notifications",
            json!({"order_id": "0191c9a4-0000-7000-8000-000000000000", "transaction_status": "settlement"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_late_notification_is_forbidden() {
    let t = setup().await;
    t.gateway.set_payment_window(chrono::Duration::seconds(-60));
    let (_, created) = send(&t.app, post_json("/orders", order_body("P1", 1))).await;
    let txn = created["data"]["transaction_number"].as_str().unwrap().to_string();

    let (status, json) = send(
        &t.app,
        post_json(
            "/orders/payments/notifications",
            json!({"order_id": txn, "transaction_status": "settlement"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup().await;
    send(&t.app, post_json("/orders", order_body("P1", 1))).await;

    let response = t.app.clone().oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("saga_executions_total"));
}
