//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::Backends;
use api::config::Config;
use api::seed::Seed;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const CUSTOMER_ID: &str = "6f1c2a3e-8d4b-4c1e-9f7a-2b3c4d5e6f70";

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

async fn setup() -> (axum::Router, Arc<api::AppState>, Backends) {
    let metrics_handle = get_metrics_handle();
    let (state, backends, _worker) = api::create_default_state(&Config::default());

    let seed: Seed = serde_json::from_value(serde_json::json!({
        "customers": [{ "id": CUSTOMER_ID, "name": "Ada" }],
        "products": [
            { "sku": "SKU-001", "name": "Widget", "price_cents": 1000, "stock": 10 },
            { "sku": "SKU-002", "name": "Gadget", "price_cents": 2500, "stock": 1 }
        ]
    }))
    .unwrap();
    seed.apply(&backends.customers, &backends.catalog, &backends.ledger)
        .await
        .unwrap();

    let app = api::create_app(state.clone(), metrics_handle);
    (app, state, backends)
}

fn order_body(items: serde_json::Value) -> Body {
    Body::from(
        serde_json::to_string(&serde_json::json!({
            "customer_id": CUSTOMER_ID,
            "items": items,
            "payment_method": "card",
            "payment_token": "tok_visa"
        }))
        .unwrap(),
    )
}

fn post(uri: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _, _) = setup().await;

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["pending_compensations"], 0);
}

#[tokio::test]
async fn test_place_order() {
    let (app, _, backends) = setup().await;

    let response = app
        .clone()
        .oneshot(post(
            "/orders",
            order_body(serde_json::json!([
                { "sku": "SKU-001", "quantity": 2 },
                { "sku": "SKU-002", "quantity": 1 }
            ])),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = json_body(response).await;
    assert_eq!(json["status"], "Confirmed");
    assert_eq!(json["total_cents"], 4500);
    assert_eq!(json["lines"][0]["product_name"], "Widget");
    assert_eq!(json["lines"][0]["total_cents"], 2000);
    assert!(json["payment_ref"].as_str().is_some());

    let id = json["id"].as_str().unwrap();
    let response = app.oneshot(get(&format!("/orders/{id}"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "Confirmed");

    assert_eq!(backends.payment.charge_count(), 1);
}

#[tokio::test]
async fn test_insufficient_stock_is_conflict() {
    let (app, _, _) = setup().await;

    let response = app
        .clone()
        .oneshot(post(
            "/orders",
            order_body(serde_json::json!([{ "sku": "SKU-002", "quantity": 2 }])),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = json_body(response).await;
    assert_eq!(json["kind"], "insufficient_stock");
    assert!(json["error"].as_str().unwrap().contains("SKU-002"));

    let response = app.oneshot(get("/stock/SKU-002")).await.unwrap();
    let json = json_body(response).await;
    assert_eq!(json["available"], 1);
    assert_eq!(json["reserved"], 0);
}

#[tokio::test]
async fn test_rejected_orders_map_to_client_errors() {
    let (app, _, _) = setup().await;

    let response = app
        .clone()
        .oneshot(post("/orders", order_body(serde_json::json!([]))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["kind"], "invalid_input");

    let response = app
        .oneshot(post(
            "/orders",
            order_body(serde_json::json!([{ "sku": "SKU-404", "quantity": 1 }])),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["kind"], "product_not_found");
}

#[tokio::test]
async fn test_declined_payment_is_payment_required() {
    let (app, state, backends) = setup().await;
    backends.payment.set_decline(Some("card declined"));

    let response = app
        .clone()
        .oneshot(post(
            "/orders",
            order_body(serde_json::json!([{ "sku": "SKU-001", "quantity": 3 }])),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json_body(response).await["kind"], "payment_declined");

    state.coordinator.compensation().wait_idle().await;
    let response = app.oneshot(get("/stock/SKU-001")).await.unwrap();
    let json = json_body(response).await;
    assert_eq!(json["available"], 10);
    assert_eq!(json["reserved"], 0);
}

#[tokio::test]
async fn test_get_order_errors() {
    let (app, _, _) = setup().await;

    let response = app.clone().oneshot(get("/orders/not-a-uuid")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get("/orders/00000000-0000-0000-0000-000000000000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stock_endpoints() {
    let (app, _, _) = setup().await;

    let response = app
        .clone()
        .oneshot(post(
            "/stock/SKU-003/restock",
            Body::from(r#"{"quantity": 7}"#),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["sku"], "SKU-003");
    assert_eq!(json["available"], 7);
    assert_eq!(json["on_hand"], 7);

    let response = app
        .clone()
        .oneshot(post(
            "/stock/SKU-003/restock",
            Body::from(r#"{"quantity": 0}"#),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(post("/stock/SKU-003/adjust", Body::from(r#"{"delta": -2}"#)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["available"], 5);

    let response = app
        .clone()
        .oneshot(post("/stock/SKU-003/adjust", Body::from(r#"{"delta": -50}"#)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.clone().oneshot(get("/stock/SKU-999")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // A rejected adjustment leaves no stock record behind.
    let response = app
        .clone()
        .oneshot(post("/stock/SKU-998/adjust", Body::from(r#"{"delta": -1}"#)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = app.oneshot(get("/stock/SKU-998")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_resubmitting_order_id() {
    let (app, _, backends) = setup().await;
    let order_id = "5d2c9b1e-7a3f-4b6d-8e0c-1f2a3b4c5d6e";
    let body = || {
        Body::from(
            serde_json::to_string(&serde_json::json!({
                "order_id": order_id,
                "customer_id": CUSTOMER_ID,
                "items": [{ "sku": "SKU-001", "quantity": 2 }],
                "payment_method": "card",
                "payment_token": "tok_visa"
            }))
            .unwrap(),
        )
    };

    let response = app.clone().oneshot(post("/orders", body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let first = json_body(response).await;

    let response = app.clone().oneshot(post("/orders", body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let second = json_body(response).await;

    assert_eq!(second["id"], order_id);
    assert_eq!(second["payment_ref"], first["payment_ref"]);
    assert_eq!(second["reservation_ids"], first["reservation_ids"]);
    assert_eq!(backends.payment.authorize_calls(), 1);

    let response = app.clone().oneshot(get("/stock/SKU-001")).await.unwrap();
    assert_eq!(json_body(response).await["available"], 8);

    // An ID whose attempt failed cannot be reused.
    let failed_id = "7e4a1c2b-3d5f-4a6b-9c8d-0e1f2a3b4c5d";
    let failed_body = |quantity: u32| {
        Body::from(
            serde_json::to_string(&serde_json::json!({
                "order_id": failed_id,
                "customer_id": CUSTOMER_ID,
                "items": [{ "sku": "SKU-002", "quantity": quantity }],
                "payment_method": "card",
                "payment_token": "tok_visa"
            }))
            .unwrap(),
        )
    };
    let response = app
        .clone()
        .oneshot(post("/orders", failed_body(5)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.oneshot(post("/orders", failed_body(1))).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = json_body(response).await;
    assert_eq!(json["kind"], "duplicate_order");
}

#[tokio::test]
async fn test_saga_status() {
    let (app, _, _) = setup().await;
    let order_id = "0b8e4f2a-1c3d-4e5f-8a9b-0c1d2e3f4a5b";

    let response = app
        .clone()
        .oneshot(post(
            "/orders",
            Body::from(
                serde_json::to_string(&serde_json::json!({
                    "order_id": order_id,
                    "customer_id": CUSTOMER_ID,
                    "items": [{ "sku": "SKU-001", "quantity": 1 }],
                    "payment_method": "wallet",
                    "payment_token": "tok_wallet"
                }))
                .unwrap(),
            ),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(get(&format!("/sagas/{order_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["state"], "Confirmed");
    assert_eq!(json["persisted"], true);
    assert_eq!(json["reservation_ids"].as_array().unwrap().len(), 1);

    let response = app
        .oneshot(get("/sagas/00000000-0000-0000-0000-000000000000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _, _) = setup().await;

    let response = app
        .clone()
        .oneshot(post(
            "/orders",
            order_body(serde_json::json!([{ "sku": "SKU-001", "quantity": 1 }])),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("saga_executions_total"));
    assert!(text.contains("compensation_pending"));
}
