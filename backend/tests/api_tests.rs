//! HTTP API tests
//!
//! Drives the router end to end against the in-memory store.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use stock_ledger::middleware::ACTOR_HEADER;
use stock_ledger::store::MemoryStore;
use stock_ledger::{create_app, AppState, Config};

fn app() -> Router {
    create_app(AppState::new(
        Arc::new(MemoryStore::new()),
        Config::default(),
    ))
}

fn post(uri: &str, actor: Option<Uuid>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(actor) = actor {
        builder = builder.header(ACTOR_HEADER, actor.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

struct Ids {
    warehouse_id: Uuid,
    product_id: Uuid,
    unit_id: Uuid,
}

impl Ids {
    fn new() -> Self {
        Self {
            warehouse_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
        }
    }

    fn movement(&self, movement_type: &str, quantity: &str) -> Value {
        json!({
            "warehouse_id": self.warehouse_id,
            "product_id": self.product_id,
            "unit_id": self.unit_id,
            "movement_type": movement_type,
            "quantity": quantity,
        })
    }
}

#[tokio::test]
async fn test_health_check() {
    let response = app().oneshot(get("/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "connected");
}

#[tokio::test]
async fn test_movement_requires_actor() {
    let ids = Ids::new();
    let response = app()
        .oneshot(post(
            "/api/v1/stock/movements",
            None,
            ids.movement("in", "5"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_insufficient_stock_is_unprocessable() {
    let app = app();
    let ids = Ids::new();
    let actor = Uuid::new_v4();

    let response = app
        .clone()
        .oneshot(post(
            "/api/v1/stock/movements",
            Some(actor),
            ids.movement("in", "5"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let entry = body_json(response).await;
    assert_eq!(entry["actor_id"], json!(actor));

    let response = app
        .oneshot(post(
            "/api/v1/stock/movements",
            Some(actor),
            ids.movement("out", "6"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INSUFFICIENT_STOCK");
    assert_eq!(body["error"]["available"], "5");
    assert_eq!(body["error"]["requested"], "6");
}

#[tokio::test]
async fn test_adjustment_is_not_a_plain_movement() {
    let ids = Ids::new();
    let response = app()
        .oneshot(post(
            "/api/v1/stock/movements",
            Some(Uuid::new_v4()),
            ids.movement("adjustment", "1"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_entries_export_as_csv() {
    let app = app();
    let ids = Ids::new();
    let response = app
        .clone()
        .oneshot(post(
            "/api/v1/stock/movements",
            Some(Uuid::new_v4()),
            ids.movement("in", "3"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let uri = format!(
        "/api/v1/stock/entries?warehouse_id={}&format=csv",
        ids.warehouse_id
    );
    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/csv"
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let mut lines = text.lines();
    assert!(lines.next().unwrap().starts_with("sequence,entry_id"));
    assert_eq!(lines.count(), 1);
}

#[tokio::test]
async fn test_entries_are_paged() {
    let app = app();
    let ids = Ids::new();
    for qty in ["1", "2", "3"] {
        let response = app
            .clone()
            .oneshot(post(
                "/api/v1/stock/movements",
                Some(Uuid::new_v4()),
                ids.movement("in", qty),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let uri = format!(
        "/api/v1/stock/entries?warehouse_id={}&page=2&per_page=2",
        ids.warehouse_id
    );
    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["quantity"], "3");
    assert_eq!(entries[0]["balance_after"], "6");
}

#[tokio::test]
async fn test_out_of_range_quantity_is_bad_request() {
    let ids = Ids::new();
    let response = app()
        .oneshot(post(
            "/api/v1/stock/movements",
            Some(Uuid::new_v4()),
            ids.movement("in", "0.0000006"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_transfer_lifecycle_over_http() {
    let app = app();
    let ids = Ids::new();
    let actor = Some(Uuid::new_v4());
    let destination = Uuid::new_v4();

    app.clone()
        .oneshot(post(
            "/api/v1/stock/movements",
            actor,
            ids.movement("in", "100"),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post(
            "/api/v1/transfers",
            actor,
            json!({
                "from_warehouse_id": ids.warehouse_id,
                "to_warehouse_id": destination,
                "items": [{
                    "product_id": ids.product_id,
                    "unit_id": ids.unit_id,
                    "requested_quantity": "20",
                }],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let transfer = body_json(response).await;
    let transfer_id = transfer["id"].as_str().unwrap().to_string();
    let item_id = transfer["items"][0]["id"].as_str().unwrap().to_string();

    for step in ["submit", "approve", "ship"] {
        let response = app
            .clone()
            .oneshot(post(
                &format!("/api/v1/transfers/{}/{}", transfer_id, step),
                actor,
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "step {step}");
    }

    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/v1/transfers/{}/receive", transfer_id),
            actor,
            json!({
                "lines": [{
                    "item_id": item_id,
                    "received_quantity": "18",
                    "damaged_quantity": "2",
                }],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let transfer = body_json(response).await;
    assert_eq!(transfer["status"], "completed");

    // Receiving again is a duplicate posting
    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/v1/transfers/{}/receive", transfer_id),
            actor,
            json!({
                "lines": [{
                    "item_id": item_id,
                    "received_quantity": "18",
                }],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(get(&format!(
            "/api/v1/transfers/{}/summary",
            transfer_id
        )))
        .await
        .unwrap();
    let summary = body_json(response).await;
    assert_eq!(summary["total_variance"], "-2");
}

#[tokio::test]
async fn test_unknown_transfer_is_not_found() {
    let response = app()
        .oneshot(get(&format!("/api/v1/transfers/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
