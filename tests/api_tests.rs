use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use cashline::api::{self, AppState};
use cashline::storage::{AccountStore, InMemoryStore};
use cashline_core::Account;

fn app() -> Router {
    let store = InMemoryStore::with_accounts([Account::new(1, 1000, 0), Account::new(2, 50, 0)]);
    api::router(AppState::new(Arc::new(store) as Arc<dyn AccountStore>))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn debit_returns_new_balance_and_limit() {
    let app = app();
    let (status, body) = send(
        &app,
        post_json("/accounts/1/transactions", r#"{"type":"d","description":"rent","amount":500}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"balance": -500, "limit": 1000}));
}

#[tokio::test]
async fn debit_past_limit_is_unprocessable() {
    let app = app();
    let (status, body) = send(
        &app,
        post_json("/accounts/2/transactions", r#"{"type":"d","description":"big","amount":51}"#),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "limit_exceeded");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn malformed_payloads_are_invalid_requests() {
    let app = app();
    let payloads = [
        r#"{"type":"d","description":"x","amount":1.5}"#,
        r#"{"type":"x","description":"x","amount":1}"#,
        r#"{"type":"c","description":"abcdefghijk","amount":1}"#,
        r#"{"type":"c","description":"x","amount":0}"#,
        r#"{"type":"c","amount":1}"#,
        "not json",
    ];
    for payload in payloads {
        let (status, body) = send(&app, post_json("/accounts/1/transactions", payload)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "payload {}", payload);
        assert_eq!(body["code"], "invalid_request", "payload {}", payload);
    }

    let (_, statement) = send(&app, get("/accounts/1/statement")).await;
    assert_eq!(statement["balance"], 0);
    assert_eq!(statement["recent_entries"], json!([]));
}

#[tokio::test]
async fn path_id_is_checked_before_body() {
    let app = app();
    let (status, body) = send(&app, post_json("/accounts/abc/transactions", "not json")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_request");
    assert_eq!(body["error"], "invalid id");

    let (_, body) = send(&app, post_json("/accounts/1/transactions", "not json")).await;
    assert_eq!(body["error"], "invalid payload");
}

#[tokio::test]
async fn unknown_account_is_not_found() {
    let app = app();
    let (status, body) = send(
        &app,
        post_json("/accounts/42/transactions", r#"{"type":"c","description":"x","amount":1}"#),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = send(&app, get("/accounts/42/statement")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn statement_lists_entries_newest_first() {
    let app = app();
    for (kind, description, amount) in [("c", "salary", 300), ("d", "rent", 500)] {
        let payload = json!({"type": kind, "description": description, "amount": amount}).to_string();
        let (status, _) = send(&app, post_json("/accounts/1/transactions", &payload)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, get("/accounts/1/statement")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], -200);
    assert_eq!(body["limit"], 1000);
    assert!(body["queried_at"].is_string());

    let entries = body["recent_entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["type"], "d");
    assert_eq!(entries[0]["description"], "rent");
    assert_eq!(entries[0]["amount"], 500);
    assert!(entries[0]["created_at"].is_string());
    assert_eq!(entries[1]["type"], "c");
}

#[tokio::test]
async fn non_numeric_statement_id_is_invalid() {
    let app = app();
    let (status, body) = send(&app, get("/accounts/abc/statement")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app();
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn metrics_route_is_absent_without_recorder() {
    let app = app();
    let (status, _) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
