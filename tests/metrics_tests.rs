//! Installs the global Prometheus recorder, so it lives in its own test binary.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use tower::ServiceExt;

use cashline::api::{self, AppState};
use cashline::storage::{AccountStore, InMemoryStore};
use cashline::telemetry;
use cashline_core::Account;

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn every_request_is_counted_and_timed() {
    let handle = telemetry::install_metrics().expect("recorder installed once per binary");
    let store: Arc<dyn AccountStore> = Arc::new(InMemoryStore::with_accounts([Account::new(1, 1000, 0)]));
    let app = api::router(AppState::new(store).with_metrics(handle));

    call(&app, get("/accounts/1/statement")).await;
    call(&app, get("/accounts/abc/statement")).await;
    call(&app, get("/accounts/7/statement")).await;
    call(
        &app,
        Request::builder()
            .method(Method::POST)
            .uri("/accounts/abc/transactions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("not json"))
            .unwrap(),
    )
    .await;

    let (status, body) = call(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#"cashline_statements_total{outcome="ok"} 1"#), "{}", body);
    assert!(body.contains(r#"cashline_statements_total{outcome="invalid"} 1"#), "{}", body);
    assert!(body.contains(r#"cashline_statements_total{outcome="not_found"} 1"#), "{}", body);
    assert!(body.contains(r#"cashline_transactions_total{outcome="invalid"} 1"#), "{}", body);
    assert!(
        body.contains(r#"cashline_request_duration_seconds_count{route="statement"} 3"#),
        "{}",
        body
    );
}
