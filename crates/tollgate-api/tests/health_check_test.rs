//! Integration tests for the health, readiness, and liveness endpoints.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use tollgate_testing::TestApp;

#[tokio::test]
async fn health_reports_event_log_and_senders() {
    let app = TestApp::new();

    let response = app.get("/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["checks"]["event_log"]["status"], "up");
    assert_eq!(response.body["senders"], serde_json::json!(["atlas", "lexi"]));
    assert_eq!(response.body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn health_degrades_when_event_log_is_down() {
    let app = TestApp::new();
    app.store.set_unavailable(true);

    let health = app.get("/health", None).await;
    let ready = app.get("/ready", None).await;

    assert_eq!(health.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health.body["status"], "unhealthy");
    assert_eq!(health.body["checks"]["event_log"]["status"], "down");
    assert!(health.body["checks"]["event_log"]["message"].is_string());
    assert_eq!(ready.status, StatusCode::SERVICE_UNAVAILABLE);
}

/// Liveness does not depend on storage.
#[tokio::test]
async fn liveness_ignores_storage() {
    let app = TestApp::new();
    app.store.set_unavailable(true);

    let response = app.get("/live", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "alive");
    assert_eq!(response.body["service"], "tollgate");
}
