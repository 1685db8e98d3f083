//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use observable_cache::{api::create_router, AppState, ManualClock, ObservableCache};
use serde_json::Value;
use tower::ServiceExt;

// == Helper Functions ==

fn create_test_app() -> (Router, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let state = AppState::new(ObservableCache::with_clock(clock.clone()), 64);
    (create_router(state), clock)
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

// == ADD Endpoint Tests ==

#[tokio::test]
async fn test_add_endpoint_success() {
    let (app, _) = create_test_app();

    let (status, json) = send(&app, "POST", "/add", Some(r#"{"key":"k","value":"v"}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["change_type"], "added");
    assert_eq!(json["sequence"], 1);
    assert!(json["message"].as_str().unwrap().contains("'k'"));
}

#[tokio::test]
async fn test_add_endpoint_duplicate_conflict() {
    let (app, _) = create_test_app();
    send(&app, "POST", "/add", Some(r#"{"key":"k","value":"v"}"#)).await;

    let (status, json) = send(&app, "POST", "/add", Some(r#"{"key":"k","value":"w"}"#)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("Duplicate key"));
}

#[tokio::test]
async fn test_add_endpoint_empty_key() {
    let (app, _) = create_test_app();

    let (status, json) = send(&app, "POST", "/add", Some(r#"{"key":"","value":"v"}"#)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json.get("error").is_some());
}

// == SET Endpoint Tests ==

#[tokio::test]
async fn test_set_endpoint_upsert() {
    let (app, _) = create_test_app();

    let (_, first) = send(&app, "PUT", "/set", Some(r#"{"key":"k","value":"a"}"#)).await;
    let (_, second) = send(&app, "PUT", "/set", Some(r#"{"key":"k","value":"b"}"#)).await;
    let (status, got) = send(&app, "GET", "/get/k", None).await;

    assert_eq!(first["change_type"], "added");
    assert_eq!(second["change_type"], "value_replaced");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(got["value"], "b");
    assert_eq!(got["version"], second["version"]);
}

// == GET / DELETE Endpoint Tests ==

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let (app, _) = create_test_app();

    let (status, json) = send(&app, "GET", "/get/nonexistent", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("nonexistent"));
}

#[tokio::test]
async fn test_delete_endpoint() {
    let (app, _) = create_test_app();
    send(&app, "POST", "/add", Some(r#"{"key":"k","value":"v"}"#)).await;

    let (status, json) = send(&app, "DELETE", "/del/k", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["change_type"], "removed");

    let (status, _) = send(&app, "DELETE", "/del/k", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// == Expiration Tests ==

#[tokio::test]
async fn test_add_with_ttl_expires_on_read() {
    let (app, clock) = create_test_app();
    send(
        &app,
        "POST",
        "/add",
        Some(r#"{"key":"k","value":"v","ttl_ms":100}"#),
    )
    .await;

    let (_, got) = send(&app, "GET", "/get/k", None).await;
    assert_eq!(got["expires_in_ms"], 100);

    clock.advance(Duration::from_millis(100));
    let (status, _) = send(&app, "GET", "/get/k", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expire_endpoint_with_replacement() {
    let (app, clock) = create_test_app();
    send(&app, "PUT", "/set", Some(r#"{"key":"k","value":"stale"}"#)).await;

    let (status, json) = send(
        &app,
        "PUT",
        "/expire/k",
        Some(r#"{"ttl_ms":50,"replace_with":"fresh"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["replaces"], true);

    clock.advance(Duration::from_millis(50));
    let (_, got) = send(&app, "GET", "/get/k", None).await;
    assert_eq!(got["value"], "fresh");

    let (_, feed) = send(&app, "GET", "/changes?after=1", None).await;
    let kinds: Vec<&str> = feed["changes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["change_type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["expired", "value_replaced"]);
}

#[tokio::test]
async fn test_expire_endpoint_missing_key() {
    let (app, _) = create_test_app();

    let (status, _) = send(&app, "PUT", "/expire/nope", Some(r#"{"ttl_ms":50}"#)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expire_endpoint_zero_ttl() {
    let (app, _) = create_test_app();
    send(&app, "PUT", "/set", Some(r#"{"key":"k","value":"v"}"#)).await;

    let (status, _) = send(&app, "PUT", "/expire/k", Some(r#"{"ttl_ms":0}"#)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// == CLEAR / CHANGES Endpoint Tests ==

#[tokio::test]
async fn test_clear_emits_reset() {
    let (app, _) = create_test_app();
    send(&app, "POST", "/add", Some(r#"{"key":"a","value":"1"}"#)).await;
    send(&app, "POST", "/add", Some(r#"{"key":"b","value":"2"}"#)).await;

    let (status, json) = send(&app, "POST", "/clear", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["change_type"], "reset");

    let (_, feed) = send(&app, "GET", "/changes", None).await;
    let changes = feed["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 3);
    assert_eq!(changes[2]["change_type"], "reset");
    assert!(changes[2]["key"].is_null());
    assert_eq!(feed["failures"], serde_json::json!([]));
    assert_eq!(feed["latest_sequence"], 3);

    let (_, stats) = send(&app, "GET", "/stats", None).await;
    assert_eq!(stats["total_entries"], 0);
}

#[tokio::test]
async fn test_changes_after_filters() {
    let (app, _) = create_test_app();
    for key in ["a", "b", "c"] {
        let body = format!(r#"{{"key":"{}","value":"v"}}"#, key);
        send(&app, "POST", "/add", Some(&body)).await;
    }

    let (_, feed) = send(&app, "GET", "/changes?after=2", None).await;
    let changes = feed["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["key"], "c");
    assert_eq!(changes[0]["sequence"], 3);
}

// == STATS / HEALTH Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint_tracks_reads() {
    let (app, _) = create_test_app();
    send(&app, "POST", "/add", Some(r#"{"key":"k","value":"v"}"#)).await;
    send(&app, "GET", "/get/k", None).await;
    send(&app, "GET", "/get/missing", None).await;

    let (status, json) = send(&app, "GET", "/stats", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hits"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["hit_rate"], 0.5);
    assert_eq!(json["total_entries"], 1);
    assert_eq!(json["subscribers"], 1);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_app();

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert!(json.get("timestamp").is_some());
}
