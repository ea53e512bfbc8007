use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use gatewatch::alert::RecordingAlertSink;
use gatewatch::clock::SystemClock;
use gatewatch::health::StoreHealth;
use gatewatch::monitor::query::sanitize_sql;
use gatewatch::monitor::{Outcome, SampleMeta};
use gatewatch::{create_app, AppContext, Config};

fn test_context() -> AppContext {
    AppContext::assemble(
        Config::default(),
        None,
        Arc::new(StoreHealth::new()),
        Arc::new(SystemClock),
        Arc::new(RecordingAlertSink::new()),
    )
    .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

fn check(bucket: &str, key: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/rate-limit/{}/check", bucket))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "key": key }).to_string()))
        .unwrap()
}

fn get(uri: &str, client: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_auth_bucket_allows_five_then_rejects() {
    let app = create_app(test_context());

    for i in 0..5 {
        let (status, _, body) = send(&app, check("auth", "203.0.113.9")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], true);
        assert_eq!(body["remaining"], 4 - i);
    }

    let (status, headers, body) = send(&app, check("auth", "203.0.113.9")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["allowed"], false);

    let retry_after: u64 = headers[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
    assert!(retry_after > 0 && retry_after <= 900);
    assert_eq!(body["retryAfter"], retry_after);

    // other keys keep their own budget
    let (status, _, _) = send(&app, check("auth", "203.0.113.10")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_bucket_and_bad_key() {
    let app = create_app(test_context());

    let (status, _, body) = send(&app, check("uploads", "k")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);

    let (status, _, _) = send(&app, check("auth", "not a key!")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_delete_resets_key() {
    let app = create_app(test_context());

    for _ in 0..4 {
        send(&app, check("pwd_reset", "jane@example.com")).await;
    }
    let (status, _, _) = send(&app, check("pwd_reset", "jane@example.com")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let request = Request::builder()
        .method("DELETE")
        .uri("/rate-limit/pwd_reset/jane@example.com")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("cleared"));

    let (status, _, _) = send(&app, check("pwd_reset", "jane@example.com")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_general_bucket_guards_metrics_routes() {
    let app = create_app(test_context());

    for _ in 0..100 {
        let (status, headers, _) = send(&app, get("/metrics", "198.51.100.1")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.contains_key("x-ratelimit-remaining"));
    }

    let (status, headers, body) = send(&app, get("/metrics", "198.51.100.1")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        body,
        json!({
            "success": false,
            "message": "Too many requests, please try again later",
            "retryAfter": body["retryAfter"].as_u64().unwrap()
        })
    );
    assert!(headers.contains_key(header::RETRY_AFTER));

    // health probes are never limited
    let (status, _, _) = send(&app, get("/health", "198.51.100.1")).await;
    assert_eq!(status, StatusCode::OK);

    // another client is unaffected
    let (status, _, _) = send(&app, get("/metrics", "198.51.100.2")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_report_requests_and_buckets() {
    let ctx = test_context();
    let app = create_app(ctx.clone());

    send(&app, check("auth", "1.1.1.1")).await;
    send(&app, check("nope", "1.1.1.1")).await;

    let (status, _, body) = send(&app, get("/metrics", "10.0.0.1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requests"]["total"], 2);
    assert_eq!(body["requests"]["failed_count"], 1);
    assert_eq!(body["status_breakdown"]["404"], 1);
    assert_eq!(body["buckets"]["auth"]["stats"]["allowed"], 1);
    assert_eq!(body["buckets"]["auth"]["backend"], "memory");
    assert_eq!(body["store"]["backend"], "memory");
    assert_eq!(body["store"]["available"], false);
    assert_eq!(body["queries"]["total"], 0);
    assert_eq!(body["queries"]["success_rate_percent"], 100);
}

#[tokio::test]
async fn test_slow_queries_listing_and_reset() {
    let ctx = test_context();
    let app = create_app(ctx.clone());

    for ms in [150, 250, 40] {
        ctx.queries.inner().record(
            SampleMeta::new(sanitize_sql("SELECT * FROM users WHERE id = $1")),
            Duration::from_millis(ms),
            Outcome::Success,
        );
    }

    let (status, _, body) = send(&app, get("/metrics/slow-queries?limit=1", "10.0.0.2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["queries"][0]["duration_ms"], 250);
    assert_eq!(body["queries"][0]["label"], "SELECT * FROM users WHERE id = ?");

    let (status, _, _) = send(&app, get("/metrics/slow-queries?limit=0", "10.0.0.2")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let reset = Request::builder()
        .method("POST")
        .uri("/metrics/reset")
        .header("x-forwarded-for", "10.0.0.2")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&app, reset).await;
    assert_eq!(status, StatusCode::OK);

    let (_, _, body) = send(&app, get("/metrics/slow-queries", "10.0.0.2")).await;
    assert_eq!(body["count"], 0);
    assert_eq!(ctx.queries.metrics().total, 0);
}

#[tokio::test]
async fn test_health_is_degraded_without_store() {
    let app = create_app(test_context());

    let (status, _, body) = send(&app, get("/health", "10.0.0.3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["dependencies"]["counter_store"]["backend"], "memory");

    let (status, _, body) = send(&app, get("/ready", "10.0.0.3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_request_id_and_response_time_headers() {
    let app = create_app(test_context());

    let (_, headers, _) = send(&app, get("/ready", "10.0.0.4")).await;
    assert!(headers.contains_key("x-request-id"));
    assert!(headers["x-response-time"].to_str().unwrap().ends_with("ms"));

    let request = Request::builder()
        .uri("/ready")
        .header("x-request-id", "trace-123")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(&app, request).await;
    assert_eq!(headers["x-request-id"], "trace-123");
}
