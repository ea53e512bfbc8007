use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::metrics::AdmissionStats;
use crate::monitor::{MetricsSnapshot, Sample, Thresholds};
use crate::rate_limiter::{BucketReport, Decision};

pub const TOO_MANY_REQUESTS_MESSAGE: &str = "Too many requests, please try again later";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResponse {
    pub allowed: bool,
    pub bucket: String,
    pub key: String,
    pub remaining: u64,
    pub retry_after: Option<u64>,
}

impl RateLimitResponse {
    pub fn from_decision(bucket: &str, decision: Decision) -> Self {
        Self {
            allowed: decision.allowed,
            bucket: bucket.to_string(),
            key: decision.key,
            remaining: decision.remaining,
            retry_after: decision.retry_after_secs,
        }
    }
}

/// Body sent with every 429 from the rate limit middleware
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRejection {
    pub success: bool,
    pub message: &'static str,
    pub retry_after: u64,
}

impl RateLimitRejection {
    pub fn new(retry_after: u64) -> Self {
        Self {
            success: false,
            message: TOO_MANY_REQUESTS_MESSAGE,
            retry_after,
        }
    }
}

impl IntoResponse for RateLimitRejection {
    fn into_response(self) -> Response {
        (StatusCode::TOO_MANY_REQUESTS, Json(self)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct StoreReport {
    pub backend: &'static str,
    pub available: bool,
    pub transitions: u64,
}

#[derive(Debug, Serialize)]
pub struct ThresholdReport {
    pub http: Thresholds,
    pub query: Thresholds,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub requests: MetricsSnapshot,
    pub queries: MetricsSnapshot,
    pub status_breakdown: BTreeMap<u16, u64>,
    pub buckets: BTreeMap<String, BucketReport>,
    pub admissions: AdmissionStats,
    pub store: StoreReport,
    pub thresholds: ThresholdReport,
}

#[derive(Debug, Serialize)]
pub struct SlowQueriesResponse {
    pub count: usize,
    pub queries: Vec<Sample>,
}

impl SlowQueriesResponse {
    pub fn new(queries: Vec<Sample>) -> Self {
        Self {
            count: queries.len(),
            queries,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_body_shape() {
        let body = serde_json::to_value(RateLimitRejection::new(42)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "success": false,
                "message": "Too many requests, please try again later",
                "retryAfter": 42
            })
        );
    }

    #[test]
    fn test_rejection_status() {
        let response = RateLimitRejection::new(1).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_decision_response_uses_camel_case() {
        let decision = Decision {
            allowed: false,
            key: "10.0.0.1".to_string(),
            remaining: 0,
            retry_after_secs: Some(900),
        };
        let body = serde_json::to_value(RateLimitResponse::from_decision("auth", decision)).unwrap();
        assert_eq!(body["retryAfter"], 900);
        assert_eq!(body["bucket"], "auth");
        assert_eq!(body["allowed"], false);
    }
}
