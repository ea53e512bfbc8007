use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::metrics::AdmissionStats;
use crate::rate_limiter::Decision;
use crate::response::{
    MessageResponse, MetricsResponse, RateLimitResponse, SlowQueriesResponse, StoreReport, ThresholdReport,
};
use crate::validation::RequestValidator;

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct SlowQueryParams {
    pub limit: Option<usize>,
}

/// Charge one point to `key` in the named bucket
pub async fn check_rate_limit(
    State(ctx): State<AppContext>,
    Path(bucket): Path<String>,
    Json(payload): Json<CheckRequest>,
) -> Result<Response> {
    let bucket = ctx.buckets.get(&bucket)?;
    let key = RequestValidator::validate_key(&payload.key)?;

    let decision = match ctx.limiter.consume(bucket, &key).await {
        Ok(outcome) => Decision {
            allowed: true,
            key,
            remaining: outcome.remaining,
            retry_after_secs: None,
        },
        Err(e @ Error::RateLimitExceeded { .. }) => Decision {
            allowed: false,
            key,
            remaining: 0,
            retry_after_secs: e.retry_after_secs(),
        },
        Err(e) => return Err(e),
    };

    let retry_after = decision.retry_after_secs;
    let mut response = Json(RateLimitResponse::from_decision(bucket.name(), decision)).into_response();

    if let Some(secs) = retry_after {
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }

    Ok(response)
}

/// Forget a key so its next request starts a fresh window
pub async fn delete_rate_limit(
    State(ctx): State<AppContext>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let bucket = ctx.buckets.get(&bucket)?;
    let key = RequestValidator::validate_key(&key)?;

    let existed = ctx.limiter.reset_key(bucket, &key).await?;
    let message = if existed {
        format!("Rate limit state for '{}' cleared", key)
    } else {
        format!("No rate limit state for '{}'", key)
    };

    Ok(Json(MessageResponse::new(message)))
}

pub async fn get_metrics(State(ctx): State<AppContext>) -> impl IntoResponse {
    let buckets = ctx.buckets.stats();
    let admissions = buckets
        .values()
        .fold(AdmissionStats::default(), |total, report| total.merge(&report.stats));

    Json(MetricsResponse {
        requests: ctx.requests.metrics(),
        queries: ctx.queries.metrics(),
        status_breakdown: ctx.requests.status_breakdown(),
        buckets,
        admissions,
        store: StoreReport {
            backend: ctx.store_backend(),
            available: ctx.health.is_available(),
            transitions: ctx.health.transitions(),
        },
        thresholds: ThresholdReport {
            http: ctx.requests.thresholds().clone(),
            query: ctx.queries.thresholds().clone(),
        },
    })
}

pub async fn get_slow_queries(
    State(ctx): State<AppContext>,
    Query(params): Query<SlowQueryParams>,
) -> Result<impl IntoResponse> {
    let limit = RequestValidator::validate_limit(params.limit)?;
    Ok(Json(SlowQueriesResponse::new(ctx.queries.slow_queries(limit))))
}

pub async fn reset_metrics(State(ctx): State<AppContext>) -> impl IntoResponse {
    ctx.requests.reset();
    ctx.queries.reset();
    Json(MessageResponse::new("Performance metrics reset"))
}

/// Health check endpoint. Always 200: a missing store only degrades the service.
pub async fn health_check(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.health_checker().check_health().await)
}

/// Readiness check endpoint
pub async fn readiness_check(State(ctx): State<AppContext>) -> impl IntoResponse {
    if ctx.health.is_available() {
        Json(serde_json::json!({
            "status": "ready",
            "store": ctx.store_backend(),
        }))
    } else {
        Json(serde_json::json!({
            "status": "ready",
            "store": "memory",
            "note": "Running on local counters only"
        }))
    }
}
