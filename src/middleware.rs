use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::context::AppContext;
use crate::key_generator::{extract_client_ip, KeyStrategy, RequestContext};
use crate::monitor::request::CompletedRequest;
use crate::rate_limiter::{Bucket, RateLimiter};
use crate::response::RateLimitRejection;

/// Authenticated user id, inserted into request extensions by the auth layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Logging middleware for request/response tracking
pub async fn logging_middleware(mut request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = client_ip(&request);

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    info!(
        target: "gatewatch::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        request_id = %request_id,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    info!(
        target: "gatewatch::middleware",
        method = %method,
        uri = %uri,
        status = %response.status(),
        request_id = %request_id,
        "Request finished"
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Times every request and records it in the request monitor.
pub async fn monitoring_middleware(State(ctx): State<AppContext>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let user_id = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.0.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    ctx.requests.record_request(CompletedRequest {
        method,
        route,
        status: response.status().as_u16(),
        duration,
        user_id,
    });

    if ctx.config.is_development() {
        if let Ok(value) = HeaderValue::from_str(&format!("{}ms", duration.as_millis())) {
            response.headers_mut().insert("x-response-time", value);
        }
    }
    response
}

/// State for one rate limited route group
#[derive(Clone)]
pub struct RateLimitLayer {
    pub limiter: Arc<RateLimiter>,
    pub bucket: Bucket,
    pub strategy: KeyStrategy,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>, bucket: Bucket, strategy: KeyStrategy) -> Self {
        Self {
            limiter,
            bucket,
            strategy,
        }
    }
}

/// Rejects requests over budget with 429 and a `Retry-After` hint.
pub async fn rate_limit_middleware(State(layer): State<RateLimitLayer>, request: Request, next: Next) -> Response {
    let ctx = request_context(&request);

    match layer.limiter.admit(&layer.bucket, &ctx, layer.strategy).await {
        Ok(decision) if decision.allowed => {
            let mut response = next.run(request).await;
            if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
                response.headers_mut().insert("x-ratelimit-remaining", value);
            }
            response
        }
        Ok(decision) => {
            let retry_after = decision.retry_after_secs.unwrap_or(1);
            let mut response = RateLimitRejection::new(retry_after).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
        Err(e) => {
            // not the caller's fault, let the request through
            tracing::error!(bucket = layer.bucket.name(), error = %e, "Rate limit check failed, allowing request");
            next.run(request).await
        }
    }
}

fn client_ip(request: &Request) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    extract_client_ip(request.headers(), peer)
}

fn request_context(request: &Request) -> RequestContext {
    RequestContext {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        source_addr: client_ip(request),
        identity: request
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.0.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    #[test]
    fn test_request_context_from_headers_and_extensions() {
        let mut request = HttpRequest::builder()
            .method("POST")
            .uri("/api/auth/login?next=/")
            .header("x-forwarded-for", "198.51.100.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(AuthenticatedUser("15".to_string()));

        let ctx = request_context(&request);
        assert_eq!(ctx.method, "POST");
        assert_eq!(ctx.path, "/api/auth/login");
        assert_eq!(ctx.source_addr, "198.51.100.7");
        assert_eq!(ctx.identity.as_deref(), Some("15"));
    }

    #[test]
    fn test_client_ip_from_connect_info() {
        let mut request = HttpRequest::new(Body::empty());
        let addr: SocketAddr = "192.0.2.10:40000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_ip(&request), "192.0.2.10");
    }

    #[test]
    fn test_client_ip_fallback() {
        let request = HttpRequest::new(Body::empty());
        assert_eq!(client_ip(&request), "unknown");
    }
}
