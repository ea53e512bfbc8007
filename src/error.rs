use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Rate limit exceeded, retry in {ms_before_next}ms")]
    RateLimitExceeded { ms_before_next: u64 },

    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Unknown rate limit bucket: {0}")]
    UnknownBucket(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Seconds a rejected client should wait, rounded up and never zero.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Error::RateLimitExceeded { ms_before_next } => Some(ms_before_next.div_ceil(1000).max(1)),
            _ => None,
        }
    }

    /// Whether this error comes from the backing store rather than the caller.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_) | Error::Redis(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::StoreUnavailable(_) | Error::Redis(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::UnknownBucket(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Configuration(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        let code = err.status_code().as_u16();
        match err {
            Error::RateLimitExceeded { .. } => {
                Self::new("rate_limit_exceeded", "Too many requests, please try again later", code)
            }
            Error::StoreUnavailable(msg) => Self::new("service_unavailable", msg, code),
            Error::Redis(e) => Self::new("service_unavailable", &e.to_string(), code),
            Error::UnknownBucket(name) => Self::new("not_found", &format!("No bucket named '{}'", name), code),
            Error::Configuration(msg) => Self::new("configuration_error", msg, code),
            Error::Validation(msg) => Self::new("validation_error", msg, code),
            Error::Internal(msg) => Self::new("internal_error", msg, code),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), Json(ErrorResponse::from_error(&self))).into_response();
        if let Some(retry_after) = self.retry_after_secs() {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
