//! Key derivation for rate limiting.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// The parts of an incoming request the limiter cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub source_addr: String,
    /// Authenticated user id, if an upstream auth layer resolved one
    pub identity: Option<String>,
}

impl RequestContext {
    pub fn new(method: &str, path: &str, source_addr: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            source_addr: source_addr.to_string(),
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

/// Strategy for generating rate limit keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// Client address only
    #[default]
    SourceAddress,
    /// `user:{id}` when authenticated, client address otherwise
    IdentityOrAddress,
    /// `{address}:{path}`, one budget per endpoint
    AddressAndRoute,
}

impl KeyStrategy {
    pub fn key_for(&self, ctx: &RequestContext) -> String {
        match self {
            KeyStrategy::SourceAddress => ctx.source_addr.clone(),
            KeyStrategy::IdentityOrAddress => match &ctx.identity {
                Some(id) => format!("user:{}", id),
                None => ctx.source_addr.clone(),
            },
            KeyStrategy::AddressAndRoute => format!("{}:{}", ctx.source_addr, ctx.path),
        }
    }
}

/// Resolve the client address, preferring proxy headers over the socket peer.
pub fn extract_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    header("x-forwarded-for")
        .and_then(|xff| xff.split(',').next().map(str::trim))
        .or_else(|| header("x-real-ip"))
        .or_else(|| header("cf-connecting-ip"))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
