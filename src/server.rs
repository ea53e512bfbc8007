use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::handlers::{
    check_rate_limit, delete_rate_limit, get_metrics, get_slow_queries, health_check, readiness_check,
    reset_metrics,
};
use crate::key_generator::KeyStrategy;
use crate::middleware::{logging_middleware, monitoring_middleware, rate_limit_middleware, RateLimitLayer};

/// Build the HTTP surface.
///
/// The admission check and health probes are not rate limited; everything
/// else draws from the general bucket.
pub fn create_app(ctx: AppContext) -> Router {
    let general = RateLimitLayer::new(
        ctx.limiter.clone(),
        ctx.buckets.general.clone(),
        KeyStrategy::IdentityOrAddress,
    );

    let limited = Router::new()
        .route("/metrics", get(get_metrics))
        .route("/metrics/slow-queries", get(get_slow_queries))
        .route("/metrics/reset", post(reset_metrics))
        .route("/rate-limit/:bucket/:key", delete(delete_rate_limit))
        .route_layer(middleware::from_fn_with_state(general, rate_limit_middleware));

    Router::new()
        .route("/rate-limit/:bucket/check", post(check_rate_limit))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .merge(limited)
        .layer(middleware::from_fn_with_state(ctx.clone(), monitoring_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
        .with_state(ctx)
}

pub struct Server {
    ctx: AppContext,
}

impl Server {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.ctx.config.bind_addr;
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!(%addr, backend = self.ctx.store_backend(), "gatewatch listening");
        tracing::info!("Health check available at /health");
        tracing::info!("Metrics available at /metrics");

        let app = create_app(self.ctx.clone());
        let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await;

        self.ctx.shutdown().await;
        result?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
