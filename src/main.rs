use anyhow::Result;
use clap::Parser;
use gatewatch::config::{Cli, Config};
use gatewatch::config_validator::ConfigValidator;
use gatewatch::context::AppContext;
use gatewatch::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?
        .apply_cli(cli);
    ConfigValidator::validate(&config)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gatewatch={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        bind_addr = %config.bind_addr,
        environment = %config.environment,
        redis = config.redis_enabled(),
        "Starting gatewatch"
    );

    let ctx = AppContext::initialize(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize: {}", e))?;

    Server::new(ctx).run().await
}
