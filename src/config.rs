use clap::Parser;
use envconfig::Envconfig;
use std::net::SocketAddr;
use std::time::Duration;

use crate::redis_store::RedisOptions;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL, empty to run on local counters only
    #[envconfig(from = "REDIS_URL", default = "")]
    pub redis_url: String,

    #[envconfig(from = "ENVIRONMENT", default = "development")]
    pub environment: String,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Local counter sweep interval in seconds
    #[envconfig(from = "CLEANUP_INTERVAL", default = "300")]
    pub cleanup_interval_secs: u64,

    #[envconfig(from = "REDIS_CONNECT_TIMEOUT_MS", default = "2000")]
    pub redis_connect_timeout_ms: u64,

    #[envconfig(from = "REDIS_COMMAND_TIMEOUT_MS", default = "500")]
    pub redis_command_timeout_ms: u64,

    /// Store health probe interval in seconds
    #[envconfig(from = "HEALTH_PROBE_INTERVAL", default = "10")]
    pub health_probe_interval_secs: u64,
}

/// Command line overrides for the environment
#[derive(Debug, Default, Parser)]
#[command(name = "gatewatch", version, about = "Admission control and request monitoring service")]
pub struct Cli {
    #[arg(long)]
    pub bind_addr: Option<SocketAddr>,

    #[arg(long)]
    pub redis_url: Option<String>,

    #[arg(long)]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn apply_cli(mut self, cli: Cli) -> Self {
        if let Some(bind_addr) = cli.bind_addr {
            self.bind_addr = bind_addr;
        }
        if let Some(redis_url) = cli.redis_url {
            self.redis_url = redis_url;
        }
        if let Some(log_level) = cli.log_level {
            self.log_level = log_level;
        }
        self
    }

    pub fn redis_enabled(&self) -> bool {
        !self.redis_url.trim().is_empty()
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn redis_options(&self) -> RedisOptions {
        RedisOptions {
            connect_timeout: Duration::from_millis(self.redis_connect_timeout_ms),
            command_timeout: Duration::from_millis(self.redis_command_timeout_ms),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn health_probe_interval(&self) -> Duration {
        Duration::from_secs(self.health_probe_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            redis_url: String::new(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
            cleanup_interval_secs: 300,
            redis_connect_timeout_ms: 2000,
            redis_command_timeout_ms: 500,
            health_probe_interval_secs: 10,
        }
    }
}
