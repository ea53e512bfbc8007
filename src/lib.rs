pub mod alert;
pub mod clock;
pub mod config;
pub mod config_validator;
pub mod context;
pub mod error;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod memory_store;
pub mod metrics;
pub mod middleware;
pub mod monitor;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod redis_store;
pub mod response;
pub mod server;
pub mod store;
pub mod validation;

pub use config::Config;
pub use context::AppContext;
pub use error::{Error, Result};
pub use server::create_app;
