use crate::config::Config;
use crate::error::Error;

const VALID_ENVIRONMENTS: [&str; 4] = ["development", "staging", "production", "test"];
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validates configuration objects for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<(), Error> {
        if config.redis_enabled() {
            Self::validate_redis_url(&config.redis_url)?;
        }
        Self::validate_environment(&config.environment)?;
        Self::validate_log_level(&config.log_level)?;

        if config.redis_command_timeout_ms == 0 {
            return Err(Error::Configuration(
                "Redis command timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_redis_url(url: &str) -> Result<(), Error> {
        if url.is_empty() {
            return Err(Error::Configuration("Redis URL cannot be empty".to_string()));
        }

        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(Error::Configuration(
                "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_environment(env: &str) -> Result<(), Error> {
        if !VALID_ENVIRONMENTS.contains(&env.to_lowercase().as_str()) {
            return Err(Error::Configuration(format!(
                "Invalid environment '{}'. Must be one of: {:?}",
                env, VALID_ENVIRONMENTS
            )));
        }

        Ok(())
    }

    pub fn validate_log_level(level: &str) -> Result<(), Error> {
        if !VALID_LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
            return Err(Error::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                level, VALID_LOG_LEVELS
            )));
        }

        Ok(())
    }
}
