use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::{Error, Result};

/// Static policy for one logical rate limit bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BucketConfig {
    #[validate(length(min = 1, max = 64))]
    pub key_prefix: String,
    /// Points available per window
    #[validate(range(min = 1))]
    pub points: u64,
    #[serde(with = "humantime_serde")]
    #[validate(custom(function = "validate_window"))]
    pub duration: Duration,
    /// Cooldown entered on exhaustion, zero disables it
    #[serde(with = "humantime_serde")]
    pub block_duration: Duration,
}

fn validate_window(window: &Duration) -> std::result::Result<(), ValidationError> {
    if window.as_secs() == 0 {
        return Err(ValidationError::new("window_too_short"));
    }
    Ok(())
}

impl BucketConfig {
    pub fn new(key_prefix: &str, points: u64, duration: Duration, block_duration: Duration) -> Self {
        Self {
            key_prefix: key_prefix.to_string(),
            points,
            duration,
            block_duration,
        }
    }

    /// Login and registration attempts: 5 per 15 minutes, then blocked for 15 minutes.
    pub fn auth() -> Self {
        Self::new("auth", 5, Duration::from_secs(15 * 60), Duration::from_secs(15 * 60))
    }

    /// General API traffic: 100 per 15 minutes, no cooldown.
    pub fn general() -> Self {
        Self::new("api", 100, Duration::from_secs(15 * 60), Duration::ZERO)
    }

    pub fn password_reset() -> Self {
        Self::new("pwd_reset", 3, Duration::from_secs(60 * 60), Duration::from_secs(60 * 60))
    }

    pub fn email_verify() -> Self {
        Self::new("email_verify", 3, Duration::from_secs(5 * 60), Duration::from_secs(5 * 60))
    }

    /// The four buckets every deployment starts with.
    pub fn presets() -> [Self; 4] {
        [Self::auth(), Self::general(), Self::password_reset(), Self::email_verify()]
    }

    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::Validation(format!("bucket '{}': {}", self.key_prefix, e)))
    }

    pub fn has_block(&self) -> bool {
        !self.block_duration.is_zero()
    }

    pub fn window_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    pub fn block_ms(&self) -> u64 {
        self.block_duration.as_millis() as u64
    }
}
