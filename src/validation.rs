use crate::error::{Error, Result};

pub const MAX_KEY_LENGTH: usize = 256;
pub const DEFAULT_SLOW_QUERY_LIMIT: usize = 10;
pub const MAX_SLOW_QUERY_LIMIT: usize = 100;

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// Validates a caller supplied rate limit key and returns it trimmed.
    ///
    /// Keys may be addresses, emails or `user:<id>` style identities.
    pub fn validate_key(key: &str) -> Result<String> {
        let key = key.trim();

        if key.is_empty() {
            return Err(Error::Validation("Rate limit key cannot be empty".to_string()));
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(Error::Validation(format!(
                "Rate limit key cannot exceed {} characters",
                MAX_KEY_LENGTH
            )));
        }

        if !key
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@'))
        {
            return Err(Error::Validation(
                "Rate limit key contains invalid characters".to_string(),
            ));
        }

        Ok(key.to_string())
    }

    /// Resolves the `limit` query parameter of the slow query listing.
    pub fn validate_limit(limit: Option<usize>) -> Result<usize> {
        match limit {
            None => Ok(DEFAULT_SLOW_QUERY_LIMIT),
            Some(limit) if (1..=MAX_SLOW_QUERY_LIMIT).contains(&limit) => Ok(limit),
            Some(limit) => Err(Error::Validation(format!(
                "limit must be between 1 and {}, got {}",
                MAX_SLOW_QUERY_LIMIT, limit
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert_eq!(RequestValidator::validate_key(" 10.0.0.1 ").unwrap(), "10.0.0.1");
        assert!(RequestValidator::validate_key("user:42").is_ok());
        assert!(RequestValidator::validate_key("jane.doe@example.com").is_ok());
        assert!(RequestValidator::validate_key("2001:db8::1").is_ok());
    }

    #[test]
    fn test_invalid_key_format() {
        assert!(RequestValidator::validate_key("").is_err());
        assert!(RequestValidator::validate_key("invalid key!").is_err());
        assert!(RequestValidator::validate_key(&"a".repeat(MAX_KEY_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_validate_limit() {
        assert_eq!(RequestValidator::validate_limit(None).unwrap(), 10);
        assert_eq!(RequestValidator::validate_limit(Some(3)).unwrap(), 3);
        assert!(matches!(RequestValidator::validate_limit(Some(0)), Err(Error::Validation(_))));
        assert!(RequestValidator::validate_limit(Some(101)).is_err());
    }
}
