//! Token service configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shortest allowed access-token lifetime.
pub const MINIMUM_TOKEN_EXPIRATION: Duration = Duration::from_secs(1);

/// Longest allowed access-token lifetime.
pub const MAXIMUM_TOKEN_EXPIRATION: Duration = Duration::from_secs(60 * 60);

/// Errors raised when validating a [`TokenServiceConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configured token expiration is outside the allowed range.
    #[error("token expiration must be between 1s and 1h, got {actual:?}")]
    ExpirationOutOfRange {
        /// The rejected value.
        actual: Duration,
    },
}

/// Configuration for the token service.
///
/// # Example (TOML)
///
/// ```toml
/// [security.tokens]
/// enabled = true
/// token_expiration = "20m"
/// delete_interval = "30m"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenServiceConfig {
    /// Enable/disable the token service entirely. When disabled, bearer
    /// authentication yields "no token" and every mutating call fails
    /// fast.
    pub enabled: bool,

    /// Access-token lifetime. Validated to be within 1 s ..= 1 h by
    /// [`TokenServiceConfig::validate`].
    #[serde(with = "humantime_serde")]
    pub token_expiration: Duration,

    /// Minimum interval between submissions of the expired-token sweeper.
    #[serde(with = "humantime_serde")]
    pub delete_interval: Duration,

    /// Request timeout handed to the sweeper, if any.
    #[serde(with = "humantime_serde::option")]
    pub delete_timeout: Option<Duration>,
}

impl Default for TokenServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_expiration: Duration::from_secs(20 * 60),
            delete_interval: Duration::from_secs(30 * 60),
            delete_timeout: None,
        }
    }
}

impl TokenServiceConfig {
    /// Validates the configured values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ExpirationOutOfRange`] if the token
    /// expiration is below 1 second or above 1 hour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_expiration < MINIMUM_TOKEN_EXPIRATION
            || self.token_expiration > MAXIMUM_TOKEN_EXPIRATION
        {
            return Err(ConfigError::ExpirationOutOfRange {
                actual: self.token_expiration,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TokenServiceConfig::default();
        assert!(config.enabled);
        assert_eq!(config.token_expiration, Duration::from_secs(1200));
        assert_eq!(config.delete_interval, Duration::from_secs(1800));
        assert!(config.delete_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn expiration_bounds_enforced() {
        let mut config = TokenServiceConfig {
            token_expiration: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.token_expiration = Duration::from_secs(2 * 60 * 60);
        assert!(config.validate().is_err());

        config.token_expiration = Duration::from_secs(1);
        assert!(config.validate().is_ok());
        config.token_expiration = Duration::from_secs(3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserializes_humantime_durations() {
        let config: TokenServiceConfig = serde_json::from_str(
            r#"{"enabled": true, "token_expiration": "20m", "delete_interval": "30m", "delete_timeout": "1m"}"#,
        )
        .unwrap();
        assert_eq!(config.token_expiration, Duration::from_secs(1200));
        assert_eq!(config.delete_timeout, Some(Duration::from_secs(60)));
    }
}
