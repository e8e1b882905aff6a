//! Authentication cache configuration.
//!
//! Controls cache capacities, admission control towards the authority, the
//! initial grace period, and the TLS refresh retry delay.
//!
//! # Example (TOML)
//!
//! ```toml
//! stale_grace_period = "1m"
//! max_concurrent_requests = 10
//! tls_refresh_retry_delay = "5s"
//!
//! [cache]
//! permissions = 1024
//! passwords = 256
//! client_certs = 256
//!
//! [http]
//! request_timeout = "30s"
//! pool_max_idle_per_host = 100
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for [`AuthCacheService`](crate::AuthCacheService).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthCacheConfig {
    /// How long callers wait for the first snapshot before the stale error
    /// is reported. Zero disables waiting entirely.
    #[serde(with = "humantime_serde")]
    pub stale_grace_period: Duration,

    /// Maximum number of concurrent calls to the authority, across all
    /// verification kinds.
    pub max_concurrent_requests: usize,

    /// Delay before a failed TLS refresh callback is retried.
    #[serde(with = "humantime_serde")]
    pub tls_refresh_retry_delay: Duration,

    /// Cache capacities.
    pub cache: CacheConfig,

    /// HTTP client settings for the authority transport.
    pub http: HttpConfig,
}

impl Default for AuthCacheConfig {
    fn default() -> Self {
        Self {
            stale_grace_period: Duration::from_secs(60),
            max_concurrent_requests: 10,
            tls_refresh_retry_delay: Duration::from_secs(5),
            cache: CacheConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// Capacities of the three verification caches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Permission decision cache capacity.
    pub permissions: usize,

    /// Password identity cache capacity.
    pub passwords: usize,

    /// Client certificate identity cache capacity.
    pub client_certs: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            permissions: 1024,
            passwords: 256,
            client_certs: 256,
        }
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whole-request timeout enforced by the transport. `None` leaves
    /// requests unbounded.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Maximum idle pooled connections per authority host.
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            pool_max_idle_per_host: 100,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// The configuration document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

impl AuthCacheConfig {
    /// Parses and validates a TOML configuration document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML and
    /// `ConfigError::InvalidValue` if validation fails.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - `max_concurrent_requests` is zero
    /// - any cache capacity is zero
    /// - `tls_refresh_retry_delay` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::InvalidValue(
                "max_concurrent_requests must be > 0".to_string(),
            ));
        }

        for (name, capacity) in [
            ("permissions", self.cache.permissions),
            ("passwords", self.cache.passwords),
            ("client_certs", self.cache.client_certs),
        ] {
            if capacity == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "cache.{} capacity must be > 0",
                    name
                )));
            }
        }

        if self.tls_refresh_retry_delay.is_zero() {
            return Err(ConfigError::InvalidValue(
                "tls_refresh_retry_delay must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Sets the initial grace period.
    #[must_use]
    pub fn with_stale_grace_period(mut self, period: Duration) -> Self {
        self.stale_grace_period = period;
        self
    }

    /// Sets the authority concurrency limit.
    #[must_use]
    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = limit;
        self
    }

    /// Sets the TLS refresh retry delay.
    #[must_use]
    pub fn with_tls_refresh_retry_delay(mut self, delay: Duration) -> Self {
        self.tls_refresh_retry_delay = delay;
        self
    }
}
