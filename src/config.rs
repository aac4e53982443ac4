//! Gateway configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Upstream
//!
//! - `BACKEND_URL`: Base URL of the single upstream backend (default: `http://backend:5920`)
//! - `UPSTREAM_TIMEOUT_SECS`: Per-request upstream timeout (default: 30)
//! - `MAX_BODY_SIZE`: Maximum request/response body size in bytes (default: 50 MiB)
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_WINDOW_SECS`: Fixed window length (default: 60)
//! - `RATE_LIMIT_MAX`: Requests admitted per client per window (default: 60, 0 = disabled)
//! - `TRUSTED_PROXIES`: CIDR ranges whose `X-Forwarded-For` is honored (default: none)

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::error::{AppError, AppResult};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 5921;

/// Default upstream base URL (service name on the container network).
pub const DEFAULT_BACKEND_URL: &str = "http://backend:5920";

/// Default maximum body size (50 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 50 * 1024 * 1024;

/// Gateway configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Gateway will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 5921)
    pub port: u16,

    /// How long in-flight requests may run after a shutdown signal (default: 10s)
    pub shutdown_grace_period: Duration,

    // =========================================================================
    // Upstream Configuration
    // =========================================================================
    /// Base URL the inbound path and query are appended to
    pub backend_url: String,

    /// Timeout for one upstream call, send and body read included (default: 30s)
    pub upstream_timeout: Duration,

    /// Maximum request and response body size in bytes (default: 50 MiB)
    pub max_body_size: usize,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Fixed window length (default: 60s)
    pub rate_limit_window: Duration,

    /// Requests admitted per client identity per window (default: 60)
    /// Set to 0 to disable rate limiting
    pub rate_limit_max: u32,

    /// Trusted proxy CIDR ranges.
    /// Forwarded client IP headers are only honored when the TCP peer
    /// belongs to one of these networks; otherwise the peer address is used.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Value of the `service` field on every log event
    pub service_name: String,

    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or validate.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", DEFAULT_PORT)?,
            shutdown_grace_period: Duration::from_secs(Self::parse_env(
                "SHUTDOWN_GRACE_SECS",
                10,
            )?),

            // Upstream
            backend_url: env::var("BACKEND_URL")
                .ok()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            upstream_timeout: Duration::from_secs(Self::parse_env("UPSTREAM_TIMEOUT_SECS", 30)?),
            max_body_size: Self::parse_env("MAX_BODY_SIZE", DEFAULT_MAX_BODY_SIZE)?,

            // Rate limiting
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_max: Self::parse_env("RATE_LIMIT_MAX", 60)?,
            trusted_proxies: Self::parse_trusted_proxies(),

            // Observability
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "api-gateway".to_string()),
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 0)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        let url = Url::parse(&self.backend_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid BACKEND_URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::ConfigError(format!(
                "BACKEND_URL must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.upstream_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "UPSTREAM_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.max_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_max > 0
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse trusted proxy CIDR ranges from environment variable.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (forwarded headers are never honored)
    fn parse_trusted_proxies() -> Vec<String> {
        env::var("TRUSTED_PROXIES")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            shutdown_grace_period: Duration::from_secs(10),
            // Upstream
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            upstream_timeout: Duration::from_secs(30),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            // Rate limiting
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 60,
            trusted_proxies: vec![],
            // Observability
            service_name: "api-gateway".to_string(),
            log_level: "info".to_string(),
            metrics_port: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 5921);
        assert_eq!(config.rate_limit_max, 60);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.upstream_timeout, Duration::from_secs(30));
        assert_eq!(config.max_body_size, 50 * 1024 * 1024);
        assert_eq!(config.shutdown_grace_period, Duration::from_secs(10));
        assert!(config.metrics_addr().is_none());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_rate_limiting_enabled() {
        assert!(Config::default().rate_limiting_enabled());

        let config = Config {
            rate_limit_max: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_backend_url_not_absolute() {
        let config = Config {
            backend_url: "backend:5920/api".to_string(),
            ..Config::default()
        };

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("BACKEND_URL"), "{err}");
    }

    #[test]
    fn test_validate_backend_url_wrong_scheme() {
        let config = Config {
            backend_url: "ftp://backend:21".to_string(),
            ..Config::default()
        };

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("http or https"), "{err}");
    }

    #[test]
    fn test_validate_zero_window() {
        let config = Config {
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("RATE_LIMIT_WINDOW_SECS"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let config = Config {
            upstream_timeout: Duration::ZERO,
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_body_size() {
        let config = Config {
            max_body_size: 0,
            ..Config::default()
        };

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("MAX_BODY_SIZE"));
    }
}
