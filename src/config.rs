//! Node configuration for task supervision and resource distribution.
//!
//! Covers the content-store daemon endpoint, the retry policy applied to
//! every client command, the local resource root, memory sampling and the
//! default task timeout.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration shared by the supervisor and the resource manager.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    // Content store settings
    /// Host of the local hyperdrive daemon.
    pub hyperdrive_host: String,
    /// RPC port of the local hyperdrive daemon.
    pub hyperdrive_port: u16,
    /// Timeout of a single client request.
    pub request_timeout: Duration,

    // Retry settings
    /// Total attempts per client command, including the first one.
    pub retry_max_attempts: u32,
    /// Linear backoff unit: attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,

    // Storage settings
    /// Root under which every task gets its own resource namespace.
    pub resource_root: PathBuf,

    // Supervision settings
    /// Sampling interval of the host memory monitor.
    pub memory_sample_interval: Duration,
    /// Default task timeout; zero disables timeout usage.
    pub task_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            hyperdrive_host: "127.0.0.1".to_string(),
            hyperdrive_port: 3292,
            request_timeout: Duration::from_secs(60),

            retry_max_attempts: 3,
            retry_backoff: Duration::from_millis(500),

            resource_root: PathBuf::from("./resources"),

            memory_sample_interval: Duration::from_millis(500),
            task_timeout: Duration::ZERO,
        }
    }
}

impl CoreConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PEER_HYPERDRIVE_HOST`: daemon host (default: 127.0.0.1)
    /// - `PEER_HYPERDRIVE_PORT`: daemon port (default: 3292)
    /// - `PEER_REQUEST_TIMEOUT_SECS`: client request timeout (default: 60)
    /// - `PEER_RETRY_MAX_ATTEMPTS`: attempts per command (default: 3)
    /// - `PEER_RETRY_BACKOFF_MS`: linear backoff unit (default: 500)
    /// - `PEER_RESOURCE_ROOT`: resource root directory (default: ./resources)
    /// - `PEER_MEMORY_SAMPLE_MS`: memory sampling interval (default: 500)
    /// - `PEER_TASK_TIMEOUT_SECS`: default task timeout, 0 disables (default: 0)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PEER_HYPERDRIVE_HOST") {
            config.hyperdrive_host = val;
        }

        if let Ok(val) = std::env::var("PEER_HYPERDRIVE_PORT") {
            config.hyperdrive_port = parse_env_value(&val, "PEER_HYPERDRIVE_PORT")?;
        }

        if let Ok(val) = std::env::var("PEER_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "PEER_REQUEST_TIMEOUT_SECS")?;
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("PEER_RETRY_MAX_ATTEMPTS") {
            config.retry_max_attempts = parse_env_value(&val, "PEER_RETRY_MAX_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("PEER_RETRY_BACKOFF_MS") {
            let ms: u64 = parse_env_value(&val, "PEER_RETRY_BACKOFF_MS")?;
            config.retry_backoff = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("PEER_RESOURCE_ROOT") {
            config.resource_root = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("PEER_MEMORY_SAMPLE_MS") {
            let ms: u64 = parse_env_value(&val, "PEER_MEMORY_SAMPLE_MS")?;
            config.memory_sample_interval = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("PEER_TASK_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "PEER_TASK_TIMEOUT_SECS")?;
            config.task_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hyperdrive_host.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "hyperdrive_host cannot be empty".to_string(),
            ));
        }

        if self.hyperdrive_port == 0 {
            return Err(ConfigError::ValidationFailed(
                "hyperdrive_port must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        if self.retry_max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry_max_attempts must be at least 1".to_string(),
            ));
        }

        if self.memory_sample_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "memory_sample_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Base URL of the hyperdrive RPC endpoint.
    pub fn hyperdrive_url(&self) -> String {
        format!("http://{}:{}", self.hyperdrive_host, self.hyperdrive_port)
    }

    /// Builder method to set the daemon host.
    pub fn with_hyperdrive_host(mut self, host: impl Into<String>) -> Self {
        self.hyperdrive_host = host.into();
        self
    }

    /// Builder method to set the daemon port.
    pub fn with_hyperdrive_port(mut self, port: u16) -> Self {
        self.hyperdrive_port = port;
        self
    }

    /// Builder method to set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder method to set the retry bound.
    pub fn with_retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = attempts;
        self
    }

    /// Builder method to set the retry backoff unit.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Builder method to set the resource root.
    pub fn with_resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resource_root = root.into();
        self
    }

    /// Builder method to set the memory sampling interval.
    pub fn with_memory_sample_interval(mut self, interval: Duration) -> Self {
        self.memory_sample_interval = interval;
        self
    }

    /// Builder method to set the default task timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }
}

/// Parses an environment variable value.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.hyperdrive_host, "127.0.0.1");
        assert_eq!(config.hyperdrive_port, 3292);
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_backoff, Duration::from_millis(500));
        assert!(config.task_timeout.is_zero());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = CoreConfig::new()
            .with_hyperdrive_host("10.0.0.2")
            .with_hyperdrive_port(4000)
            .with_retry_max_attempts(5)
            .with_retry_backoff(Duration::from_millis(10))
            .with_resource_root("/var/lib/peer")
            .with_task_timeout(Duration::from_secs(30));

        assert_eq!(config.hyperdrive_url(), "http://10.0.0.2:4000");
        assert_eq!(config.retry_max_attempts, 5);
        assert_eq!(config.resource_root, PathBuf::from("/var/lib/peer"));
        assert_eq!(config.task_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validation_zero_attempts() {
        let config = CoreConfig::default().with_retry_max_attempts(0);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("retry_max_attempts"));
    }

    #[test]
    fn test_validation_empty_host() {
        let config = CoreConfig::default().with_hyperdrive_host("");
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("hyperdrive_host"));
    }

    #[test]
    fn test_validation_zero_sample_interval() {
        let config = CoreConfig::default().with_memory_sample_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_env_value() {
        let port: u16 = parse_env_value("8080", "PORT").unwrap();
        assert_eq!(port, 8080);

        let err = parse_env_value::<u16>("eighty", "PORT").unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
