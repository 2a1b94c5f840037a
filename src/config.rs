//! Process configuration for the `grpc-guard` binary.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use guard_telemetry::TelemetryConfig;
use secrecy::{ExposeSecret, SecretString};

use crate::server::{ServerConfig, ServerOptions, TracingConfig, derived_bind_address};

/// gRPC server configuration.
///
/// All values can be set via environment variables or CLI arguments.
#[derive(Debug, Clone, Parser)]
#[command(name = "grpc-guard", about = "gRPC server with debug logging, panic recovery and error masking")]
pub struct Config {
    /// Public address; the server listens on the port just below it
    #[arg(long, env = "GRPC_ADDRESS", default_value = "0.0.0.0:9090")]
    pub grpc_address: String,

    /// Export OpenTelemetry spans and record call metrics
    #[arg(long, env = "GRPC_TRACING", default_value = "false")]
    pub tracing: bool,

    /// OpenTelemetry OTLP endpoint
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Service name attached to exported spans
    #[arg(long, env = "SERVICE_NAME", default_value = "grpc-guard")]
    pub service_name: String,

    /// Log the start and outcome of every call
    #[arg(long, env = "DEBUG_REQUESTS", default_value = "false")]
    pub debug_requests: bool,

    /// Per-call timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Max concurrent calls per connection
    #[arg(long, env = "CONCURRENCY_LIMIT")]
    pub concurrency_limit: Option<usize>,

    /// Prometheus scrape address; metrics are not exported when unset
    #[arg(long, env = "METRICS_ADDRESS")]
    pub metrics_address: Option<SocketAddr>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Use JSON log format
    #[arg(long, env = "JSON_LOGS", default_value = "true")]
    pub json_logs: bool,

    /// Sentry DSN for error tracking
    #[arg(long, env = "SENTRY_DSN")]
    pub sentry_dsn: Option<SecretString>,

    /// Environment name (e.g., "production", "development")
    #[arg(long, env = "ENVIRONMENT")]
    pub environment: Option<String>,
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid gRPC address: {0}")]
    InvalidAddress(#[from] crate::error::ServerError),
    #[error("Request timeout must be > 0")]
    InvalidRequestTimeout,
    #[error("Concurrency limit must be > 0")]
    InvalidConcurrencyLimit,
    #[error("Service name must not be empty when tracing is enabled")]
    MissingServiceName,
}

impl Config {
    /// Parse and validate configuration.
    ///
    /// # Errors
    /// Returns an error if a value fails validation.
    pub fn init() -> anyhow::Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), ConfigError> {
        derived_bind_address(&self.grpc_address)?;
        if self.request_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidRequestTimeout);
        }
        if self.concurrency_limit == Some(0) {
            return Err(ConfigError::InvalidConcurrencyLimit);
        }
        if self.tracing && self.service_name.trim().is_empty() {
            return Err(ConfigError::MissingServiceName);
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Logging and error tracking settings.
    #[must_use]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            log_level: self.log_level.clone(),
            json_logs: self.json_logs,
            sentry_dsn: self
                .sentry_dsn
                .as_ref()
                .map(|dsn| dsn.expose_secret().to_string()),
            environment: self.environment.clone(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    /// Server settings without capabilities or services.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.grpc_address.clone())
            .with_tracing(TracingConfig {
                enabled: self.tracing,
                otlp_endpoint: self.otlp_endpoint.clone(),
                service_name: self.service_name.clone(),
            })
            .with_options(ServerOptions {
                timeout: self.request_timeout(),
                concurrency_limit_per_connection: self.concurrency_limit,
                ..ServerOptions::default()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            grpc_address: "0.0.0.0:9090".to_string(),
            tracing: false,
            otlp_endpoint: None,
            service_name: "grpc-guard".to_string(),
            debug_requests: false,
            request_timeout_secs: Some(30),
            concurrency_limit: None,
            metrics_address: None,
            log_level: "INFO".to_string(),
            json_logs: false,
            sentry_dsn: Some(SecretString::from("https://key@sentry.example/1")),
            environment: None,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn address_without_usable_port_rejected() {
        let mut config = test_config();
        config.grpc_address = "0.0.0.0".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAddress(_))
        ));

        config.grpc_address = "0.0.0.0:0".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = test_config();
        config.request_timeout_secs = Some(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRequestTimeout)
        ));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut config = test_config();
        config.concurrency_limit = Some(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConcurrencyLimit)
        ));
    }

    #[test]
    fn tracing_requires_service_name() {
        let mut config = test_config();
        config.tracing = true;
        config.service_name = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingServiceName)
        ));
    }

    #[test]
    fn telemetry_config_exposes_dsn() {
        let telemetry = test_config().telemetry_config();
        assert_eq!(
            telemetry.sentry_dsn.as_deref(),
            Some("https://key@sentry.example/1")
        );
        assert!(telemetry.version.is_some());
    }

    #[test]
    fn server_config_carries_address_and_timeout() {
        let config = test_config();
        let server = config.server_config();
        assert_eq!(server.address(), "0.0.0.0:9090");
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn debug_output_redacts_dsn() {
        let rendered = format!("{:?}", test_config());
        assert!(!rendered.contains("key@sentry"));
    }
}
