//! Telemetry setup for structured logging, Prometheus metrics, and Sentry error tracking.
//!
//! This crate provides the process-wide observability stack for gRPC services:
//! - **Logging**: `tracing` subscriber with JSON or compact console output
//! - **Metrics**: Prometheus recorder and scrape listener for the `metrics` facade
//! - **Error tracking**: Sentry client used by the error and panic reporters
//!
//! Span export (OpenTelemetry) is configured per server by `grpc-guard`.
//!
//! # Features
//! - `prometheus` (default): Prometheus metrics exporter
//! - `sentry` (default): Sentry error tracking

use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "sentry")]
pub use sentry;

/// Filter directives quieting chatty transport crates.
const NOISY_CRATES: &[&str] = &[
    "tower=info",
    "h2=info",
    "hyper=info",
    "tonic=info",
    "sentry=warn",
    "opentelemetry=warn",
];

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub log_level: String,
    /// Use JSON log format
    pub json_logs: bool,
    /// Sentry DSN (optional)
    pub sentry_dsn: Option<String>,
    /// Environment name (e.g., "production", "development")
    pub environment: Option<String>,
    /// Application version
    pub version: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json_logs: true,
            sentry_dsn: None,
            environment: None,
            version: None,
        }
    }
}

/// Telemetry setup errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),

    #[error("install prometheus recorder: {0}")]
    Metrics(String),
}

/// Active telemetry handles that need graceful shutdown.
pub struct TelemetryGuard {
    #[cfg(feature = "sentry")]
    sentry_guard: Option<sentry::ClientInitGuard>,
}

impl TelemetryGuard {
    /// Whether a Sentry client is active.
    #[must_use]
    pub fn sentry_enabled(&self) -> bool {
        #[cfg(feature = "sentry")]
        {
            self.sentry_guard.is_some()
        }
        #[cfg(not(feature = "sentry"))]
        {
            false
        }
    }

    /// Flush pending events and shut telemetry down.
    pub fn shutdown(self) {
        #[cfg(feature = "sentry")]
        if let Some(guard) = self.sentry_guard {
            guard.flush(Some(std::time::Duration::from_secs(2)));
        }
    }
}

/// Install the Prometheus recorder and serve `/metrics` on `listen`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
/// Returns an error if a recorder is already installed or the listener
/// cannot be bound.
#[cfg(feature = "prometheus")]
pub fn init_metrics(listen: std::net::SocketAddr) -> Result<(), TelemetryError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    tracing::info!(%listen, "Prometheus metrics listener started");
    Ok(())
}

/// Initialize Sentry error tracking.
///
/// Returns `None` if Sentry DSN is not configured.
#[cfg(feature = "sentry")]
fn init_sentry(config: &TelemetryConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: config.version.clone().map(Into::into),
            environment: config.environment.clone().map(Into::into),
            attach_stacktrace: true,
            send_default_pii: false,
            ..Default::default()
        },
    ));

    if guard.is_enabled() {
        tracing::info!("Sentry initialized");
        Some(guard)
    } else {
        tracing::warn!("Sentry DSN provided but client not enabled");
        None
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "WARN" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn env_filter(level: Level) -> EnvFilter {
    NOISY_CRATES
        .iter()
        .filter_map(|d| d.parse().ok())
        .fold(
            EnvFilter::from_default_env().add_directive(level.into()),
            EnvFilter::add_directive,
        )
}

/// Setup complete logging stack.
///
/// - Console logging (JSON or human-readable)
/// - Sentry error tracking (if DSN configured)
///
/// Returns a guard that should be kept alive for the application lifetime.
/// Call `shutdown()` on the guard for graceful shutdown.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn setup_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = env_filter(parse_level(&config.log_level));

    // Sentry goes first so the subscriber layer finds an active client
    #[cfg(feature = "sentry")]
    let sentry_guard = init_sentry(config);

    let fmt_layer = if config.json_logs {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_timer(ChronoLocal::new("%H:%M:%S%.3f".to_string()))
            .compact()
            .boxed()
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    #[cfg(feature = "sentry")]
    let registry = registry.with(sentry_guard.as_ref().map(|_| sentry_tracing::layer()));

    registry.try_init()?;

    Ok(TelemetryGuard {
        #[cfg(feature = "sentry")]
        sentry_guard,
    })
}
