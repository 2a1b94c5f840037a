//! Server configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::ServiceRegistry;
use crate::interceptor::{DebugLogger, ErrorHandler, PanicHandler, UnaryInterceptor};

/// Registers application services once the built-in ones are in place.
pub type RegisterFn = Box<dyn FnOnce(&mut ServiceRegistry) + Send>;

/// Span export settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub enabled: bool,
    /// OTLP collector; the exporter default applies when unset.
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: None,
            service_name: "grpc-guard".to_string(),
        }
    }
}

/// Transport options passed through to the tonic server builder.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub timeout: Option<Duration>,
    pub concurrency_limit_per_connection: Option<usize>,
    pub http2_keepalive_interval: Option<Duration>,
    pub http2_keepalive_timeout: Option<Duration>,
    pub max_concurrent_streams: Option<u32>,
}

impl ServerOptions {
    pub(crate) fn apply(&self, mut builder: tonic::transport::Server) -> tonic::transport::Server {
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(limit) = self.concurrency_limit_per_connection {
            builder = builder.concurrency_limit_per_connection(limit);
        }
        builder
            .http2_keepalive_interval(self.http2_keepalive_interval)
            .http2_keepalive_timeout(self.http2_keepalive_timeout)
            .max_concurrent_streams(self.max_concurrent_streams)
    }
}

/// Everything needed to build a server.
///
/// ```ignore
/// let config = ServerConfig::new("0.0.0.0:9090")
///     .with_error_handler(reporter.clone())
///     .with_panic_handler(reporter)
///     .with_registration(|registry| {
///         let svc = UserServiceServer::new(UserService::new(registry.chain()));
///         registry.add_service(svc);
///     });
/// ```
pub struct ServerConfig {
    pub(crate) address: String,
    pub(crate) tracing: TracingConfig,
    pub(crate) options: ServerOptions,
    pub(crate) interceptors: Vec<Arc<dyn UnaryInterceptor>>,
    pub(crate) register: Option<RegisterFn>,
    pub(crate) debug_logger: Option<Arc<dyn DebugLogger>>,
    pub(crate) panic_handler: Option<Arc<dyn PanicHandler>>,
    pub(crate) error_handler: Option<Arc<dyn ErrorHandler>>,
    pub(crate) descriptor_sets: Vec<&'static [u8]>,
}

impl ServerConfig {
    /// Configuration for a server whose public address is `address`.
    ///
    /// Without a supplied listener the server binds the port just below the
    /// one in `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tracing: TracingConfig::default(),
            options: ServerOptions::default(),
            interceptors: Vec::new(),
            register: None,
            debug_logger: None,
            panic_handler: None,
            error_handler: None,
            descriptor_sets: Vec::new(),
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Append a caller interceptor; they run innermost, in insertion order.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn UnaryInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    #[must_use]
    pub fn with_registration<F>(mut self, register: F) -> Self
    where
        F: FnOnce(&mut ServiceRegistry) + Send + 'static,
    {
        self.register = Some(Box::new(register));
        self
    }

    #[must_use]
    pub fn with_debug_logger(mut self, logger: Arc<dyn DebugLogger>) -> Self {
        self.debug_logger = Some(logger);
        self
    }

    #[must_use]
    pub fn with_panic_handler(mut self, handler: Arc<dyn PanicHandler>) -> Self {
        self.panic_handler = Some(handler);
        self
    }

    #[must_use]
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Expose an encoded `FileDescriptorSet` through server reflection.
    #[must_use]
    pub fn with_file_descriptor_set(mut self, set: &'static [u8]) -> Self {
        self.descriptor_sets.push(set);
        self
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("address", &self.address)
            .field("tracing", &self.tracing)
            .field("options", &self.options)
            .field("interceptors", &self.interceptors.len())
            .field("register", &self.register.is_some())
            .field("debug_logger", &self.debug_logger.is_some())
            .field("panic_handler", &self.panic_handler.is_some())
            .field("error_handler", &self.error_handler.is_some())
            .field("descriptor_sets", &self.descriptor_sets.len())
            .finish()
    }
}
