//! Resilience and observability pipeline for tonic gRPC servers.
//!
//! - [`interceptor`]: the unary interceptor chain with debug logging, panic
//!   recovery and error classification
//! - [`middleware`]: transport layers feeding call metadata to the chain
//! - [`server`]: listener resolution, tracing setup and the serve/close
//!   lifecycle
//! - [`report`]: detached error and panic reporting

pub mod config;
pub mod error;
pub mod interceptor;
pub mod middleware;
pub mod report;
pub mod server;

#[cfg(feature = "sentry")]
pub mod sentry;

pub use error::ServerError;
pub use interceptor::{
    BoxError, CallInfo, DebugLogger, DynError, ErrorHandler, INTERNAL_ERROR_MESSAGE,
    InterceptorChain, LayerKind, Next, PanicHandler, PanicValue, Reply, TracingDebugLogger,
    UnaryCall, UnaryInterceptor,
};
pub use report::{REPORT_TIMEOUT, ReportContext};
pub use server::{
    GrpcServer, Server, ServerConfig, ServerOptions, ServerWithListener, ServiceRegistry,
    TracingConfig, new_server,
};
