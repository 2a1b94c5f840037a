//! Server construction and lifecycle errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        address: String,
        reason: &'static str,
    },

    #[error("parse port {port:?} of address {address:?}")]
    InvalidPort { address: String, port: String },

    #[error("address {address:?} has no port below its own")]
    PortUnderflow { address: String },

    #[error("new net listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("new exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("build reflection service: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    #[error("serve: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("server is already serving")]
    AlreadyServing,

    #[error("server has been stopped")]
    Stopped,
}
