//! Process-wide OpenTelemetry span export.

use std::sync::OnceLock;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{Sampler, SdkTracerProvider},
};
use tracing::{info, warn};

use super::config::TracingConfig;
use crate::error::ServerError;
use crate::middleware::StatsLayer;

/// Instrumentation scope of server spans.
pub const TRACER_NAME: &str = "grpc-guard";

const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

static PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Install the span exporter when tracing is enabled and return the stats
/// layer for the server.
///
/// The exporter is registered once per process; later servers reuse it.
///
/// # Errors
/// Returns [`ServerError::Exporter`] if the exporter cannot be built.
pub fn set_tracing(config: &TracingConfig) -> Result<StatsLayer, ServerError> {
    if !config.enabled {
        return Ok(StatsLayer::disabled());
    }
    if PROVIDER.get().is_none() {
        let provider = build_provider(config)?;
        if PROVIDER.set(provider.clone()).is_ok() {
            opentelemetry::global::set_tracer_provider(provider);
            info!(endpoint = ?config.otlp_endpoint, "OpenTelemetry tracing initialized");
        }
    }
    Ok(StatsLayer::new(true))
}

fn build_provider(config: &TracingConfig) -> Result<SdkTracerProvider, ServerError> {
    let mut exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_timeout(EXPORT_TIMEOUT);
    if let Some(endpoint) = &config.otlp_endpoint {
        exporter = exporter.with_endpoint(endpoint.as_str());
    }

    let resource = Resource::builder()
        .with_attributes([KeyValue::new("service.name", config.service_name.clone())])
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter.build()?)
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(resource)
        .build())
}

/// Flush and stop span export, if it was started.
pub fn shutdown_tracing() {
    if let Some(provider) = PROVIDER.get()
        && let Err(e) = provider.shutdown()
    {
        warn!(error = %e, "Failed to shutdown OpenTelemetry provider");
    }
}
