//! grpc-guard: gRPC server with health and reflection behind the guard chain.

use std::sync::Arc;

use grpc_guard::config::Config;
use grpc_guard::server::otel::shutdown_tracing;
use grpc_guard::{TracingDebugLogger, new_server};
use guard_telemetry::setup_telemetry;
use tokio::signal;
use tracing::info;

/// Build version (injected at compile time or default)
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init()?;
    let telemetry = setup_telemetry(&config.telemetry_config())?;

    info!(
        version = VERSION,
        address = %config.grpc_address,
        tracing = config.tracing,
        sentry = telemetry.sentry_enabled(),
        "Starting grpc-guard"
    );

    #[cfg(feature = "prometheus")]
    if let Some(addr) = config.metrics_address {
        guard_telemetry::init_metrics(addr)?;
    }

    let mut server_config = config.server_config();
    if config.debug_requests {
        server_config = server_config.with_debug_logger(Arc::new(TracingDebugLogger));
    }
    #[cfg(feature = "sentry")]
    {
        let reporter = Arc::new(grpc_guard::sentry::SentryReporter::new());
        server_config = server_config
            .with_error_handler(reporter.clone())
            .with_panic_handler(reporter);
    }

    let server = new_server(server_config, None).await?;
    info!(listen = ?server.local_addr()?, "gRPC listener bound");

    let handle = server.handle();
    let mut serving = tokio::spawn(server.serve());

    tokio::select! {
        result = &mut serving => result??,
        () = shutdown_signal() => {
            handle.close().await;
            serving.await??;
        }
    }

    shutdown_tracing();
    telemetry.shutdown();
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
