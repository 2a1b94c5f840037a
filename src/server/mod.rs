//! gRPC server construction and lifecycle.
//!
//! [`new_server`] resolves the listener, installs tracing, assembles the
//! interceptor chain, and registers health, reflection and the caller's
//! services. The returned [`ServerWithListener`] serves until
//! [`GrpcServer::close`] drains it.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use http::{Request, Response};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::body::Body;
use tonic::server::NamedService;
use tonic::service::{Routes, RoutesBuilder};
use tonic_health::server::HealthReporter;
use tower::{Service, ServiceBuilder};
use tracing::info;

use crate::error::ServerError;
use crate::interceptor::InterceptorChain;
use crate::middleware::{GrpcMethodLayer, RequestIdLayer, StatsLayer};

pub mod config;
pub mod listener;
pub mod otel;

pub use config::{RegisterFn, ServerConfig, ServerOptions, TracingConfig};
pub use listener::{derived_bind_address, resolve_listener};

/// Serve and drain operations shared by server handles.
pub trait Server: Send + Sync {
    /// Serve on `listener` until closed.
    fn serve(&self, listener: TcpListener) -> impl Future<Output = Result<(), ServerError>> + Send;

    /// Stop accepting calls and wait for in-flight ones to finish.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServeState {
    Idle,
    Serving,
    Draining,
    Stopped,
}

/// Marks the server stopped however `serve` exits, including when its
/// future is dropped.
struct StopOnDrop<'a>(&'a watch::Sender<ServeState>);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(ServeState::Stopped);
    }
}

/// Services to expose, handed to the registration callback.
pub struct ServiceRegistry {
    routes: RoutesBuilder,
    chain: Arc<InterceptorChain>,
    health: HealthReporter,
}

impl ServiceRegistry {
    /// The interceptor chain service handlers run their calls through.
    #[must_use]
    pub fn chain(&self) -> Arc<InterceptorChain> {
        Arc::clone(&self.chain)
    }

    #[must_use]
    pub fn health_reporter(&self) -> HealthReporter {
        self.health.clone()
    }

    pub fn add_service<S>(&mut self, service: S) -> &mut Self
    where
        S: Service<Request<Body>, Response = Response<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.routes.add_service(service);
        self
    }
}

/// A configured gRPC server.
pub struct GrpcServer {
    routes: Mutex<Option<Routes>>,
    options: ServerOptions,
    stats: StatsLayer,
    chain: Arc<InterceptorChain>,
    health: HealthReporter,
    state: watch::Sender<ServeState>,
}

impl GrpcServer {
    #[must_use]
    pub fn chain(&self) -> Arc<InterceptorChain> {
        Arc::clone(&self.chain)
    }

    #[must_use]
    pub fn health_reporter(&self) -> HealthReporter {
        self.health.clone()
    }

    /// Serve on `listener` until [`close`](Self::close) is called.
    ///
    /// # Errors
    /// Returns an error if the server already served, or if the transport
    /// fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut previous = ServeState::Idle;
        self.state.send_if_modified(|state| {
            previous = *state;
            if *state == ServeState::Idle {
                *state = ServeState::Serving;
                return true;
            }
            false
        });
        match previous {
            ServeState::Idle => {}
            ServeState::Serving | ServeState::Draining => return Err(ServerError::AlreadyServing),
            ServeState::Stopped => return Err(ServerError::Stopped),
        }
        let stopped = StopOnDrop(&self.state);

        let routes = self
            .routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ServerError::Stopped)?;

        info!(address = ?listener.local_addr().ok(), "gRPC server listening");

        let mut state = self.state.subscribe();
        let shutdown = async move {
            let _ = state.wait_for(|s| *s == ServeState::Draining).await;
        };

        let router = {
            let layers = ServiceBuilder::new()
                .layer(RequestIdLayer::new())
                .layer(GrpcMethodLayer::new())
                .layer(self.stats);
            let mut builder = self
                .options
                .apply(tonic::transport::Server::builder())
                .layer(layers);
            builder.add_routes(routes)
        };

        let result = router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await;

        drop(stopped);
        info!("gRPC server stopped");
        result.map_err(ServerError::from)
    }

    /// Stop accepting new calls and wait until in-flight calls finish.
    ///
    /// Returns immediately if the server never served; later calls to
    /// `serve` then fail.
    pub async fn close(&self) {
        let mut previous = ServeState::Idle;
        self.state.send_if_modified(|state| {
            previous = *state;
            match *state {
                ServeState::Idle => *state = ServeState::Stopped,
                ServeState::Serving => *state = ServeState::Draining,
                ServeState::Draining | ServeState::Stopped => return false,
            }
            true
        });

        if matches!(previous, ServeState::Serving | ServeState::Draining) {
            info!("gRPC server draining in-flight calls");
            let mut state = self.state.subscribe();
            let _ = state.wait_for(|s| *s == ServeState::Stopped).await;
        }
    }
}

impl Server for GrpcServer {
    fn serve(&self, listener: TcpListener) -> impl Future<Output = Result<(), ServerError>> + Send {
        GrpcServer::serve(self, listener)
    }

    fn close(&self) -> impl Future<Output = ()> + Send {
        GrpcServer::close(self)
    }
}

/// A server paired with the listener it will serve on.
pub struct ServerWithListener {
    server: Arc<GrpcServer>,
    listener: TcpListener,
}

impl ServerWithListener {
    /// Address the listener is bound to.
    ///
    /// # Errors
    /// Returns the socket error, if any.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for closing the server while it serves.
    #[must_use]
    pub fn handle(&self) -> Arc<GrpcServer> {
        Arc::clone(&self.server)
    }

    /// Serve on the resolved listener until closed.
    ///
    /// # Errors
    /// See [`GrpcServer::serve`].
    pub async fn serve(self) -> Result<(), ServerError> {
        self.server.serve(self.listener).await
    }

    pub async fn close(&self) {
        self.server.close().await;
    }
}

/// Build a server from `config`.
///
/// Uses `listener` when supplied; otherwise binds the port below the one in
/// the configured address.
///
/// # Errors
/// Returns an error if the listener cannot be resolved, the span exporter
/// cannot be built, or the reflection service rejects a descriptor set.
pub async fn new_server(
    config: ServerConfig,
    listener: Option<TcpListener>,
) -> Result<ServerWithListener, ServerError> {
    let listener = resolve_listener(listener, &config.address).await?;
    let stats = otel::set_tracing(&config.tracing)?;

    let chain = Arc::new(InterceptorChain::build(
        config.debug_logger,
        config.panic_handler,
        config.error_handler,
        config.interceptors,
    ));
    info!(layers = ?chain.kinds(), "Interceptor chain assembled");

    let (health, health_service) = tonic_health::server::health_reporter();
    let mut registry = ServiceRegistry {
        routes: RoutesBuilder::default(),
        chain: Arc::clone(&chain),
        health: health.clone(),
    };
    let reflection = config
        .descriptor_sets
        .iter()
        .copied()
        .fold(
            tonic_reflection::server::Builder::configure()
                .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET),
            tonic_reflection::server::Builder::register_encoded_file_descriptor_set,
        )
        .build_v1()?;
    registry.add_service(health_service);
    registry.add_service(reflection);

    if let Some(register) = config.register {
        register(&mut registry);
    }

    let (state, _) = watch::channel(ServeState::Idle);
    let server = GrpcServer {
        routes: Mutex::new(Some(registry.routes.routes())),
        options: config.options,
        stats,
        chain,
        health,
        state,
    };

    Ok(ServerWithListener {
        server: Arc::new(server),
        listener,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn local_server(config: ServerConfig) -> ServerWithListener {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        new_server(config, Some(listener)).await.unwrap()
    }

    #[tokio::test]
    async fn supplied_listener_skips_address_parsing() {
        let server = local_server(ServerConfig::new("not an address")).await;
        assert!(server.local_addr().is_ok());
    }

    #[tokio::test]
    async fn bad_address_fails_construction() {
        let err = new_server(ServerConfig::new("nowhere"), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn registration_sees_assembled_chain() {
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let config = ServerConfig::new("127.0.0.1:1")
            .with_interceptor(Arc::new(crate::interceptor::DebugInterceptor::new(Arc::new(
                crate::interceptor::TracingDebugLogger,
            ))))
            .with_registration(move |registry| {
                *slot.lock().unwrap() = Some(registry.chain().kinds());
            });

        let server = local_server(config).await;
        assert_eq!(
            seen.lock().unwrap().take().unwrap(),
            [crate::interceptor::LayerKind::Custom]
        );
        assert_eq!(server.handle().chain().len(), 1);
    }

    #[tokio::test]
    async fn close_before_serve_returns_and_blocks_serving() {
        let server = local_server(ServerConfig::new("127.0.0.1:1")).await;
        let handle = server.handle();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle.close())
            .await
            .unwrap();
        assert!(matches!(server.serve().await, Err(ServerError::Stopped)));
    }

    #[tokio::test]
    async fn close_returns_after_serving_task_is_aborted() {
        let server = local_server(ServerConfig::new("127.0.0.1:1")).await;
        let handle = server.handle();
        let serving = tokio::spawn(server.serve());

        let mut state = handle.state.subscribe();
        state
            .wait_for(|s| *s == ServeState::Serving)
            .await
            .unwrap();
        serving.abort();
        assert!(serving.await.unwrap_err().is_cancelled());

        tokio::time::timeout(std::time::Duration::from_secs(2), handle.close())
            .await
            .unwrap();
        let extra = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(
            handle.serve(extra).await,
            Err(ServerError::Stopped)
        ));
    }

    #[tokio::test]
    async fn traced_server_serves_calls() {
        use tonic_health::pb::HealthCheckRequest;
        use tonic_health::pb::health_check_response::ServingStatus;
        use tonic_health::pb::health_client::HealthClient;

        let config = ServerConfig::new("127.0.0.1:1").with_tracing(TracingConfig {
            enabled: true,
            otlp_endpoint: Some("http://127.0.0.1:1".to_string()),
            service_name: "grpc-guard-test".to_string(),
        });
        let server = local_server(config).await;
        let handle = server.handle();
        assert!(handle.stats.is_enabled());

        let addr = server.local_addr().unwrap();
        let serving = tokio::spawn(server.serve());
        let channel = tonic::transport::Endpoint::from_shared(format!("http://{addr}"))
            .unwrap()
            .connect()
            .await
            .unwrap();

        let response = HealthClient::new(channel)
            .check(HealthCheckRequest {
                service: String::new(),
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.status(), ServingStatus::Serving);

        handle.close().await;
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn serve_twice_is_rejected() {
        let server = local_server(ServerConfig::new("127.0.0.1:1")).await;
        let handle = server.handle();
        let serving = tokio::spawn(server.serve());

        // Wait until the first serve has claimed the routes.
        let mut state = handle.state.subscribe();
        state
            .wait_for(|s| *s == ServeState::Serving)
            .await
            .unwrap();

        let extra = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(matches!(
            handle.serve(extra).await,
            Err(ServerError::AlreadyServing)
        ));

        handle.close().await;
        serving.await.unwrap().unwrap();
    }
}
