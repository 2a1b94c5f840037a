//! Per-call tracing and metrics.
//!
//! When tracing is enabled every call opens an OpenTelemetry server span and
//! records request metrics. Disabled, the layer only forwards the call.
//!
//! # Metrics Emitted
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `grpc_server_handled_total` | Counter | `grpc_service`, `grpc_method`, `grpc_code` |
//! | `grpc_server_handling_seconds` | Histogram | `grpc_service`, `grpc_method`, `grpc_code` |
//!
//! `grpc_code` comes from the `grpc-status` response header. Successful unary
//! calls carry their status in HTTP/2 trailers, which are not visible here, so
//! a `200` response without the header counts as `OK`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use http::{Request, Response, StatusCode};
use opentelemetry::trace::{Span as _, SpanKind, Status as SpanStatus, Tracer as _};
use opentelemetry::{KeyValue, global};
use tonic::Code;
use tower::{Layer, Service};

use crate::server::otel::TRACER_NAME;

/// Tower layer for call tracing and metrics.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatsLayer {
    enabled: bool,
}

impl StatsLayer {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(false)
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl<S> Layer<S> for StatsLayer {
    type Service = StatsMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        StatsMiddleware {
            inner,
            enabled: self.enabled,
        }
    }
}

#[derive(Clone)]
pub struct StatsMiddleware<S> {
    inner: S,
    enabled: bool,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for StatsMiddleware<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if !self.enabled {
            return Box::pin(inner.call(req));
        }

        let path = req.uri().path().to_string();
        let (service, method) = split_path(&path);
        let (service, method) = (service.to_string(), method.to_string());

        let tracer = global::tracer(TRACER_NAME);
        let mut span = tracer
            .span_builder(path)
            .with_kind(SpanKind::Server)
            .with_attributes([
                KeyValue::new("rpc.system", "grpc"),
                KeyValue::new("rpc.service", service.clone()),
                KeyValue::new("rpc.method", method.clone()),
            ])
            .start(&tracer);
        let start = Instant::now();

        Box::pin(async move {
            let result = inner.call(req).await;
            let code = match &result {
                Ok(response) => response_code(response),
                Err(_) => Code::Unknown,
            };

            span.set_attribute(KeyValue::new("rpc.grpc.status_code", i64::from(i32::from(code))));
            if code != Code::Ok {
                span.set_status(SpanStatus::error(code.description()));
            }
            span.end();

            let labels = [
                ("grpc_service", service),
                ("grpc_method", method),
                ("grpc_code", format!("{code:?}")),
            ];
            metrics::counter!("grpc_server_handled_total", &labels).increment(1);
            metrics::histogram!("grpc_server_handling_seconds", &labels)
                .record(start.elapsed().as_secs_f64());

            result
        })
    }
}

/// Split `/pkg.Service/Method` into service and method.
fn split_path(path: &str) -> (&str, &str) {
    path.trim_start_matches('/')
        .rsplit_once('/')
        .unwrap_or(("unknown", path))
}

/// gRPC status of a response as far as the headers tell.
fn response_code<B>(response: &Response<B>) -> Code {
    match response.headers().get("grpc-status") {
        Some(value) => Code::from_bytes(value.as_bytes()),
        None if response.status() == StatusCode::OK => Code::Ok,
        None => Code::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use tower::{ServiceExt, service_fn};

    use super::*;

    #[test]
    fn path_splits_into_service_and_method() {
        assert_eq!(
            split_path("/users.v1.UserService/GetUser"),
            ("users.v1.UserService", "GetUser")
        );
        assert_eq!(split_path("/health"), ("unknown", "/health"));
    }

    #[test]
    fn code_prefers_grpc_status_header() {
        let response = Response::builder()
            .header("grpc-status", "5")
            .body(())
            .unwrap();
        assert_eq!(response_code(&response), Code::NotFound);

        assert_eq!(response_code(&Response::new(())), Code::Ok);

        let response = Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(())
            .unwrap();
        assert_eq!(response_code(&response), Code::Unknown);
    }

    #[tokio::test]
    async fn layer_forwards_whether_enabled_or_not() {
        for enabled in [false, true] {
            let svc = StatsLayer::new(enabled).layer(service_fn(|_req: Request<()>| async {
                Ok::<_, Infallible>(Response::new("ok"))
            }));
            let req = Request::builder()
                .uri("http://localhost/pkg.Svc/Echo")
                .body(())
                .unwrap();
            assert_eq!(*svc.oneshot(req).await.unwrap().body(), "ok");
        }
    }
}
