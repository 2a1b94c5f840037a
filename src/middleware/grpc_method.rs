//! Records the gRPC method path of each call in the request extensions.

use std::task::{Context, Poll};

use guard_core::FullMethod;
use http::Request;
use tower::{Layer, Service};

#[derive(Clone, Copy, Default)]
pub struct GrpcMethodLayer;

impl GrpcMethodLayer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for GrpcMethodLayer {
    type Service = GrpcMethodMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GrpcMethodMiddleware { inner }
    }
}

#[derive(Clone)]
pub struct GrpcMethodMiddleware<S> {
    inner: S,
}

impl<S, ReqBody> Service<Request<ReqBody>> for GrpcMethodMiddleware<S>
where
    S: Service<Request<ReqBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let method = FullMethod::new(req.uri().path());
        req.extensions_mut().insert(method);
        self.inner.call(req)
    }
}
