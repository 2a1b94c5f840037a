use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tonic::Status;

use super::{
    BoxError, ChainLink, DebugInterceptor, DebugLogger, ErrorClassifier, ErrorHandler, Message,
    Next, PanicHandler, RecoveryInterceptor, Reply, UnaryCall, UnaryInterceptor, into_status,
};

/// Role of an interceptor inside the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Debug,
    PanicRecovery,
    ErrorClassifier,
    Custom,
}

/// Ordered unary interceptors, outermost first.
pub struct InterceptorChain {
    links: Vec<ChainLink>,
}

impl InterceptorChain {
    /// Assemble the chain from the configured capabilities.
    ///
    /// Each built-in layer is present only when its capability is supplied.
    /// Caller interceptors run innermost, in the order given.
    #[must_use]
    pub fn build(
        debug_logger: Option<Arc<dyn DebugLogger>>,
        panic_handler: Option<Arc<dyn PanicHandler>>,
        error_handler: Option<Arc<dyn ErrorHandler>>,
        interceptors: Vec<Arc<dyn UnaryInterceptor>>,
    ) -> Self {
        let mut links = Vec::with_capacity(interceptors.len() + 3);

        if let Some(logger) = debug_logger {
            links.push(ChainLink {
                kind: LayerKind::Debug,
                interceptor: Arc::new(DebugInterceptor::new(logger)),
            });
        }
        if let Some(handler) = panic_handler {
            links.push(ChainLink {
                kind: LayerKind::PanicRecovery,
                interceptor: Arc::new(RecoveryInterceptor::new(handler)),
            });
        }
        if let Some(handler) = error_handler {
            links.push(ChainLink {
                kind: LayerKind::ErrorClassifier,
                interceptor: Arc::new(ErrorClassifier::new(handler)),
            });
        }
        links.extend(interceptors.into_iter().map(|interceptor| ChainLink {
            kind: LayerKind::Custom,
            interceptor,
        }));

        Self { links }
    }

    /// Layer roles, outermost first.
    #[must_use]
    pub fn kinds(&self) -> Vec<LayerKind> {
        self.links.iter().map(|link| link.kind).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Run an erased call through every layer and into `endpoint`.
    ///
    /// # Errors
    /// Returns the error left after every layer had its say.
    pub async fn call<'a, F, Fut>(&'a self, call: UnaryCall, endpoint: F) -> Result<Reply, BoxError>
    where
        F: FnOnce(UnaryCall) -> Fut + Send + 'a,
        Fut: Future<Output = Result<Reply, BoxError>> + Send + 'a,
    {
        Next::new(&self.links, Box::new(move |call| endpoint(call).boxed()))
            .run(call)
            .await
    }

    /// Run a typed unary handler through the chain.
    ///
    /// An empty reply (a cancelled call) answers with `Resp::default()`.
    ///
    /// # Errors
    /// Returns the status produced by the handler or by a layer.
    pub async fn unary<'a, Req, Resp, F, Fut, E>(
        &'a self,
        request: tonic::Request<Req>,
        handler: F,
    ) -> Result<tonic::Response<Resp>, Status>
    where
        Req: Message + Clone,
        Resp: Default + Send + 'static,
        F: FnOnce(tonic::Request<Req>) -> Fut + Send + 'a,
        Fut: Future<Output = Result<tonic::Response<Resp>, E>> + Send + 'a,
        E: Into<BoxError> + 'a,
    {
        let result = self
            .call(UnaryCall::from_request(request), move |call| async move {
                let request = call.into_request::<Req>()?;
                let response = handler(request).await.map_err(Into::<BoxError>::into)?;
                Ok::<_, BoxError>(Reply::new(response))
            })
            .await;

        match result {
            Ok(reply) => reply.into_response(),
            Err(error) => Err(into_status(error)),
        }
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("layers", &self.kinds())
            .finish()
    }
}
