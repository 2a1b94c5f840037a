//! Unary call interceptors.
//!
//! A call enters the [`InterceptorChain`] as a [`UnaryCall`] and travels
//! through every interceptor before reaching the service handler:
//!
//! ```text
//! Debug → Panic Recovery → Error Classifier → caller interceptors → handler
//! ```
//!
//! The request payload and the reply are type-erased while inside the chain,
//! so interceptors written once work for every service method. The typed
//! entry point is [`InterceptorChain::unary`], called from the generated
//! tonic trait methods:
//!
//! ```ignore
//! async fn get_user(&self, request: Request<GetUserRequest>) -> Result<Response<User>, Status> {
//!     self.chain.unary(request, |req| self.load_user(req)).await
//! }
//! ```

use std::any::{Any, type_name};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use guard_core::{FullMethod, RequestId};
use thiserror::Error;
use tonic::metadata::MetadataMap;
use tonic::{Extensions, Status};

mod chain;
pub mod classify;
pub mod debug;
pub mod recovery;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{InterceptorChain, LayerKind};
pub use classify::{ErrorClassifier, ErrorHandler, MethodError};
pub use debug::{CallFields, Completion, DebugInterceptor, DebugLogger, TracingDebugLogger};
pub use recovery::{PanicHandler, PanicValue, RecoveryInterceptor};

/// Boxed error flowing through the chain.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Borrowed form of [`BoxError`] handed to capabilities.
pub type DynError = dyn StdError + Send + Sync + 'static;

/// Message of every masked status.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error.";

/// Method name used when the transport did not record the call path.
const UNKNOWN_METHOD: &str = "unknown";

/// The status returned in place of anything that must not leak.
#[must_use]
pub fn internal_status() -> Status {
    Status::internal(INTERNAL_ERROR_MESSAGE)
}

/// Convert a chain error into the status written to the wire.
///
/// A `Status` anywhere in the chain is used as is; anything else becomes
/// `Unknown` with the error text, which is what tonic does for raw errors.
#[must_use]
pub fn into_status(error: BoxError) -> Status {
    match error.downcast::<Status>() {
        Ok(status) => *status,
        Err(error) => Status::from_error(error),
    }
}

/// Request payload as seen by interceptors.
pub trait Message: Any + fmt::Debug + Send + Sync {
    /// Upcast for downcasting back to the concrete message type.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + fmt::Debug + Send + Sync> Message for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Identity and metadata of the call being processed.
#[derive(Debug)]
pub struct CallInfo {
    method: FullMethod,
    request_id: Option<RequestId>,
    metadata: MetadataMap,
    extensions: Extensions,
}

impl CallInfo {
    /// Full method path, e.g. `/users.v1.UserService/GetUser`.
    #[must_use]
    pub fn full_method(&self) -> &str {
        self.method.as_str()
    }

    /// Method name without the service prefix.
    #[must_use]
    pub fn method(&self) -> &str {
        self.method.short()
    }

    #[must_use]
    pub const fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    #[must_use]
    pub const fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

/// A unary call on its way to the handler.
#[derive(Debug)]
pub struct UnaryCall {
    pub info: CallInfo,
    pub request: Arc<dyn Message>,
}

impl UnaryCall {
    /// Split a tonic request into call info and an erased payload.
    pub fn from_request<T: Message>(request: tonic::Request<T>) -> Self {
        let (metadata, extensions, message) = request.into_parts();
        let method = extensions
            .get::<FullMethod>()
            .cloned()
            .unwrap_or_else(|| FullMethod::new(UNKNOWN_METHOD));
        let request_id = extensions
            .get::<RequestId>()
            .cloned()
            .or_else(|| RequestId::from_metadata(&metadata));

        Self {
            info: CallInfo {
                method,
                request_id,
                metadata,
                extensions,
            },
            request: Arc::new(message),
        }
    }

    /// Rebuild the typed tonic request for the handler.
    ///
    /// The payload is cloned only if an interceptor still holds a reference
    /// to it.
    ///
    /// # Errors
    /// Returns [`PayloadMismatch`] if an interceptor replaced the payload
    /// with a different type.
    pub fn into_request<T>(self) -> Result<tonic::Request<T>, PayloadMismatch>
    where
        T: Clone + Send + Sync + 'static,
    {
        let message = Message::into_any(self.request)
            .downcast::<T>()
            .map_err(|_| PayloadMismatch {
                expected: type_name::<T>(),
            })?;
        let CallInfo {
            metadata,
            extensions,
            ..
        } = self.info;

        Ok(tonic::Request::from_parts(
            metadata,
            extensions,
            Arc::unwrap_or_clone(message),
        ))
    }
}

/// The payload reaching the handler is not the type it expects.
#[derive(Debug, Error)]
#[error("request payload is not a {expected}")]
pub struct PayloadMismatch {
    expected: &'static str,
}

/// Type-erased handler result.
///
/// An empty reply means "no response body": the typed entry point answers
/// with the response type's default value.
pub struct Reply(Option<Box<dyn Any + Send>>);

impl Reply {
    pub fn new<T: Any + Send>(response: T) -> Self {
        Self(Some(Box::new(response)))
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self(None)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Recover the typed tonic response.
    pub(crate) fn into_response<T>(self) -> Result<tonic::Response<T>, Status>
    where
        T: Default + Send + 'static,
    {
        let Some(reply) = self.0 else {
            return Ok(tonic::Response::new(T::default()));
        };
        reply
            .downcast::<tonic::Response<T>>()
            .map(|response| *response)
            .map_err(|_| {
                tracing::error!(
                    expected = type_name::<T>(),
                    "reply type does not match the handler response"
                );
                internal_status()
            })
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reply")
            .field(&if self.is_empty() { "empty" } else { "response" })
            .finish()
    }
}

/// One interceptor with the role it plays in the chain.
pub(crate) struct ChainLink {
    pub(crate) kind: LayerKind,
    pub(crate) interceptor: Arc<dyn UnaryInterceptor>,
}

type Endpoint<'a> = Box<dyn FnOnce(UnaryCall) -> BoxFuture<'a, Result<Reply, BoxError>> + Send + 'a>;

/// The remainder of the chain after the current interceptor.
pub struct Next<'a> {
    links: &'a [ChainLink],
    endpoint: Endpoint<'a>,
}

impl<'a> Next<'a> {
    pub(crate) fn new(links: &'a [ChainLink], endpoint: Endpoint<'a>) -> Self {
        Self { links, endpoint }
    }

    /// Run the next interceptor, or the handler once the chain is exhausted.
    ///
    /// # Errors
    /// Returns whatever error the downstream layers produce.
    pub async fn run(self, call: UnaryCall) -> Result<Reply, BoxError> {
        let Self { links, endpoint } = self;
        match links.split_first() {
            Some((link, rest)) => {
                link.interceptor
                    .intercept(call, Next::new(rest, endpoint))
                    .await
            }
            None => endpoint(call).await,
        }
    }
}

/// A layer wrapping unary call execution.
///
/// Implementations call `next.run(call)` exactly once to continue the chain,
/// or return early to short-circuit it.
#[tonic::async_trait]
pub trait UnaryInterceptor: Send + Sync + 'static {
    async fn intercept(&self, call: UnaryCall, next: Next<'_>) -> Result<Reply, BoxError>;
}

/// gRPC code carried by a chain error, `Unknown` for non-status errors.
pub(crate) fn code_of(error: &DynError) -> tonic::Code {
    guard_core::find_in_chain::<Status>(error).map_or(tonic::Code::Unknown, Status::code)
}
