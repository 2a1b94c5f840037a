//! Per-call identifiers and extension traits for `tonic::Request`.
//!
//! The transport middleware stores a [`RequestId`] and the [`FullMethod`] in
//! request extensions; service code and interceptors read them back here.
//!
//! ```ignore
//! use guard_core::CallRequestExt;
//!
//! async fn some_rpc(&self, request: Request<Req>) -> Result<Response<Resp>, Status> {
//!     let id = request.request_id_or_nil();
//!     let method = request.short_method();
//!     // ...
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use tonic::Request;
use tonic::metadata::MetadataMap;

/// Header (and metadata key) carrying the request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request ID reported when a call carries none.
pub const NIL_REQUEST_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Maximum accepted length for request IDs.
pub const MAX_REQUEST_ID_LENGTH: usize = 64;

/// Request ID propagated by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub Arc<str>);

impl RequestId {
    /// Accept `value` as a request ID if it is non-empty and short enough.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        (!value.is_empty() && value.len() <= MAX_REQUEST_ID_LENGTH).then(|| Self(value.into()))
    }

    /// Read the request ID from gRPC metadata.
    #[must_use]
    pub fn from_metadata(metadata: &MetadataMap) -> Option<Self> {
        metadata
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }

    /// Get as string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full gRPC method path, e.g. `/users.v1.UserService/GetUser`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullMethod(pub Arc<str>);

impl FullMethod {
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self(path.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Method name without the service prefix (`GetUser`).
    #[must_use]
    pub fn short(&self) -> &str {
        short_method(&self.0)
    }
}

/// Last path segment of a full method name.
///
/// Trailing slashes are ignored; an empty path yields `"."` and a path made
/// only of slashes yields `"/"`.
#[must_use]
pub fn short_method(full_method: &str) -> &str {
    if full_method.is_empty() {
        return ".";
    }
    let trimmed = full_method.trim_end_matches('/');
    match trimmed.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => "/",
    }
}

/// Extension trait for reading call identifiers from gRPC requests.
pub trait CallRequestExt {
    /// Request ID from extensions, falling back to the `x-request-id` metadata.
    fn request_id(&self) -> Option<RequestId>;

    /// Request ID, or [`NIL_REQUEST_ID`] when the call carries none.
    fn request_id_or_nil(&self) -> RequestId {
        self.request_id()
            .unwrap_or_else(|| RequestId(NIL_REQUEST_ID.into()))
    }

    /// Full method path recorded by the transport middleware.
    fn full_method(&self) -> Option<FullMethod>;

    /// Short method name, or `"unknown"` if the path was not recorded.
    fn short_method(&self) -> String {
        self.full_method()
            .map_or_else(|| "unknown".to_string(), |m| m.short().to_string())
    }
}

impl<T> CallRequestExt for Request<T> {
    fn request_id(&self) -> Option<RequestId> {
        self.extensions()
            .get::<RequestId>()
            .cloned()
            .or_else(|| RequestId::from_metadata(self.metadata()))
    }

    fn full_method(&self) -> Option<FullMethod> {
        self.extensions().get::<FullMethod>().cloned()
    }
}
