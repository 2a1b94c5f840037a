//! Transport middleware applied to every call.
//!
//! # Middleware Order
//! Layers are listed outermost first. Request flows outermost → innermost →
//! routes, and the response flows back out:
//! 1. `RequestIdLayer` - Copy `x-request-id` into the request extensions
//! 2. `GrpcMethodLayer` - Record the full method path
//! 3. `StatsLayer` - Server span and call metrics (when tracing is enabled)
//!
//! The interceptor chain runs inside the service handler and reads the
//! extensions these layers insert.

pub mod grpc_method;
pub mod request_id;
pub mod stats;

pub use grpc_method::GrpcMethodLayer;
pub use request_id::RequestIdLayer;
pub use stats::StatsLayer;
