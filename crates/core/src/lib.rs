//! Core library with shared call types and error handling.
//!
//! This crate provides reusable components for gRPC services:
//! - Application error type with Status conversion
//! - Cancellation marker and error-chain helpers
//! - Request ID / method extraction from `tonic::Request`

pub mod error;
pub mod request_ext;

pub use error::{AppError, Canceled, application_error, find_in_chain, is_cancellation};
pub use request_ext::{
    CallRequestExt, FullMethod, NIL_REQUEST_ID, REQUEST_ID_HEADER, RequestId, short_method,
};
