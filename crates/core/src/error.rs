//! Application error taxonomy shared by services and the error classifier.
//!
//! `AppError` is the error type embedding services return for business-level
//! failures. Every variant except [`AppError::Internal`] is an *application*
//! error: its message is safe to send to the caller. Internal details are
//! logged but never exposed to clients.

use std::error::Error as StdError;
use std::fmt::Display;

use thiserror::Error;
use tonic::{Code, Status};
use tracing::error;

/// Application error type with automatic Status conversion.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Internal: {0}")]
    Internal(String),
}

impl AppError {
    /// Create a not found error for an entity.
    pub fn not_found(entity: &str, id: impl Display) -> Self {
        Self::NotFound(format!("{entity} not found: {id}"))
    }

    /// Create a conflict error for duplicate data.
    #[must_use]
    pub fn conflict(entity: &str, field: &str) -> Self {
        Self::Conflict(format!("{entity} with this {field} already exists"))
    }

    /// Whether the error carries a caller-safe message.
    #[must_use]
    pub const fn is_application(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }

    /// Build the outgoing status without consuming the error.
    #[must_use]
    pub fn to_status(&self) -> Status {
        match self {
            Self::NotFound(msg) => Status::not_found(msg),
            Self::Unauthenticated(msg) => Status::unauthenticated(msg),
            Self::PermissionDenied(msg) => Status::permission_denied(msg),
            Self::InvalidArgument(msg) => Status::invalid_argument(msg),
            Self::Conflict(msg) | Self::AlreadyExists(msg) => Status::already_exists(msg),
            Self::Unavailable(msg) => Status::unavailable(msg),
            Self::Internal(msg) => {
                error!(error = %msg, "Internal error");
                Status::internal("Internal server error")
            }
        }
    }
}

impl From<AppError> for Status {
    fn from(error: AppError) -> Self {
        error.to_status()
    }
}

/// Marks a call whose caller went away before it finished.
///
/// Handlers return it (directly or wrapped) when they observe that the
/// request is no longer wanted.
#[derive(Debug, Clone, Copy, Default, Error)]
#[error("context canceled")]
pub struct Canceled;

/// Walk `error` and its `source()` chain looking for a `T`.
pub fn find_in_chain<'a, T>(error: &'a (dyn StdError + 'static)) -> Option<&'a T>
where
    T: StdError + 'static,
{
    std::iter::successors(Some(error), |&e| e.source()).find_map(|e| e.downcast_ref::<T>())
}

/// Whether `error` means the caller canceled the call.
///
/// True when the chain holds a [`Canceled`] or a `Status` with code
/// `Cancelled`. Deadline expiry is not a cancellation.
#[must_use]
pub fn is_cancellation(error: &(dyn StdError + 'static)) -> bool {
    std::iter::successors(Some(error), |&e| e.source()).any(|e| {
        e.is::<Canceled>()
            || e
                .downcast_ref::<Status>()
                .is_some_and(|status| status.code() == Code::Cancelled)
    })
}

/// Find the first `AppError` in the chain that is safe to expose.
#[must_use]
pub fn application_error<'a>(error: &'a (dyn StdError + 'static)) -> Option<&'a AppError> {
    find_in_chain::<AppError>(error).filter(|e| e.is_application())
}
