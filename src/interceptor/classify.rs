//! Error classification.
//!
//! Every handler error is logged. Caller cancellations are swallowed,
//! application errors become their status, and anything else is reported
//! and masked as `Internal` / `"internal error."` so internal details never
//! reach the wire.

use std::sync::Arc;

use guard_core::is_cancellation;
use thiserror::Error;
use tonic::Status;

use super::{BoxError, DynError, Next, Reply, UnaryCall, UnaryInterceptor, internal_status};
use crate::report::{DetachedReporter, ReportContext, ReportError};

/// Capabilities used to classify handler errors.
#[tonic::async_trait]
pub trait ErrorHandler: Send + Sync + 'static {
    fn log_error(&self, error: &DynError);

    /// Whether `error` carries a message that is safe to return to callers.
    fn is_application_error(&self, error: &DynError) -> bool;

    /// Ship `error` to an external sink within `ctx`'s budget.
    async fn report_error(&self, ctx: ReportContext, error: &DynError) -> Result<(), BoxError>;

    /// Map an application error to the status sent to the caller.
    fn error_to_status(&self, error: &DynError) -> Result<Status, BoxError>;
}

/// A handler error tagged with the short name of the method that raised it.
#[derive(Debug, Error)]
#[error("{method:?}: {source}")]
pub struct MethodError {
    method: String,
    #[source]
    source: BoxError,
}

impl MethodError {
    pub fn new(method: impl Into<String>, source: BoxError) -> Self {
        Self {
            method: method.into(),
            source,
        }
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

#[derive(Debug, Error)]
#[error("error to grpc status: {source}")]
struct ConversionFailed {
    #[source]
    source: BoxError,
}

#[derive(Debug, Error)]
#[error("error while reporting this error {error:?}: {source}")]
struct ErrorReportFailed {
    error: String,
    #[source]
    source: ReportError,
}

pub struct ErrorClassifier {
    handler: Arc<dyn ErrorHandler>,
    reporter: DetachedReporter,
}

impl ErrorClassifier {
    #[must_use]
    pub fn new(handler: Arc<dyn ErrorHandler>) -> Self {
        Self {
            handler,
            reporter: DetachedReporter::default(),
        }
    }

    /// Decide what the caller sees for `error`.
    ///
    /// `None` means the call was cancelled and no error is returned.
    pub async fn classify(&self, error: BoxError) -> Option<Status> {
        let error: Arc<DynError> = Arc::from(error);
        self.handler.log_error(&*error);

        if is_cancellation(&*error) {
            return None;
        }

        if self.handler.is_application_error(&*error) {
            match self.handler.error_to_status(&*error) {
                Ok(status) => return Some(status),
                Err(source) => {
                    let failed: Arc<DynError> = Arc::new(ConversionFailed { source });
                    self.handler.log_error(&*failed);
                    self.report(failed).await;
                    return Some(internal_status());
                }
            }
        }

        self.report(error).await;
        Some(internal_status())
    }

    async fn report(&self, error: Arc<DynError>) {
        let handler = Arc::clone(&self.handler);
        let reported = Arc::clone(&error);
        let outcome = self
            .reporter
            .run(move |ctx| async move { handler.report_error(ctx, &*reported).await })
            .await;

        if let Err(source) = outcome {
            self.handler.log_error(&ErrorReportFailed {
                error: error.to_string(),
                source,
            });
        }
    }
}

#[tonic::async_trait]
impl UnaryInterceptor for ErrorClassifier {
    async fn intercept(&self, call: UnaryCall, next: Next<'_>) -> Result<Reply, BoxError> {
        let method = call.info.method().to_owned();
        match next.run(call).await {
            Ok(reply) => Ok(reply),
            Err(error) => match self.classify(Box::new(MethodError::new(method, error))).await {
                Some(status) => Err(Box::new(status)),
                None => Ok(Reply::empty()),
            },
        }
    }
}
