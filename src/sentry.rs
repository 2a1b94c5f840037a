//! Error and panic reporting to Sentry.

use guard_core::{AppError, application_error};
use guard_telemetry::sentry;
use tonic::Status;
use tracing::error;

use crate::interceptor::{BoxError, DynError, ErrorHandler, PanicHandler, PanicValue};
use crate::report::ReportContext;

/// Logs through `tracing` and reports to the active Sentry client.
///
/// Without a configured client reports succeed without sending anything.
/// `AppError`s other than `Internal` are application errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct SentryReporter;

impl SentryReporter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Wait for queued events to be sent within the report budget.
    async fn flush(ctx: ReportContext) -> Result<(), BoxError> {
        let Some(client) = sentry::Hub::current().client() else {
            return Ok(());
        };
        let timeout = ctx.remaining();
        let flushed = tokio::task::spawn_blocking(move || client.flush(Some(timeout))).await?;
        if flushed {
            Ok(())
        } else {
            Err(format!("sentry flush did not finish within {timeout:?}").into())
        }
    }
}

#[tonic::async_trait]
impl ErrorHandler for SentryReporter {
    fn log_error(&self, error: &DynError) {
        error!(error = %error, "rpc error");
    }

    fn is_application_error(&self, error: &DynError) -> bool {
        application_error(error).is_some()
    }

    async fn report_error(&self, ctx: ReportContext, error: &DynError) -> Result<(), BoxError> {
        sentry::capture_error(error);
        Self::flush(ctx).await
    }

    fn error_to_status(&self, error: &DynError) -> Result<Status, BoxError> {
        application_error(error)
            .map(AppError::to_status)
            .ok_or_else(|| "no application error in chain".into())
    }
}

#[tonic::async_trait]
impl PanicHandler for SentryReporter {
    fn log_panic(&self, value: &PanicValue) {
        error!(panic = %value, "recovered from panic in rpc handler");
    }

    async fn report_panic(&self, ctx: ReportContext, value: &PanicValue) -> Result<(), BoxError> {
        sentry::capture_message(&format!("panic: {value}"), sentry::Level::Fatal);
        Self::flush(ctx).await
    }

    fn log_error(&self, error: &DynError) {
        error!(error = %error, "panic report failed");
    }
}
