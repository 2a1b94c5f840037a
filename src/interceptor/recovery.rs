//! Panic recovery.
//!
//! A panic anywhere below this layer is caught, logged, reported on a
//! detached task, and answered with `Internal` / `"internal error."`.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tonic::Status;

use super::{BoxError, DynError, Next, Reply, UnaryCall, UnaryInterceptor, internal_status};
use crate::report::{DetachedReporter, ReportContext, ReportError};

/// Capabilities used when a handler panics.
#[tonic::async_trait]
pub trait PanicHandler: Send + Sync + 'static {
    /// Record the panic locally.
    fn log_panic(&self, value: &PanicValue);

    /// Ship the panic to an external sink within `ctx`'s budget.
    async fn report_panic(&self, ctx: ReportContext, value: &PanicValue) -> Result<(), BoxError>;

    /// Record a failure of `report_panic`.
    fn log_error(&self, error: &DynError);
}

/// Description of a caught panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicValue(String);

impl PanicValue {
    /// Read the message out of a panic payload.
    #[must_use]
    pub fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_string());
        Self(message)
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PanicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
#[error("error while reporting panic {panic:?}: {source}")]
struct PanicReportFailed {
    panic: String,
    #[source]
    source: ReportError,
}

pub struct RecoveryInterceptor {
    handler: Arc<dyn PanicHandler>,
    reporter: DetachedReporter,
}

impl RecoveryInterceptor {
    #[must_use]
    pub fn new(handler: Arc<dyn PanicHandler>) -> Self {
        Self {
            handler,
            reporter: DetachedReporter::default(),
        }
    }

    /// Log and report a caught panic, returning the status for the caller.
    pub async fn recover(&self, value: PanicValue) -> Status {
        self.handler.log_panic(&value);

        let handler = Arc::clone(&self.handler);
        let reported = value.clone();
        let outcome = self
            .reporter
            .run(move |ctx| async move { handler.report_panic(ctx, &reported).await })
            .await;

        if let Err(source) = outcome {
            self.handler.log_error(&PanicReportFailed {
                panic: value.0,
                source,
            });
        }

        internal_status()
    }
}

#[tonic::async_trait]
impl UnaryInterceptor for RecoveryInterceptor {
    async fn intercept(&self, call: UnaryCall, next: Next<'_>) -> Result<Reply, BoxError> {
        match AssertUnwindSafe(next.run(call)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let value = PanicValue::from_payload(payload.as_ref());
                Err(Box::new(self.recover(value).await))
            }
        }
    }
}
