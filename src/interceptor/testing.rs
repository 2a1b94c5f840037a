//! Recording capability fakes shared by the interceptor tests.

use std::sync::Mutex;
use std::time::Duration;

use guard_core::{FullMethod, application_error};
use tonic::{Code, Status};

use super::{BoxError, CallFields, DebugLogger, DynError, ErrorHandler, PanicHandler, PanicValue};
use crate::report::ReportContext;

pub(crate) fn call_request(method: &str, payload: &str) -> tonic::Request<String> {
    let mut request = tonic::Request::new(payload.to_string());
    request.extensions_mut().insert(FullMethod::new(method));
    request
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Conversion {
    /// Map `AppError` to its status.
    AppError,
    /// Fail every conversion.
    Fails,
}

/// Error handler recording every capability call.
#[derive(Debug)]
pub(crate) struct RecordingErrorHandler {
    application: bool,
    conversion: Conversion,
    report_fails: bool,
    logged: Mutex<Vec<String>>,
    reported: Mutex<Vec<(String, Duration)>>,
}

impl RecordingErrorHandler {
    /// `AppError`s are application errors and convert cleanly.
    pub(crate) fn application() -> Self {
        Self {
            application: true,
            conversion: Conversion::AppError,
            report_fails: false,
            logged: Mutex::default(),
            reported: Mutex::default(),
        }
    }

    /// Nothing is an application error.
    pub(crate) fn opaque() -> Self {
        Self {
            application: false,
            ..Self::application()
        }
    }

    pub(crate) fn failing_conversion(mut self) -> Self {
        self.conversion = Conversion::Fails;
        self
    }

    pub(crate) fn failing_reports(mut self) -> Self {
        self.report_fails = true;
        self
    }

    pub(crate) fn logged(&self) -> Vec<String> {
        self.logged.lock().unwrap().clone()
    }

    pub(crate) fn reported(&self) -> Vec<(String, Duration)> {
        self.reported.lock().unwrap().clone()
    }
}

#[tonic::async_trait]
impl ErrorHandler for RecordingErrorHandler {
    fn log_error(&self, error: &DynError) {
        self.logged.lock().unwrap().push(error.to_string());
    }

    fn is_application_error(&self, error: &DynError) -> bool {
        self.application && application_error(error).is_some()
    }

    async fn report_error(&self, ctx: ReportContext, error: &DynError) -> Result<(), BoxError> {
        self.reported
            .lock()
            .unwrap()
            .push((error.to_string(), ctx.timeout()));
        if self.report_fails {
            return Err("sink unavailable".into());
        }
        Ok(())
    }

    fn error_to_status(&self, error: &DynError) -> Result<Status, BoxError> {
        match self.conversion {
            Conversion::AppError => application_error(error)
                .map(guard_core::AppError::to_status)
                .ok_or_else(|| "not an application error".into()),
            Conversion::Fails => Err("no mapping".into()),
        }
    }
}

/// Panic handler recording every capability call.
#[derive(Debug, Default)]
pub(crate) struct RecordingPanicHandler {
    report_fails: bool,
    panics: Mutex<Vec<String>>,
    reports: Mutex<Vec<(String, Duration)>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingPanicHandler {
    pub(crate) fn failing_reports() -> Self {
        Self {
            report_fails: true,
            ..Self::default()
        }
    }

    pub(crate) fn panics(&self) -> Vec<String> {
        self.panics.lock().unwrap().clone()
    }

    pub(crate) fn reports(&self) -> Vec<(String, Duration)> {
        self.reports.lock().unwrap().clone()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

#[tonic::async_trait]
impl PanicHandler for RecordingPanicHandler {
    fn log_panic(&self, value: &PanicValue) {
        self.panics.lock().unwrap().push(value.to_string());
    }

    async fn report_panic(&self, ctx: ReportContext, value: &PanicValue) -> Result<(), BoxError> {
        self.reports
            .lock()
            .unwrap()
            .push((value.to_string(), ctx.timeout()));
        if self.report_fails {
            return Err("sink unavailable".into());
        }
        Ok(())
    }

    fn log_error(&self, error: &DynError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// One debug log line.
#[derive(Debug, Clone)]
pub(crate) struct DebugEntry {
    pub(crate) message: String,
    pub(crate) request_id: String,
    pub(crate) method: String,
    pub(crate) code: Option<Code>,
    pub(crate) error: Option<String>,
    pub(crate) request: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct RecordingDebugLogger {
    entries: Mutex<Vec<DebugEntry>>,
}

impl RecordingDebugLogger {
    pub(crate) fn entries(&self) -> Vec<DebugEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl DebugLogger for RecordingDebugLogger {
    fn debug(&self, message: &str, fields: &CallFields<'_>) {
        let completion = fields.completion.as_ref();
        self.entries.lock().unwrap().push(DebugEntry {
            message: message.to_string(),
            request_id: fields.request_id.to_string(),
            method: fields.method.to_string(),
            code: completion.map(|c| c.code),
            error: completion.and_then(|c| c.error).map(ToString::to_string),
            request: completion
                .and_then(|c| c.request)
                .map(|r| format!("{r:?}")),
        });
    }
}
