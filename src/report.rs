//! Detached error and panic reporting.
//!
//! Reports run on their own task with a fixed time budget, so they finish
//! even when the call that triggered them is cancelled or dropped.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::Instant;

use crate::interceptor::BoxError;

/// Time budget of a single report.
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(1);

/// Deadline handed to a reporter.
///
/// Independent of the call that triggered the report.
#[derive(Debug, Clone, Copy)]
pub struct ReportContext {
    started: Instant,
    timeout: Duration,
}

impl ReportContext {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    /// Total budget of this report.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.started + self.timeout
    }

    /// Budget left before the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline().saturating_duration_since(Instant::now())
    }
}

/// Failure of a detached report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("{0}")]
    Failed(#[source] BoxError),

    #[error("report timed out after {0:?}")]
    TimedOut(Duration),

    #[error("report task aborted: {0}")]
    Aborted(#[from] JoinError),
}

/// Runs reports on a spawned task bounded by a timeout.
#[derive(Debug, Clone, Copy)]
pub struct DetachedReporter {
    timeout: Duration,
}

impl Default for DetachedReporter {
    fn default() -> Self {
        Self::new(REPORT_TIMEOUT)
    }
}

impl DetachedReporter {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `report` detached from the caller and wait for its outcome.
    ///
    /// Dropping the returned future does not stop the report.
    ///
    /// # Errors
    /// Returns the report's own error, a timeout, or the join failure if the
    /// report panicked.
    pub async fn run<F, Fut>(&self, report: F) -> Result<(), ReportError>
    where
        F: FnOnce(ReportContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let timeout = self.timeout;
        let task = tokio::spawn(async move {
            let ctx = ReportContext::new(timeout);
            tokio::time::timeout(timeout, report(ctx)).await
        });

        match task.await? {
            Ok(result) => result.map_err(ReportError::Failed),
            Err(_) => Err(ReportError::TimedOut(timeout)),
        }
    }
}
