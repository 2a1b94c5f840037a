//! Per-call debug logging.
//!
//! Logs the start and the outcome of every call except health probes.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

use guard_core::NIL_REQUEST_ID;
use phf::phf_set;
use tonic::Code;
use tracing::debug;

use super::{BoxError, DynError, Next, Reply, UnaryCall, UnaryInterceptor, code_of};

/// Methods polled by health checkers, never logged.
static PROBE_METHODS: phf::Set<&'static str> = phf_set! {
    "Check",
    "Watch",
};

/// Sink for debug lines.
pub trait DebugLogger: Send + Sync + 'static {
    fn debug(&self, message: &str, fields: &CallFields<'_>);
}

/// Structured fields attached to a debug line.
#[derive(Debug)]
pub struct CallFields<'a> {
    pub request_id: &'a str,
    pub method: &'a str,
    /// Present on completion lines only.
    pub completion: Option<Completion<'a>>,
}

#[derive(Debug)]
pub struct Completion<'a> {
    pub code: Code,
    pub duration: Duration,
    /// Set when the call failed.
    pub error: Option<&'a DynError>,
    /// The request payload, attached to failures only.
    pub request: Option<&'a dyn Debug>,
}

/// Writes debug lines through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDebugLogger;

impl DebugLogger for TracingDebugLogger {
    fn debug(&self, message: &str, fields: &CallFields<'_>) {
        match &fields.completion {
            None => debug!(
                request_id = fields.request_id,
                method = fields.method,
                "{message}"
            ),
            Some(Completion {
                code,
                duration,
                error: None,
                ..
            }) => debug!(
                request_id = fields.request_id,
                method = fields.method,
                code = ?code,
                duration_ms = duration.as_secs_f64() * 1e3,
                "{message}"
            ),
            Some(Completion {
                code,
                duration,
                error: Some(error),
                request,
            }) => debug!(
                request_id = fields.request_id,
                method = fields.method,
                code = ?code,
                duration_ms = duration.as_secs_f64() * 1e3,
                request = ?request,
                error = %error,
                "{message}"
            ),
        }
    }
}

/// Logs each call around the rest of the chain.
///
/// The payload is kept for the error line, so the handler receives a copy of
/// it while this layer is installed.
pub struct DebugInterceptor {
    logger: Arc<dyn DebugLogger>,
}

impl DebugInterceptor {
    #[must_use]
    pub fn new(logger: Arc<dyn DebugLogger>) -> Self {
        Self { logger }
    }
}

#[tonic::async_trait]
impl UnaryInterceptor for DebugInterceptor {
    async fn intercept(&self, call: UnaryCall, next: Next<'_>) -> Result<Reply, BoxError> {
        let method = call.info.method().to_owned();
        if PROBE_METHODS.contains(method.as_str()) {
            return next.run(call).await;
        }

        let request_id = call
            .info
            .request_id()
            .map_or_else(|| NIL_REQUEST_ID.to_owned(), |id| id.as_str().to_owned());
        // Shared with the handler; it gets a clone of the payload.
        let request = Arc::clone(&call.request);
        let start = Instant::now();

        self.logger.debug(
            "request started",
            &CallFields {
                request_id: &request_id,
                method: &method,
                completion: None,
            },
        );

        let result = next.run(call).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => self.logger.debug(
                "request completed successfully",
                &CallFields {
                    request_id: &request_id,
                    method: &method,
                    completion: Some(Completion {
                        code: Code::Ok,
                        duration,
                        error: None,
                        request: None,
                    }),
                },
            ),
            Err(error) => self.logger.debug(
                "request completed with error",
                &CallFields {
                    request_id: &request_id,
                    method: &method,
                    completion: Some(Completion {
                        code: code_of(&**error),
                        duration,
                        error: Some(&**error),
                        request: Some(&request),
                    }),
                },
            ),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use guard_core::{AppError, RequestId};
    use tonic::Status;

    use super::super::testing::{RecordingDebugLogger, call_request};
    use super::super::{InterceptorChain, PanicHandler};
    use super::*;
    use crate::interceptor::testing::RecordingPanicHandler;

    fn debug_chain(logger: &Arc<RecordingDebugLogger>) -> InterceptorChain {
        InterceptorChain::build(
            Some(Arc::clone(logger) as Arc<dyn DebugLogger>),
            None,
            None,
            Vec::new(),
        )
    }

    async fn echo(req: tonic::Request<String>) -> Result<tonic::Response<String>, Status> {
        Ok(tonic::Response::new(req.into_inner()))
    }

    #[tokio::test]
    async fn successful_call_logs_start_and_completion() {
        let logger = Arc::new(RecordingDebugLogger::default());
        let mut request = call_request("/users.v1.UserService/GetUser", "id-1");
        request
            .extensions_mut()
            .insert(RequestId("req-42".into()));

        debug_chain(&logger).unary(request, echo).await.unwrap();

        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "request started");
        assert_eq!(entries[0].request_id, "req-42");
        assert_eq!(entries[0].method, "GetUser");
        assert!(entries[0].code.is_none());
        assert_eq!(entries[1].message, "request completed successfully");
        assert_eq!(entries[1].code, Some(Code::Ok));
        assert!(entries[1].error.is_none());
        assert!(entries[1].request.is_none());
    }

    #[tokio::test]
    async fn failed_call_logs_error_and_request() {
        let logger = Arc::new(RecordingDebugLogger::default());
        debug_chain(&logger)
            .unary(call_request("/pkg.Svc/Get", "payload-7"), |_req| async {
                Err::<tonic::Response<String>, _>(Status::not_found("missing"))
            })
            .await
            .unwrap_err();

        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].message, "request completed with error");
        assert_eq!(entries[1].code, Some(Code::NotFound));
        assert!(entries[1].error.as_deref().unwrap().contains("missing"));
        assert!(entries[1].request.as_deref().unwrap().contains("payload-7"));
    }

    #[tokio::test]
    async fn raw_errors_log_unknown_code() {
        let logger = Arc::new(RecordingDebugLogger::default());
        debug_chain(&logger)
            .unary(call_request("/pkg.Svc/Get", "x"), |_req| async {
                Err::<tonic::Response<String>, _>(AppError::Unavailable("db".into()))
            })
            .await
            .unwrap_err();

        assert_eq!(logger.entries()[1].code, Some(Code::Unknown));
    }

    #[tokio::test]
    async fn missing_request_id_logs_nil() {
        let logger = Arc::new(RecordingDebugLogger::default());
        debug_chain(&logger)
            .unary(call_request("/pkg.Svc/Echo", "x"), echo)
            .await
            .unwrap();

        assert!(
            logger
                .entries()
                .iter()
                .all(|e| e.request_id == NIL_REQUEST_ID)
        );
    }

    #[tokio::test]
    async fn probe_methods_are_not_logged() {
        let logger = Arc::new(RecordingDebugLogger::default());
        let chain = debug_chain(&logger);

        chain
            .unary(call_request("/grpc.health.v1.Health/Check", "x"), echo)
            .await
            .unwrap();
        chain
            .unary(call_request("/grpc.health.v1.Health/Watch", "x"), echo)
            .await
            .unwrap();

        assert!(logger.entries().is_empty());
    }

    #[tokio::test]
    async fn recovered_panic_is_logged_as_internal() {
        let logger = Arc::new(RecordingDebugLogger::default());
        let chain = InterceptorChain::build(
            Some(Arc::clone(&logger) as Arc<dyn DebugLogger>),
            Some(Arc::new(RecordingPanicHandler::default()) as Arc<dyn PanicHandler>),
            None,
            Vec::new(),
        );

        chain
            .unary(call_request("/pkg.Svc/Explode", "x"), |_req| async {
                if true {
                    panic!("boom");
                }
                Ok::<_, Status>(tonic::Response::new(String::new()))
            })
            .await
            .unwrap_err();

        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].code, Some(Code::Internal));
    }

    /// Counts how often it is cloned.
    #[derive(Debug)]
    struct Counted(Arc<AtomicUsize>);

    impl Clone for Counted {
        fn clone(&self) -> Self {
            self.0.fetch_add(1, Ordering::SeqCst);
            Self(Arc::clone(&self.0))
        }
    }

    async fn clones_seen_by_handler(chain: &InterceptorChain) -> usize {
        let clones = Arc::new(AtomicUsize::new(0));
        chain
            .unary(
                tonic::Request::new(Counted(Arc::clone(&clones))),
                |_req| async { Ok::<_, Status>(tonic::Response::new(String::new())) },
            )
            .await
            .unwrap();
        clones.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn payload_is_copied_only_under_debug_logging() {
        let plain = InterceptorChain::build(None, None, None, Vec::new());
        assert_eq!(clones_seen_by_handler(&plain).await, 0);

        let logger = Arc::new(RecordingDebugLogger::default());
        assert_eq!(clones_seen_by_handler(&debug_chain(&logger)).await, 1);
    }

    #[test]
    fn tracing_logger_accepts_every_shape() {
        let error: BoxError = "boom".into();
        let logger = TracingDebugLogger;

        logger.debug(
            "request started",
            &CallFields {
                request_id: NIL_REQUEST_ID,
                method: "Get",
                completion: None,
            },
        );
        logger.debug(
            "request completed with error",
            &CallFields {
                request_id: NIL_REQUEST_ID,
                method: "Get",
                completion: Some(Completion {
                    code: Code::Unknown,
                    duration: Duration::from_millis(3),
                    error: Some(&*error),
                    request: Some(&"payload"),
                }),
            },
        );
    }
}
