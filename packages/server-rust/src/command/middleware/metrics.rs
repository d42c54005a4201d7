//! Per-command instrumentation.
//!
//! Each request runs inside a `command` span carrying its name, op id and
//! database. On completion the span records the duration and outcome, the
//! `docket_command_duration_seconds` histogram is updated, and commands slower
//! than the configured threshold are logged at `info` as slow operations.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tower::{Layer, Service};
use tracing::{debug, info, info_span, Instrument, Span};

use crate::command::error::DispatchError;
use crate::command::reply::Reply;
use crate::command::service::CommandRequest;

/// How a request left the pipeline, as recorded on the span.
fn classify(result: &Result<Reply, DispatchError>) -> (&'static str, Option<i64>) {
    match result {
        Ok(reply) if reply.ok() => ("ok", None),
        Ok(reply) => ("failed", reply.code()),
        Err(DispatchError::Overloaded) => ("shed", None),
        Err(DispatchError::ConnectionClosed { .. }) => ("closed", None),
    }
}

#[derive(Debug, Clone)]
pub struct MetricsLayer {
    slow_threshold: Duration,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(slow_threshold_ms: u64) -> Self {
        Self {
            slow_threshold: Duration::from_millis(slow_threshold_ms),
        }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            slow_threshold: self.slow_threshold,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    slow_threshold: Duration,
}

impl<S> Service<CommandRequest> for MetricsService<S>
where
    S: Service<CommandRequest, Response = Reply, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Reply;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Reply, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: CommandRequest) -> Self::Future {
        let command = req.command_name().to_string();
        let span = info_span!(
            "command",
            command = %command,
            op_id = req.op_ctx.op_id(),
            db = %req.request.db,
            app_name = req.op_ctx.client().app_name.as_deref(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
            code = tracing::field::Empty,
        );
        let slow_threshold = self.slow_threshold;
        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let (outcome, code) = classify(&result);
                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                let span = Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);
                if let Some(code) = code {
                    span.record("code", code);
                }
                ::metrics::histogram!(
                    "docket_command_duration_seconds",
                    "command" => command,
                    "outcome" => outcome
                )
                .record(elapsed.as_secs_f64());

                if elapsed >= slow_threshold {
                    info!(duration_ms, outcome, "slow command");
                } else {
                    debug!(duration_ms, outcome, "command complete");
                }
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
