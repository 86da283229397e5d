//! Per-delivery tracing span and completion log line.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info, info_span, warn, Instrument};

use crate::bus::Delivery;
use crate::service::dispatcher::{DispatchError, Dispatched};

/// Wraps a dispatcher in a `dispatch` span carrying the routing key,
/// operation, outcome and duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLayer;

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct TracingService<S> {
    inner: S,
}

fn outcome(result: &Result<Dispatched, DispatchError>) -> &'static str {
    match result {
        Ok(d) if d.envelope.is_success() => "success",
        Ok(_) => "error",
        Err(DispatchError::Miss { .. }) => "miss",
        Err(_) => "failed",
    }
}

impl<S> Service<Delivery> for TracingService<S>
where
    S: Service<Delivery, Response = Dispatched, Error = DispatchError> + Send,
    S::Future: Send + 'static,
{
    type Response = Dispatched;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Dispatched, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, delivery: Delivery) -> Self::Future {
        let routing_key = delivery.routing_key.to_string();
        let span = info_span!(
            "dispatch",
            routing_key = %routing_key,
            operation = tracing::field::Empty,
            outcome = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        let fut = self.inner.call(delivery);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                let outcome = outcome(&result);

                let span = tracing::Span::current();
                span.record("outcome", outcome);
                span.record("duration_ms", duration_ms);

                match &result {
                    Ok(dispatched) => {
                        span.record("operation", dispatched.operation.as_str());
                        info!(
                            routing_key = %routing_key,
                            operation = %dispatched.operation,
                            outcome,
                            duration_ms,
                            "dispatch complete"
                        );
                    }
                    Err(e) => {
                        warn!(routing_key = %routing_key, error = %e, outcome, "dispatch skipped");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
