//! Suffix-to-handler dispatch for one queue.
//!
//! The bus delivers everything under `<domain>.#`; the dispatcher looks at
//! the single token after `<domain>` and calls the handler registered for
//! it. The table is built with [`DispatcherBuilder`] and frozen by
//! [`DispatcherBuilder::build`], so registration cannot race with dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Service;
use trainings_core::{Envelope, RoutingError, RoutingKey};

use super::handler::BoxedHandler;
use crate::bus::Delivery;

/// Errors from building or calling a dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid operation suffix {suffix:?}")]
    InvalidSuffix {
        suffix: String,
        #[source]
        source: RoutingError,
    },
    #[error("a handler for {suffix:?} is already registered")]
    DuplicateRoute { suffix: String },
    #[error("no handler for routing key {routing_key}")]
    Miss { routing_key: RoutingKey },
}

/// Result of a dispatched delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// Operation suffix the handler was registered under.
    pub operation: String,
    pub envelope: Envelope,
}

/// Collects handlers before consumption starts.
pub struct DispatcherBuilder {
    domain: RoutingKey,
    handlers: HashMap<String, BoxedHandler>,
}

impl std::fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherBuilder")
            .field("domain", &self.domain)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DispatcherBuilder {
    #[must_use]
    pub fn new(domain: RoutingKey) -> Self {
        Self {
            domain,
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for `<domain>.<suffix>`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::InvalidSuffix`] when `suffix` is not a single literal
    /// token, [`DispatchError::DuplicateRoute`] when it is already taken.
    pub fn register(
        &mut self,
        suffix: &str,
        handler: BoxedHandler,
    ) -> Result<&mut Self, DispatchError> {
        self.domain
            .child(suffix)
            .map_err(|source| DispatchError::InvalidSuffix {
                suffix: suffix.to_string(),
                source,
            })?;
        if self.handlers.contains_key(suffix) {
            return Err(DispatchError::DuplicateRoute {
                suffix: suffix.to_string(),
            });
        }
        self.handlers.insert(suffix.to_string(), handler);
        Ok(self)
    }

    #[must_use]
    pub fn domain(&self) -> &RoutingKey {
        &self.domain
    }

    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            domain: self.domain,
            handlers: self.handlers,
        }
    }
}

/// Frozen dispatch table.
pub struct Dispatcher {
    domain: RoutingKey,
    handlers: HashMap<String, BoxedHandler>,
}

impl Dispatcher {
    #[must_use]
    pub fn domain(&self) -> &RoutingKey {
        &self.domain
    }

    /// Registered suffixes, sorted.
    #[must_use]
    pub fn operations(&self) -> Vec<&str> {
        let mut ops: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ops.sort_unstable();
        ops
    }
}

impl Service<Delivery> for Dispatcher {
    type Response = Dispatched;
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<Dispatched, DispatchError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        for handler in self.handlers.values_mut() {
            match handler.poll_ready(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(never)) => match never {},
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, delivery: Delivery) -> Self::Future {
        let Delivery { routing_key, body } = delivery;
        let operation = routing_key.operation_after(&self.domain).map(str::to_string);
        let handler = match operation.as_deref() {
            Some(op) => self.handlers.get_mut(op),
            None => None,
        };

        match (operation, handler) {
            (Some(operation), Some(handler)) => {
                let response = handler.call(body);
                Box::pin(async move {
                    let envelope = match response.await {
                        Ok(envelope) => envelope,
                        Err(never) => match never {},
                    };
                    Ok(Dispatched {
                        operation,
                        envelope,
                    })
                })
            }
            _ => Box::pin(async move { Err(DispatchError::Miss { routing_key }) }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
