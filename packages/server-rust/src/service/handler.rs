//! Type-erased request handlers.
//!
//! A handler is any `tower::Service<Vec<u8>>` that turns a message body into
//! an [`Envelope`]. Handlers never fail at the service level: every error is
//! already rendered into an `ERROR: ...` envelope.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;
use trainings_core::Envelope;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Envelope, Infallible>> + Send>>;

/// A boxed handler as stored in the dispatch table.
pub type BoxedHandler = Box<
    dyn Service<Vec<u8>, Response = Envelope, Error = Infallible, Future = HandlerFuture> + Send,
>;

/// Boxes a concrete handler service.
pub fn boxed<S>(service: S) -> BoxedHandler
where
    S: Service<Vec<u8>, Response = Envelope, Error = Infallible> + Send + 'static,
    S::Future: Send + 'static,
{
    Box::new(HandlerWrapper(service))
}

/// Builds a handler from an async function over shared state.
///
/// `state` is cloned into every call, so the returned future owns what it
/// uses and the handler can run on any task.
pub fn handler_fn<T, F, Fut>(state: Arc<T>, f: F) -> BoxedHandler
where
    T: ?Sized + Send + Sync + 'static,
    F: Fn(Arc<T>, Vec<u8>) -> Fut + Send + 'static,
    Fut: Future<Output = Envelope> + Send + 'static,
{
    boxed(tower::service_fn(move |body: Vec<u8>| {
        let response = f(Arc::clone(&state), body);
        async move { Ok::<_, Infallible>(response.await) }
    }))
}

/// Erases the future type of a concrete handler.
struct HandlerWrapper<S>(S);

impl<S> Service<Vec<u8>> for HandlerWrapper<S>
where
    S: Service<Vec<u8>, Response = Envelope, Error = Infallible> + Send,
    S::Future: Send + 'static,
{
    type Response = Envelope;
    type Error = Infallible;
    type Future = HandlerFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_ready(cx)
    }

    fn call(&mut self, body: Vec<u8>) -> Self::Future {
        Box::pin(self.0.call(body))
    }
}
