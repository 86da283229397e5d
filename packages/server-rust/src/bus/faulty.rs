//! [`InMemoryBus`] wrapper whose channels fail selected operations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use trainings_core::{BindingPattern, RoutingKey};

use super::{BusChannel, BusConnection, BusError, DeliveryReceiver, InMemoryBus};

/// Which channel operations fail with [`BusError::ChannelClosed`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    pub declare_exchange: bool,
    pub publish: bool,
    pub close: bool,
}

/// Channels created here share `inner`'s topology. Peers opened directly
/// on `inner` are unaffected.
#[derive(Clone)]
pub struct FaultyBus {
    inner: InMemoryBus,
    faults: Faults,
    publish_attempts: Arc<AtomicUsize>,
    close_attempts: Arc<AtomicUsize>,
}

impl FaultyBus {
    pub fn new(inner: InMemoryBus, faults: Faults) -> Self {
        Self {
            inner,
            faults,
            publish_attempts: Arc::new(AtomicUsize::new(0)),
            close_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    pub fn close_attempts(&self) -> usize {
        self.close_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BusConnection for FaultyBus {
    async fn create_channel(&self) -> Result<Arc<dyn BusChannel>, BusError> {
        Ok(Arc::new(FaultyChannel {
            inner: self.inner.create_channel().await?,
            faults: self.faults,
            publish_attempts: Arc::clone(&self.publish_attempts),
            close_attempts: Arc::clone(&self.close_attempts),
        }))
    }

    async fn close(&self) -> Result<(), BusError> {
        self.inner.close().await
    }
}

struct FaultyChannel {
    inner: Arc<dyn BusChannel>,
    faults: Faults,
    publish_attempts: Arc<AtomicUsize>,
    close_attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl BusChannel for FaultyChannel {
    async fn declare_exchange(&self, name: &str) -> Result<(), BusError> {
        if self.faults.declare_exchange {
            return Err(BusError::ChannelClosed);
        }
        self.inner.declare_exchange(name).await
    }

    async fn declare_queue(&self, name: Option<&str>) -> Result<String, BusError> {
        self.inner.declare_queue(name).await
    }

    async fn bind_queue(
        &self,
        queue: &str,
        pattern: &BindingPattern,
        exchange: &str,
    ) -> Result<(), BusError> {
        self.inner.bind_queue(queue, pattern, exchange).await
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryReceiver, BusError> {
        self.inner.consume(queue).await
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &RoutingKey,
        body: &[u8],
    ) -> Result<(), BusError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if self.faults.publish {
            return Err(BusError::ChannelClosed);
        }
        self.inner.publish(exchange, routing_key, body).await
    }

    async fn close(&self) -> Result<(), BusError> {
        self.close_attempts.fetch_add(1, Ordering::SeqCst);
        let closed = self.inner.close().await;
        if self.faults.close {
            return Err(BusError::ChannelClosed);
        }
        closed
    }
}
