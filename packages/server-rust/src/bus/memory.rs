//! In-process topic exchange.
//!
//! Mirrors the broker semantics the routers rely on: topic matching with `*`
//! and `#`, one copy per queue even when several bindings match, and queues
//! that disappear together with the channel that declared them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use trainings_core::{BindingPattern, RoutingKey};

use super::{BusChannel, BusConnection, BusError, Delivery, DeliveryReceiver, DELIVERY_BUFFER};

struct Binding {
    queue: String,
    pattern: BindingPattern,
}

struct QueueState {
    owner: u64,
    sender: mpsc::Sender<Delivery>,
    /// Taken by the first `consume`.
    receiver: Option<DeliveryReceiver>,
}

#[derive(Default)]
struct Topology {
    exchanges: HashMap<String, Vec<Binding>>,
    queues: HashMap<String, QueueState>,
}

impl Topology {
    fn remove_queues(&mut self, doomed: &HashSet<String>) {
        self.queues.retain(|name, _| !doomed.contains(name));
        for bindings in self.exchanges.values_mut() {
            bindings.retain(|b| !doomed.contains(&b.queue));
        }
    }
}

#[derive(Default)]
struct Shared {
    topology: RwLock<Topology>,
    next_channel: AtomicU64,
    next_queue: AtomicU64,
}

/// Handle to an in-process exchange. Clones share the same topology.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    shared: Arc<Shared>,
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queues currently declared.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.shared.topology.read().queues.len()
    }
}

#[async_trait]
impl BusConnection for InMemoryBus {
    async fn create_channel(&self) -> Result<Arc<dyn BusChannel>, BusError> {
        let id = self.shared.next_channel.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(InMemoryChannel {
            id,
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), BusError> {
        let mut topology = self.shared.topology.write();
        topology.queues.clear();
        topology.exchanges.clear();
        Ok(())
    }
}

/// Channel on an [`InMemoryBus`].
pub struct InMemoryChannel {
    id: u64,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BusError::ChannelClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BusChannel for InMemoryChannel {
    async fn declare_exchange(&self, name: &str) -> Result<(), BusError> {
        self.ensure_open()?;
        self.shared
            .topology
            .write()
            .exchanges
            .entry(name.to_string())
            .or_default();
        debug!(exchange = name, "Exchange declared");
        Ok(())
    }

    async fn declare_queue(&self, name: Option<&str>) -> Result<String, BusError> {
        self.ensure_open()?;
        let name = match name {
            Some(name) => name.to_string(),
            None => format!(
                "amq.gen-{}",
                self.shared.next_queue.fetch_add(1, Ordering::Relaxed)
            ),
        };
        let mut topology = self.shared.topology.write();
        topology.queues.entry(name.clone()).or_insert_with(|| {
            let (sender, receiver) = mpsc::channel(DELIVERY_BUFFER);
            QueueState {
                owner: self.id,
                sender,
                receiver: Some(receiver),
            }
        });
        debug!(queue = %name, "Queue declared");
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        pattern: &BindingPattern,
        exchange: &str,
    ) -> Result<(), BusError> {
        self.ensure_open()?;
        let mut topology = self.shared.topology.write();
        if !topology.queues.contains_key(queue) {
            return Err(BusError::UnknownQueue(queue.to_string()));
        }
        let bindings = topology
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BusError::UnknownExchange(exchange.to_string()))?;
        if !bindings
            .iter()
            .any(|b| b.queue == queue && b.pattern == *pattern)
        {
            bindings.push(Binding {
                queue: queue.to_string(),
                pattern: pattern.clone(),
            });
        }
        debug!(queue, exchange, pattern = %pattern, "Queue bound to exchange");
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryReceiver, BusError> {
        self.ensure_open()?;
        let mut topology = self.shared.topology.write();
        let state = topology
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_string()))?;
        state
            .receiver
            .take()
            .ok_or_else(|| BusError::AlreadyConsumed(queue.to_string()))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &RoutingKey,
        body: &[u8],
    ) -> Result<(), BusError> {
        self.ensure_open()?;
        let topology = self.shared.topology.read();
        let bindings = topology
            .exchanges
            .get(exchange)
            .ok_or_else(|| BusError::UnknownExchange(exchange.to_string()))?;

        let mut targets: Vec<&str> = bindings
            .iter()
            .filter(|b| b.pattern.matches(routing_key))
            .map(|b| b.queue.as_str())
            .collect();
        targets.sort_unstable();
        targets.dedup();

        if targets.is_empty() {
            debug!(exchange, routing_key = %routing_key, "Message unroutable, dropped");
        }
        for queue in targets {
            let Some(state) = topology.queues.get(queue) else {
                continue;
            };
            let delivery = Delivery {
                routing_key: routing_key.clone(),
                body: body.to_vec(),
            };
            match state.sender.try_send(delivery) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(queue, routing_key = %routing_key, "Queue full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(queue, routing_key = %routing_key, "Consumer gone, message dropped");
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut topology = self.shared.topology.write();
        let owned: HashSet<String> = topology
            .queues
            .iter()
            .filter(|(_, q)| q.owner == self.id)
            .map(|(name, _)| name.clone())
            .collect();
        topology.remove_queues(&owned);
        debug!(channel = self.id, queues = owned.len(), "Channel closed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
