//! One domain queue wired to its dispatcher.
//!
//! A [`DomainRouter`] owns two channels: the consumer channel holds the
//! server-named queue bound to `<domain>.#`, the producer channel publishes
//! every envelope on `<outbound>.<operation>`. Deliveries are handled one at
//! a time by a single task per router.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, info, warn};
use trainings_core::{BindingPattern, Envelope, RoutingError, RoutingKey};

use crate::bus::{BusChannel, BusConnection, BusError, Delivery, DeliveryReceiver};
use crate::lifecycle::ShutdownController;
use crate::service::{DispatchError, Dispatched, Dispatcher, TracingLayer};

/// Errors from setting up or stopping a router.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("bus: {0}")]
    Bus(#[from] BusError),
    #[error("invalid routing prefix: {0}")]
    Routing(#[from] RoutingError),
    #[error("dispatcher registration: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("dispatcher serves {found}, router serves {expected}")]
    DomainMismatch {
        expected: RoutingKey,
        found: RoutingKey,
    },
    #[error("router for {0} is already consuming")]
    AlreadyStarted(RoutingKey),
    #[error("delivery loop aborted: {0}")]
    DeliveryLoop(#[from] tokio::task::JoinError),
}

/// Where a router listens and where it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Inbound prefix, e.g. `trainings.exgroup`.
    pub domain: RoutingKey,
    /// Outbound prefix, e.g. `tgbot.exgroup`.
    pub outbound: RoutingKey,
    pub exchange: String,
}

pub struct DomainRouter {
    config: RouterConfig,
    consumer: Arc<dyn BusChannel>,
    producer: Arc<dyn BusChannel>,
    shutdown: Arc<ShutdownController>,
    queue: Option<String>,
    delivery_loop: Option<JoinHandle<()>>,
}

impl DomainRouter {
    /// Opens the consumer and producer channels.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Bus`] when a channel cannot be created.
    pub async fn new(
        connection: &dyn BusConnection,
        config: RouterConfig,
        shutdown: Arc<ShutdownController>,
    ) -> Result<Self, RouterError> {
        let consumer = connection.create_channel().await?;
        let producer = connection.create_channel().await?;
        Ok(Self {
            config,
            consumer,
            producer,
            shutdown,
            queue: None,
            delivery_loop: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Name of the bound queue once [`setup`](Self::setup) succeeded.
    #[must_use]
    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Declares and binds the queue, then starts the delivery loop.
    ///
    /// # Errors
    ///
    /// Any topology failure is returned as is; callers treat it as fatal.
    pub async fn setup(&mut self, dispatcher: Dispatcher) -> Result<(), RouterError> {
        if self.delivery_loop.is_some() {
            return Err(RouterError::AlreadyStarted(self.config.domain.clone()));
        }
        if dispatcher.domain() != &self.config.domain {
            return Err(RouterError::DomainMismatch {
                expected: self.config.domain.clone(),
                found: dispatcher.domain().clone(),
            });
        }

        let exchange = &self.config.exchange;
        self.consumer.declare_exchange(exchange).await?;
        let queue = self.consumer.declare_queue(None).await?;
        let pattern = BindingPattern::subtree(&self.config.domain);
        self.consumer.bind_queue(&queue, &pattern, exchange).await?;
        let deliveries = self.consumer.consume(&queue).await?;

        info!(
            domain = %self.config.domain,
            queue = %queue,
            pattern = %pattern,
            operations = ?dispatcher.operations(),
            "Router consuming"
        );

        let publisher = Publisher {
            channel: Arc::clone(&self.producer),
            exchange: exchange.clone(),
            outbound: self.config.outbound.clone(),
        };
        self.delivery_loop = Some(tokio::spawn(run_delivery_loop(
            deliveries,
            TracingLayer.layer(dispatcher),
            publisher,
            Arc::clone(&self.shutdown),
        )));
        self.queue = Some(queue);
        Ok(())
    }

    /// Closes both channels and waits for the delivery loop to finish.
    ///
    /// Every step runs even if an earlier one failed; the first error wins.
    ///
    /// # Errors
    ///
    /// Returns the first bus or join error encountered.
    pub async fn stop(mut self) -> Result<(), RouterError> {
        let consumer = self.consumer.close().await;
        let joined = match self.delivery_loop.take() {
            Some(handle) => handle.await,
            None => Ok(()),
        };
        let producer = self.producer.close().await;
        info!(domain = %self.config.domain, "Router stopped");
        consumer?;
        joined?;
        producer?;
        Ok(())
    }
}

/// Publishing half of a router.
struct Publisher {
    channel: Arc<dyn BusChannel>,
    exchange: String,
    outbound: RoutingKey,
}

impl Publisher {
    async fn publish(&self, operation: &str, envelope: Envelope) {
        let routing_key = match self.outbound.child(operation) {
            Ok(key) => key,
            Err(e) => {
                warn!(operation, error = %e, "Cannot derive response routing key");
                return;
            }
        };
        if let Err(e) = self
            .channel
            .publish(&self.exchange, &routing_key, &envelope.into_bytes())
            .await
        {
            warn!(routing_key = %routing_key, error = %e, "Failed to publish response");
        }
    }
}

async fn run_delivery_loop<S>(
    mut deliveries: DeliveryReceiver,
    mut service: S,
    publisher: Publisher,
    shutdown: Arc<ShutdownController>,
) where
    S: Service<Delivery, Response = Dispatched, Error = DispatchError>,
{
    let mut stop = shutdown.shutdown_receiver();
    while shutdown.is_accepting() {
        let delivery = tokio::select! {
            biased;
            _ = stop.changed() => break,
            next = deliveries.recv() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };

        let _guard = shutdown.in_flight_guard();
        let result = match service.ready().await {
            Ok(ready) => ready.call(delivery).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(Dispatched {
                operation,
                envelope,
            }) => publisher.publish(&operation, envelope).await,
            // Already logged by the tracing layer.
            Err(DispatchError::Miss { .. }) => {}
            Err(e) => warn!(error = %e, "Dispatch failed"),
        }
    }
    debug!(outbound = %publisher.outbound, "Delivery loop finished");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bus::faulty::{FaultyBus, Faults};
    use crate::bus::InMemoryBus;
    use crate::service::{handler_fn, DispatcherBuilder, ExerciseGroupHandlers};
    use crate::storage::MemoryStore;
    use crate::traits::ExerciseGroupStore;

    fn key(s: &str) -> RoutingKey {
        RoutingKey::parse(s).unwrap()
    }

    fn config() -> RouterConfig {
        RouterConfig {
            domain: key("trainings.echo"),
            outbound: key("tgbot.echo"),
            exchange: "sport_bot".into(),
        }
    }

    async fn echo(_state: Arc<()>, body: Vec<u8>) -> Envelope {
        Envelope::Success(Some(String::from_utf8_lossy(&body).into_owned()))
    }

    fn echo_dispatcher() -> Dispatcher {
        let mut builder = DispatcherBuilder::new(key("trainings.echo"));
        builder.register("say", handler_fn(Arc::new(()), echo)).unwrap();
        builder.build()
    }

    async fn listener(bus: &InMemoryBus) -> (Arc<dyn BusChannel>, DeliveryReceiver) {
        let channel = bus.create_channel().await.unwrap();
        channel.declare_exchange("sport_bot").await.unwrap();
        let queue = channel.declare_queue(None).await.unwrap();
        channel
            .bind_queue(&queue, &BindingPattern::parse("tgbot.#").unwrap(), "sport_bot")
            .await
            .unwrap();
        let rx = channel.consume(&queue).await.unwrap();
        (channel, rx)
    }

    async fn next(rx: &mut DeliveryReceiver) -> Delivery {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("response within timeout")
            .expect("queue open")
    }

    #[tokio::test]
    async fn answers_on_outbound_key() {
        let bus = InMemoryBus::new();
        let shutdown = Arc::new(ShutdownController::new());
        let mut router = DomainRouter::new(&bus, config(), Arc::clone(&shutdown))
            .await
            .unwrap();
        router.setup(echo_dispatcher()).await.unwrap();
        assert!(router.queue().unwrap().starts_with("amq.gen-"));

        let (client, mut responses) = listener(&bus).await;
        client
            .publish("sport_bot", &key("trainings.echo.say"), b"hi")
            .await
            .unwrap();

        let response = next(&mut responses).await;
        assert_eq!(response.routing_key.as_str(), "tgbot.echo.say");
        assert_eq!(response.body, b"SUCCESS: hi");

        router.stop().await.unwrap();
        assert_eq!(bus.queue_count(), 1);
    }

    #[tokio::test]
    async fn misses_are_dropped_and_loop_keeps_running() {
        let bus = InMemoryBus::new();
        let shutdown = Arc::new(ShutdownController::new());
        let mut router = DomainRouter::new(&bus, config(), shutdown).await.unwrap();
        router.setup(echo_dispatcher()).await.unwrap();
        let (client, mut responses) = listener(&bus).await;

        client
            .publish("sport_bot", &key("trainings.echo.shout"), b"lost")
            .await
            .unwrap();
        client
            .publish("sport_bot", &key("trainings.echo.say"), b"kept")
            .await
            .unwrap();

        let response = next(&mut responses).await;
        assert_eq!(response.body, b"SUCCESS: kept");
        assert!(responses.try_recv().is_err());
        router.stop().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_foreign_dispatcher_and_double_setup() {
        let bus = InMemoryBus::new();
        let shutdown = Arc::new(ShutdownController::new());
        let mut router = DomainRouter::new(&bus, config(), shutdown).await.unwrap();

        let foreign = DispatcherBuilder::new(key("trainings.other")).build();
        assert!(matches!(
            router.setup(foreign).await,
            Err(RouterError::DomainMismatch { .. })
        ));

        router.setup(echo_dispatcher()).await.unwrap();
        assert!(matches!(
            router.setup(echo_dispatcher()).await,
            Err(RouterError::AlreadyStarted(_))
        ));
        router.stop().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_signal_stops_consuming() {
        let bus = InMemoryBus::new();
        let shutdown = Arc::new(ShutdownController::new());
        let mut router = DomainRouter::new(&bus, config(), Arc::clone(&shutdown))
            .await
            .unwrap();
        router.setup(echo_dispatcher()).await.unwrap();
        let (client, mut responses) = listener(&bus).await;

        shutdown.trigger_shutdown();
        assert!(shutdown.wait_for_drain(Duration::from_secs(1)).await);
        // Give the loop a chance to observe the signal.
        tokio::time::sleep(Duration::from_millis(20)).await;

        client
            .publish("sport_bot", &key("trainings.echo.say"), b"late")
            .await
            .unwrap();
        let late = tokio::time::timeout(Duration::from_millis(100), responses.recv()).await;
        assert!(late.is_err(), "no response after shutdown");
        router.stop().await.unwrap();
    }

    #[tokio::test]
    async fn publish_failure_keeps_mutation_and_loop() {
        let bus = InMemoryBus::new();
        let faulty = FaultyBus::new(
            bus.clone(),
            Faults {
                publish: true,
                ..Faults::default()
            },
        );
        let store = Arc::new(MemoryStore::new());
        let mut builder = DispatcherBuilder::new(key("trainings.exgroup"));
        ExerciseGroupHandlers::new(Arc::clone(&store) as Arc<dyn ExerciseGroupStore>)
            .register(&mut builder)
            .unwrap();
        let config = RouterConfig {
            domain: key("trainings.exgroup"),
            outbound: key("tgbot.exgroup"),
            exchange: "sport_bot".into(),
        };
        let mut router = DomainRouter::new(&faulty, config, Arc::new(ShutdownController::new()))
            .await
            .unwrap();
        router.setup(builder.build()).await.unwrap();

        let client = bus.create_channel().await.unwrap();
        for body in [r#"{"user_id":1,"name":"Back"}"#, r#"{"user_id":1,"name":"Legs"}"#] {
            client
                .publish("sport_bot", &key("trainings.exgroup.create"), body.as_bytes())
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while faulty.publish_attempts() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both requests handled");

        assert_eq!(store.find_by_name(1, "Back").await.unwrap().id, 1);
        assert_eq!(store.find_by_user_id(1).await.unwrap().len(), 2);
        router.stop().await.unwrap();
    }
}
