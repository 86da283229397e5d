//! The trainings service: one router per domain over shared stores.

use std::sync::Arc;

use tracing::{error, info};
use trainings_core::RoutingKey;

use crate::bus::BusConnection;
use crate::lifecycle::ShutdownController;
use crate::router::{DomainRouter, RouterConfig, RouterError};
use crate::service::{
    exgroup, training, DispatchError, DispatcherBuilder, ExerciseGroupHandlers, ServerConfig,
    TrainingHandlers,
};
use crate::storage::MemoryStore;
use crate::traits::{ExerciseGroupStore, TrainingStore};

/// Store handles injected into the handlers.
#[derive(Clone)]
pub struct Stores {
    pub exercise_groups: Arc<dyn ExerciseGroupStore>,
    pub trainings: Arc<dyn TrainingStore>,
}

impl Stores {
    /// Both domains backed by one [`MemoryStore`].
    #[must_use]
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            exercise_groups: Arc::clone(&store) as Arc<dyn ExerciseGroupStore>,
            trainings: store,
        }
    }

    /// Both domains backed by `PostgreSQL` through one pool.
    #[cfg(feature = "postgres")]
    #[must_use]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        use crate::storage::postgres::{PgExerciseGroupStore, PgTrainingStore};
        Self {
            exercise_groups: Arc::new(PgExerciseGroupStore::new(pool.clone())),
            trainings: Arc::new(PgTrainingStore::new(pool)),
        }
    }
}

/// Running `exgroup` and `training` routers.
pub struct TrainingService {
    routers: Vec<DomainRouter>,
}

impl TrainingService {
    /// Sets up every domain router and marks the service ready.
    ///
    /// If the second router fails, the first one is stopped before the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] for invalid prefixes and any bus failure during
    /// setup.
    pub async fn start(
        connection: &dyn BusConnection,
        config: &ServerConfig,
        stores: Stores,
        shutdown: Arc<ShutdownController>,
    ) -> Result<Self, RouterError> {
        let inbound = RoutingKey::parse(&config.inbound_prefix)?;
        let outbound = RoutingKey::parse(&config.outbound_prefix)?;
        let domain_config = |domain: &str| -> Result<RouterConfig, RouterError> {
            Ok(RouterConfig {
                domain: inbound.child(domain)?,
                outbound: outbound.child(domain)?,
                exchange: config.exchange.clone(),
            })
        };

        let exgroups = ExerciseGroupHandlers::new(stores.exercise_groups);
        let exgroup_router = start_router(
            connection,
            domain_config(exgroup::DOMAIN)?,
            |builder| exgroups.register(builder),
            Arc::clone(&shutdown),
        )
        .await?;

        let trainings = TrainingHandlers::new(stores.trainings);
        let started = match domain_config(training::DOMAIN) {
            Ok(router_config) => {
                start_router(
                    connection,
                    router_config,
                    |builder| trainings.register(builder),
                    Arc::clone(&shutdown),
                )
                .await
            }
            Err(e) => Err(e),
        };
        let training_router = match started {
            Ok(router) => router,
            Err(e) => {
                error!(domain = training::DOMAIN, error = %e, "Router setup failed");
                if let Err(stop_err) = exgroup_router.stop().await {
                    error!(error = %stop_err, "Router stop failed");
                }
                return Err(e);
            }
        };
        let routers = vec![exgroup_router, training_router];

        shutdown.set_ready();
        info!(
            exchange = %config.exchange,
            inbound = %inbound,
            outbound = %outbound,
            "Trainings service started"
        );
        Ok(Self { routers })
    }

    /// Queue names of the running routers, in setup order.
    #[must_use]
    pub fn queues(&self) -> Vec<&str> {
        self.routers.iter().filter_map(DomainRouter::queue).collect()
    }

    /// Stops every router.
    ///
    /// # Errors
    ///
    /// Returns the first router error; the remaining routers are still stopped.
    pub async fn stop(self) -> Result<(), RouterError> {
        let mut first = None;
        for router in self.routers {
            if let Err(e) = router.stop().await {
                error!(error = %e, "Router stop failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

async fn start_router<F>(
    connection: &dyn BusConnection,
    config: RouterConfig,
    register: F,
    shutdown: Arc<ShutdownController>,
) -> Result<DomainRouter, RouterError>
where
    F: FnOnce(&mut DispatcherBuilder) -> Result<(), DispatchError>,
{
    let domain = config.domain.clone();
    let mut builder = DispatcherBuilder::new(domain.clone());
    register(&mut builder)?;
    let mut router = DomainRouter::new(connection, config, shutdown).await?;
    if let Err(e) = router.setup(builder.build()).await {
        if let Err(stop_err) = router.stop().await {
            error!(domain = %domain, error = %stop_err, "Router stop failed");
        }
        return Err(e);
    }
    Ok(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use trainings_core::{BindingPattern, Envelope, ExerciseGroup};

    use super::*;
    use crate::bus::faulty::{FaultyBus, Faults};
    use crate::bus::{BusChannel, BusError, DeliveryReceiver, InMemoryBus};
    use crate::lifecycle::HealthState;

    /// Stands in for the bot: publishes requests, listens on `tgbot.#`.
    struct Bot {
        channel: Arc<dyn BusChannel>,
        responses: DeliveryReceiver,
    }

    impl Bot {
        async fn connect(bus: &InMemoryBus) -> Self {
            let channel = bus.create_channel().await.unwrap();
            channel.declare_exchange("sport_bot").await.unwrap();
            let queue = channel.declare_queue(None).await.unwrap();
            channel
                .bind_queue(&queue, &BindingPattern::parse("tgbot.#").unwrap(), "sport_bot")
                .await
                .unwrap();
            let responses = channel.consume(&queue).await.unwrap();
            Self { channel, responses }
        }

        async fn send(&self, routing_key: &str, body: &str) {
            self.channel
                .publish(
                    "sport_bot",
                    &RoutingKey::parse(routing_key).unwrap(),
                    body.as_bytes(),
                )
                .await
                .unwrap();
        }

        /// Sends one request and returns `(response routing key, envelope)`.
        async fn call(&mut self, routing_key: &str, body: &str) -> (String, Envelope) {
            self.send(routing_key, body).await;
            let delivery = tokio::time::timeout(Duration::from_secs(2), self.responses.recv())
                .await
                .expect("response within timeout")
                .expect("response queue open");
            let text = String::from_utf8(delivery.body).unwrap();
            (
                delivery.routing_key.to_string(),
                Envelope::parse(&text).unwrap(),
            )
        }

        async fn reply(&mut self, routing_key: &str, body: &str) -> String {
            self.call(routing_key, body).await.1.to_string()
        }
    }

    async fn running() -> (InMemoryBus, TrainingService, Bot, Arc<ShutdownController>) {
        let bus = InMemoryBus::new();
        let shutdown = Arc::new(ShutdownController::new());
        let service = TrainingService::start(
            &bus,
            &ServerConfig::default(),
            Stores::in_memory(),
            Arc::clone(&shutdown),
        )
        .await
        .unwrap();
        let bot = Bot::connect(&bus).await;
        (bus, service, bot, shutdown)
    }

    #[tokio::test]
    async fn start_binds_one_queue_per_domain() {
        let (_bus, service, _bot, shutdown) = running().await;
        assert_eq!(service.queues().len(), 2);
        assert_eq!(shutdown.health_state(), HealthState::Ready);
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn create_answers_with_first_id() {
        let (_bus, service, mut bot, _) = running().await;
        let (key, envelope) = bot
            .call("trainings.exgroup.create", r#"{"user_id":1,"name":"Back"}"#)
            .await;
        assert_eq!(key, "tgbot.exgroup.create");
        assert_eq!(envelope.to_string(), "SUCCESS: id:1");

        let (_, found) = bot
            .call("trainings.exgroup.find", r#"{"user_id":1,"name":"Back"}"#)
            .await;
        let group: ExerciseGroup = serde_json::from_str(found.detail().unwrap()).unwrap();
        assert_eq!((group.id, group.user_id, group.name.as_str()), (1, 1, "Back"));
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn delete_of_missing_group() {
        let (_bus, service, mut bot, _) = running().await;
        let (key, envelope) = bot
            .call("trainings.exgroup.delete", r#"{"user_id":2,"name":"Unexisting"}"#)
            .await;
        assert_eq!(key, "tgbot.exgroup.delete");
        assert_eq!(envelope.to_string(), "ERROR: no rows deleted");
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn delete_then_find() {
        let (_bus, service, mut bot, _) = running().await;
        bot.reply("trainings.exgroup.create", r#"{"user_id":2,"name":"Back"}"#)
            .await;
        assert_eq!(
            bot.reply("trainings.exgroup.delete", r#"{"user_id":2,"name":"Back"}"#)
                .await,
            "SUCCESS"
        );
        assert_eq!(
            bot.reply("trainings.exgroup.find", r#"{"user_id":2,"name":"Back"}"#)
                .await,
            "ERROR: no rows in result set"
        );
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn finish_without_open_training() {
        let (_bus, service, mut bot, _) = running().await;
        let (key, envelope) = bot.call("trainings.training.finish", r#"{"user_id":1}"#).await;
        assert_eq!(key, "tgbot.training.finish");
        assert_eq!(
            envelope.to_string(),
            "ERROR: error finishing training: Empty non-finished trainings list"
        );
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn training_session_round_trip() {
        let (_bus, service, mut bot, _) = running().await;
        assert_eq!(
            bot.reply("trainings.training.start", r#"{"user_id":1}"#).await,
            "SUCCESS: id:1"
        );
        assert_eq!(
            bot.reply("trainings.training.finish", r#"{"user_id":1}"#).await,
            "SUCCESS"
        );
        let (key, envelope) = bot.call("trainings.training.get", r#"{"user_id":1}"#).await;
        assert_eq!(key, "tgbot.training.get");
        let listed: Vec<serde_json::Value> =
            serde_json::from_str(envelope.detail().unwrap()).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0]["finish"].is_null());
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn wrong_input_for_every_operation() {
        let (_bus, service, mut bot, _) = running().await;
        let cases = [
            ("trainings.exgroup.create", r#"{"user_id":1}"#),
            ("trainings.exgroup.delete", "{not json"),
            ("trainings.exgroup.find", r#"{"name":"Back"}"#),
            ("trainings.exgroup.update", r#"{"user_id":2,"name":"Back"}"#),
            ("trainings.exgroup.findByUser", r#"{"extra":true}"#),
            ("trainings.training.start", "{}"),
            ("trainings.training.finish", r#"{"user_id":0}"#),
            ("trainings.training.get", ""),
        ];
        for (routing_key, body) in cases {
            let (key, envelope) = bot.call(routing_key, body).await;
            assert_eq!(key, routing_key.replacen("trainings", "tgbot", 1));
            assert_eq!(envelope.to_string(), "ERROR: wrong input", "{routing_key}");
        }
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn array_body_does_not_start_training() {
        let (_bus, service, mut bot, _) = running().await;
        assert_eq!(
            bot.reply("trainings.training.start", "[1]").await,
            "ERROR: wrong input"
        );
        assert_eq!(
            bot.reply("trainings.exgroup.create", r#"[1,"Back"]"#).await,
            "ERROR: wrong input"
        );
        assert_eq!(
            bot.reply("trainings.training.get", r#"{"user_id":1}"#).await,
            "SUCCESS: []"
        );
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn find_by_user_returns_three_groups() {
        let (_bus, service, mut bot, _) = running().await;
        for name in ["Back", "Front", "Chest"] {
            bot.reply(
                "trainings.exgroup.create",
                &format!(r#"{{"user_id":1,"name":"{name}"}}"#),
            )
            .await;
        }
        let (key, envelope) = bot
            .call("trainings.exgroup.findByUser", r#"{"user_id":1}"#)
            .await;
        assert_eq!(key, "tgbot.exgroup.findByUser");
        let groups: Vec<ExerciseGroup> = serde_json::from_str(envelope.detail().unwrap()).unwrap();
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.user_id == 1));
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn repeated_rename() {
        let (_bus, service, mut bot, _) = running().await;
        bot.reply("trainings.exgroup.create", r#"{"user_id":2,"name":"Back"}"#)
            .await;
        let rename = r#"{"user_id":2,"name":"Back","newname":"NewBack"}"#;
        assert_eq!(bot.reply("trainings.exgroup.update", rename).await, "SUCCESS");
        assert_eq!(
            bot.reply("trainings.exgroup.update", rename).await,
            "ERROR: no rows updated"
        );
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_operation_gets_no_response() {
        let (_bus, service, mut bot, _) = running().await;
        bot.send("trainings.exgroup.explode", "{}").await;
        bot.send("trainings.exgroup.create.nested", "{}").await;
        // Same queue, so the miss is processed before this request.
        let (key, _) = bot
            .call("trainings.exgroup.findByUser", r#"{"user_id":1}"#)
            .await;
        assert_eq!(key, "tgbot.exgroup.findByUser");
        assert!(bot.responses.try_recv().is_err());
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_removes_router_queues() {
        let (bus, service, _bot, _) = running().await;
        assert_eq!(bus.queue_count(), 3);
        service.stop().await.unwrap();
        assert_eq!(bus.queue_count(), 1);
    }

    #[tokio::test]
    async fn invalid_prefix_fails_start() {
        let bus = InMemoryBus::new();
        let config = ServerConfig {
            inbound_prefix: "trainings.#".into(),
            ..ServerConfig::default()
        };
        let result = TrainingService::start(
            &bus,
            &config,
            Stores::in_memory(),
            Arc::new(ShutdownController::new()),
        )
        .await;
        assert!(matches!(result, Err(RouterError::Routing(_))));
        assert_eq!(bus.queue_count(), 0);
    }

    #[tokio::test]
    async fn failed_setup_closes_channels_and_keeps_setup_error() {
        let bus = InMemoryBus::new();
        let faulty = FaultyBus::new(
            bus.clone(),
            Faults {
                declare_exchange: true,
                close: true,
                ..Faults::default()
            },
        );
        let shutdown = Arc::new(ShutdownController::new());
        let result = TrainingService::start(
            &faulty,
            &ServerConfig::default(),
            Stores::in_memory(),
            Arc::clone(&shutdown),
        )
        .await;

        assert!(matches!(
            result,
            Err(RouterError::Bus(BusError::ChannelClosed))
        ));
        assert_eq!(faulty.close_attempts(), 2);
        assert_eq!(bus.queue_count(), 0);
        assert_ne!(shutdown.health_state(), HealthState::Ready);
    }
}
