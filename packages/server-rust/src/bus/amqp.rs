//! RabbitMQ backend built on `lapin`.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use trainings_core::{BindingPattern, RoutingKey};

use super::{BusChannel, BusConnection, BusError, Delivery, DeliveryReceiver, DELIVERY_BUFFER};

const CONTENT_TYPE: &str = "application/json";
const REPLY_SUCCESS: u16 = 200;

/// Connection to a RabbitMQ broker.
pub struct AmqpConnection {
    connection: Connection,
}

impl AmqpConnection {
    /// Connects to the broker at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Amqp`] when the broker is unreachable or rejects
    /// the credentials.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        info!("Connected to RabbitMQ");
        Ok(Self { connection })
    }
}

#[async_trait]
impl BusConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BusChannel>, BusError> {
        let channel = self.connection.create_channel().await?;
        Ok(Arc::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> Result<(), BusError> {
        self.connection
            .close(REPLY_SUCCESS, "Normal shutdown")
            .await?;
        info!("RabbitMQ connection closed");
        Ok(())
    }
}

/// One AMQP channel.
pub struct AmqpChannel {
    channel: Channel,
}

#[async_trait]
impl BusChannel for AmqpChannel {
    async fn declare_exchange(&self, name: &str) -> Result<(), BusError> {
        self.channel
            .exchange_declare(
                name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        debug!(exchange = name, "Exchange declared");
        Ok(())
    }

    async fn declare_queue(&self, name: Option<&str>) -> Result<String, BusError> {
        let options = match name {
            Some(_) => QueueDeclareOptions::default(),
            None => QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..Default::default()
            },
        };
        let queue = self
            .channel
            .queue_declare(name.unwrap_or_default(), options, FieldTable::default())
            .await?;
        let name = queue.name().as_str().to_string();
        debug!(queue = %name, "Queue declared");
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        pattern: &BindingPattern,
        exchange: &str,
    ) -> Result<(), BusError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                pattern.as_str(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        debug!(queue, exchange, pattern = %pattern, "Queue bound to exchange");
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryReceiver, BusError> {
        let mut consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        let queue = queue.to_string();
        tokio::spawn(async move {
            while let Some(next) = consumer.next().await {
                let delivery = match next {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        warn!(queue = %queue, error = %e, "Consumer stream failed");
                        break;
                    }
                };
                let routing_key = match RoutingKey::parse(delivery.routing_key.as_str()) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(queue = %queue, error = %e, "Skipping delivery with invalid routing key");
                        continue;
                    }
                };
                let forwarded = Delivery {
                    routing_key,
                    body: delivery.data,
                };
                if tx.send(forwarded).await.is_err() {
                    break;
                }
            }
            debug!(queue = %queue, "Consumer stopped");
        });
        Ok(rx)
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &RoutingKey,
        body: &[u8],
    ) -> Result<(), BusError> {
        self.channel
            .basic_publish(
                exchange,
                routing_key.as_str(),
                BasicPublishOptions::default(),
                body,
                BasicProperties::default().with_content_type(CONTENT_TYPE.into()),
            )
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.channel.close(REPLY_SUCCESS, "Normal shutdown").await?;
        Ok(())
    }
}
