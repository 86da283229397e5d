//! Trainings service process.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use trainings_server::bus::amqp::AmqpConnection;
use trainings_server::bus::BusConnection;
use trainings_server::logging::init_tracing;
use trainings_server::storage::postgres;
use trainings_server::{ServerConfig, ShutdownController, Stores, TrainingService};

async fn open_stores(config: &ServerConfig) -> Result<Stores> {
    let Some(url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set, keeping state in memory");
        return Ok(Stores::in_memory());
    };
    let pool = postgres::connect(url, config.db_max_connections)
        .await
        .context("connecting to PostgreSQL")?;
    postgres::migrate(&pool)
        .await
        .context("creating database schema")?;
    Ok(Stores::postgres(pool))
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();
    init_tracing(config.log_format).context("installing tracing subscriber")?;

    let stores = open_stores(&config).await?;
    let connection = AmqpConnection::connect(&config.amqp_url)
        .await
        .context("connecting to RabbitMQ")?;

    let shutdown = Arc::new(ShutdownController::new());
    let service = TrainingService::start(&connection, &config, stores, Arc::clone(&shutdown))
        .await
        .context("starting routers")?;

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("Shutdown signal received");

    shutdown.trigger_shutdown();
    if !shutdown.wait_for_drain(config.drain_timeout()).await {
        warn!(
            in_flight = shutdown.in_flight_count(),
            "Stopping with handlers still running"
        );
    }
    service.stop().await.context("stopping routers")?;
    connection.close().await.context("closing RabbitMQ connection")?;
    info!("Trainings service stopped");
    Ok(())
}
