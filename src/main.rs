//! PeopleSense - Occupancy Sensor Daemon
//!
//! Tracks people by probing their devices and accepting webhook overrides,
//! and publishes per-person and aggregate occupancy sensors.

mod config;
mod db;
mod notify;
mod presence;
mod probe;
mod scheduler;
mod web;

use config::{PresenceConfig, ServerConfig};
use db::Store;
use notify::{FanoutSink, HistorySink, HttpSink};
use presence::Presence;
use probe::SystemProbe;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("peoplesense=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting PeopleSense on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    tracing::info!("Using configuration at {}", cfg.config_path);

    let presence_cfg = PresenceConfig::from_file(&cfg.config_path)?;
    let targets = presence_cfg.targets()?;
    let aggregates = presence_cfg.aggregates();
    tracing::info!("Loaded {} people", targets.len());

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let mut sink = FanoutSink::new().with(Arc::new(HistorySink::new(store.clone())));
    if let Some(url) = &presence_cfg.notify_url {
        tracing::info!("Publishing sensor states to {}", url);
        sink = sink.with(Arc::new(HttpSink::new(url)?));
    }

    let presence = Arc::new(Presence::new(
        targets,
        aggregates,
        store.clone(),
        Arc::new(SystemProbe),
        Arc::new(sink),
    ));
    presence.publish_snapshot();

    // Start scheduler
    let scheduler = Scheduler::new();
    scheduler.start(presence.engines()).await;

    if cfg.webhook_enabled {
        let server = Server::new(cfg, presence.clone(), store);
        server.start(shutdown_signal()).await?;
    } else {
        tracing::info!("Webhook listener disabled");
        shutdown_signal().await;
    }

    scheduler.stop_all().await;
    presence.queue().clear();
    tracing::info!("PeopleSense stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutting down");
}
