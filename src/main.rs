//! # Live Map
//!
//! Headless live vehicle map: subscribes to the operator's vehicle position
//! feed, keeps the latest position of every vehicle, and renders changes to
//! the log until interrupted.

mod logging;
mod renderer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet::{ChangeFeed, Registry};
use mqtt_connector::{ConnectorConfig, MqttTransport, SubscriptionManager};
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

use crate::renderer::LogRenderer;

const SUMMARY_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    logging::init()?;

    let config = ConnectorConfig::from_env();
    let registry = Arc::new(Registry::new());
    let feed = ChangeFeed::new();
    feed.subscribe(Arc::new(LogRenderer));

    let mut manager =
        SubscriptionManager::new(MqttTransport::new(), Arc::clone(&registry), feed.clone());
    manager.start(config).context("starting subscription manager")?;

    let mut summary = time::interval_at(time::Instant::now() + SUMMARY_INTERVAL, SUMMARY_INTERVAL);
    summary.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("waiting for shutdown signal")?;
                break;
            }
            _ = summary.tick() => {
                let counts = renderer::summarize(&registry.snapshot());
                info!(state = ?manager.state(), "tracking {counts}");
            }
        }
    }

    info!("shutting down");
    manager.stop().await;
    feed.flush().await;

    let stats = manager.stats();
    info!(
        received = stats.received,
        applied = stats.applied,
        dropped = stats.dropped,
        evicted = stats.evicted,
        connections = stats.connections,
        reconnects = stats.reconnects,
        "live map stopped"
    );
    Ok(())
}
