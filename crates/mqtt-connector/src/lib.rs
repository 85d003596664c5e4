//! # MQTT Connector
//!
//! Keeps the vehicle registry fed from the transit operator's MQTT broker.
//!
//! The [`SubscriptionManager`] drives any [`realtime::Transport`]; the
//! production transport is [`MqttTransport`].

mod backoff;
mod config;
mod manager;
mod mqtt;
mod pipeline;
mod stats;

pub use self::backoff::Backoff;
pub use self::config::{ConnectorConfig, ReconnectPolicy};
pub use self::manager::{ConnectionState, SubscriptionManager};
pub use self::mqtt::MqttTransport;
pub use self::pipeline::Pipeline;
pub use self::stats::{IngestStats, StatsSnapshot};
