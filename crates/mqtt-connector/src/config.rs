use std::env;
use std::time::Duration;

use realtime::{ConfigError, ConnectOptions, invalid_reconnect, invalid_topic};
use uuid::Uuid;
use vehicle_position::VehicleMode;

const DEFAULT_HOST: &str = "mqtt.hsl.fi";
const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TOPIC_PREFIX: &str = "/hfp/journey";

/// Connector configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub topic_filters: Vec<String>,
    pub reconnect: ReconnectPolicy,
    /// Evict vehicles that have not reported for this long. `None` keeps
    /// vehicles until the connector stops.
    pub vehicle_ttl: Option<Duration>,
    pub sweep_interval: Duration,
    /// Publish a removal for every tracked vehicle when the connector stops.
    pub clear_on_stop: bool,
}

impl ConnectorConfig {
    /// Build configuration from the environment, falling back to defaults for
    /// anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let broker_host = env::var("MQTT_HOST").unwrap_or_else(|_| {
            tracing::trace!("MQTT_HOST not set, using default: {}", defaults.broker_host);
            defaults.broker_host.clone()
        });
        let client_id = env::var("MQTT_CLIENT_ID").unwrap_or_else(|_| {
            tracing::trace!("MQTT_CLIENT_ID not set, using default: {}", defaults.client_id);
            defaults.client_id.clone()
        });
        let topic_filters = env_list("MQTT_TOPICS").unwrap_or_else(|| {
            tracing::trace!("MQTT_TOPICS not set, subscribing to every mode");
            defaults.topic_filters.clone()
        });

        let reconnect = ReconnectPolicy {
            enabled: env_bool("RECONNECT_ENABLED", defaults.reconnect.enabled),
            initial_delay: env_millis("RECONNECT_INITIAL_DELAY_MS", defaults.reconnect.initial_delay),
            max_delay: env_millis("RECONNECT_MAX_DELAY_MS", defaults.reconnect.max_delay),
            backoff_multiplier: env_f64(
                "RECONNECT_BACKOFF_MULTIPLIER",
                defaults.reconnect.backoff_multiplier,
            ),
        };

        Self {
            broker_host,
            broker_port: env_parse("MQTT_PORT").unwrap_or(defaults.broker_port),
            client_id,
            keep_alive: env_parse("MQTT_KEEP_ALIVE_SECS")
                .map_or(defaults.keep_alive, Duration::from_secs),
            topic_filters,
            reconnect,
            vehicle_ttl: env_parse("VEHICLE_TTL_SECS").map(Duration::from_secs),
            sweep_interval: env_parse("VEHICLE_SWEEP_INTERVAL_SECS")
                .map_or(defaults.sweep_interval, Duration::from_secs),
            clear_on_stop: env_bool("CLEAR_ON_STOP", defaults.clear_on_stop),
        }
    }

    /// Check the configuration can be used to start the connector.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_host.trim().is_empty() {
            return Err(ConfigError::InvalidBroker("broker host is empty".to_string()));
        }
        if self.broker_port == 0 {
            return Err(ConfigError::InvalidBroker("broker port must be non-zero".to_string()));
        }
        if self.keep_alive < Duration::from_secs(1) {
            return Err(ConfigError::InvalidBroker(
                "keep alive must be at least one second".to_string(),
            ));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::InvalidClientId("client id is empty".to_string()));
        }

        if self.topic_filters.is_empty() {
            return Err(invalid_topic!("at least one topic filter is required"));
        }
        for filter in &self.topic_filters {
            validate_filter(filter)?;
        }

        if let Some(ttl) = self.vehicle_ttl
            && (ttl.is_zero() || self.sweep_interval.is_zero())
        {
            return Err(ConfigError::InvalidEviction(
                "vehicle ttl and sweep interval must be non-zero".to_string(),
            ));
        }

        self.reconnect.validate()
    }

    /// Options for opening a broker session.
    #[must_use]
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            host: self.broker_host.clone(),
            port: self.broker_port,
            client_id: self.client_id.clone(),
            keep_alive: self.keep_alive,
        }
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            broker_host: DEFAULT_HOST.to_string(),
            broker_port: DEFAULT_PORT,
            client_id: format!("live-map-{}", &Uuid::new_v4().simple().to_string()[..12]),
            keep_alive: Duration::from_secs(30),
            topic_filters: VehicleMode::KNOWN
                .iter()
                .map(|mode| format!("{DEFAULT_TOPIC_PREFIX}/{mode}/#"))
                .collect(),
            reconnect: ReconnectPolicy::default(),
            vehicle_ttl: None,
            sweep_interval: Duration::from_secs(10),
            clear_on_stop: true,
        }
    }
}

/// Reconnect behaviour after the broker session is lost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl ReconnectPolicy {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidReconnect`] when the delays or multiplier
    /// are inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay.is_zero() {
            return Err(invalid_reconnect!("initial delay must be non-zero"));
        }
        if self.max_delay < self.initial_delay {
            return Err(invalid_reconnect!(
                "max delay {:?} is shorter than initial delay {:?}",
                self.max_delay,
                self.initial_delay
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid_reconnect!(
                "backoff multiplier must be at least 1, got {}",
                self.backoff_multiplier
            ));
        }
        Ok(())
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

// `#` may only appear as the whole last level, `+` only as a whole level.
fn validate_filter(filter: &str) -> Result<(), ConfigError> {
    if filter.is_empty() {
        return Err(invalid_topic!("topic filter is empty"));
    }

    let levels = filter.split('/').collect::<Vec<_>>();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return Err(invalid_topic!("'#' must be the last level in '{filter}'"));
        }
        if level.contains('+') && *level != "+" {
            return Err(invalid_topic!("'+' must occupy a whole level in '{filter}'"));
        }
    }
    Ok(())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let value = env::var(key).ok()?;
    let entries = value
        .split(',')
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect::<Vec<_>>();
    (!entries.is_empty()).then_some(entries)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|value| value.parse::<f64>().ok()).unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    env_parse(key).map_or(default, Duration::from_millis)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}
