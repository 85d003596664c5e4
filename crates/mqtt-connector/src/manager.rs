//! # Subscription Manager
//!
//! Owns the broker session lifecycle: connect, subscribe to every configured
//! topic filter, feed incoming messages through the ingestion pipeline, and
//! reconnect with exponential backoff when the session is lost.
//!
//! All session work happens on a single task, so messages are applied to the
//! registry in the order the transport delivers them. Stale vehicle sweeps run
//! on the same task.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use fleet::{ChangeFeed, Registry};
use realtime::{ConfigError, Transport, TransportError, TransportEvent};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::ConnectorConfig;
use crate::pipeline::Pipeline;
use crate::stats::StatsSnapshot;

/// Observable state of the broker session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and none being attempted.
    #[default]
    Disconnected,

    /// A session is being opened.
    Connecting,

    /// The broker accepted the session and subscriptions were requested.
    Subscribed,

    /// Waiting `delay` before reconnect attempt number `attempt`.
    Reconnecting { attempt: u32, delay: Duration },

    /// The manager was stopped.
    Stopped,
}

struct Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
    clear_on_stop: bool,
}

/// Keeps the registry fed from a broker subscription.
pub struct SubscriptionManager<T: Transport> {
    transport: Arc<Mutex<T>>,
    pipeline: Pipeline,
    state: Arc<watch::Sender<ConnectionState>>,
    running: Option<Running>,
}

impl<T: Transport> SubscriptionManager<T> {
    /// Create a stopped manager feeding `registry` and publishing to `feed`.
    pub fn new(transport: T, registry: Arc<Registry>, feed: ChangeFeed) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport: Arc::new(Mutex::new(transport)),
            pipeline: Pipeline::new(registry, feed),
            state: Arc::new(state),
            running: None,
        }
    }

    /// Start the session task. Calling `start` on a running manager does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration is unusable. Nothing is
    /// started in that case.
    pub fn start(&mut self, config: ConnectorConfig) -> Result<(), ConfigError> {
        if self.running.is_some() {
            debug!("subscription manager already running");
            return Ok(());
        }
        config.validate()?;

        info!(
            host = %config.broker_host,
            port = config.broker_port,
            client_id = %config.client_id,
            filters = config.topic_filters.len(),
            "starting subscription manager"
        );

        let (shutdown, shutdown_rx) = oneshot::channel();
        let clear_on_stop = config.clear_on_stop;
        let session = Session {
            pipeline: self.pipeline.clone(),
            state: Arc::clone(&self.state),
            backoff: Backoff::new(&config.reconnect),
            sweep: sweep_interval(&config),
            config,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(session.run(Arc::clone(&self.transport)));

        self.running = Some(Running { shutdown, task, clear_on_stop });
        Ok(())
    }

    /// Stop the session task, closing the broker session and cancelling any
    /// pending reconnect. Calling `stop` on a stopped manager does nothing.
    ///
    /// When the manager was started with `clear_on_stop`, every tracked
    /// vehicle is removed and a removal is published for each.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        // an error means the task already exited on its own
        running.shutdown.send(()).unwrap_or_default();
        if let Err(err) = running.task.await {
            error!(monotonic_counter.connector_task_failures = 1, "connector task failed: {err}");
        }

        if running.clear_on_stop {
            let removed = self.pipeline.clear();
            debug!("cleared {removed} vehicles on stop");
        }

        self.state.send_replace(ConnectionState::Stopped);
        info!("subscription manager stopped");
    }

    /// Whether the session task is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|running| !running.task.is_finished())
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every session state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Ingestion counters since the manager was created.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats().snapshot()
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        self.pipeline.registry()
    }
}

fn sweep_interval(config: &ConnectorConfig) -> Option<Interval> {
    config.vehicle_ttl?;
    let start = time::Instant::now() + config.sweep_interval;
    let mut interval = time::interval_at(start, config.sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

enum SessionEnd {
    Shutdown,
    Lost(TransportError),
}

struct Session {
    pipeline: Pipeline,
    state: Arc<watch::Sender<ConnectionState>>,
    backoff: Backoff,
    sweep: Option<Interval>,
    config: ConnectorConfig,
    shutdown: oneshot::Receiver<()>,
}

impl Session {
    async fn run<T: Transport>(mut self, transport: Arc<Mutex<T>>) {
        let mut transport = transport.lock().await;

        loop {
            self.state.send_replace(ConnectionState::Connecting);

            let err = match self.session(&mut *transport).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(err) => err,
            };
            warn!(monotonic_counter.sessions_lost = 1, code = err.code(), "{err}");
            self.state.send_replace(ConnectionState::Disconnected);

            if !self.config.reconnect.enabled {
                info!("reconnect disabled, ending session task");
                break;
            }
            if self.wait_to_reconnect().await.is_break() {
                break;
            }
        }

        if let Err(err) = transport.disconnect().await {
            warn!(code = err.code(), "failed to close session: {err}");
        }
    }

    // Runs one broker session until it is lost or shutdown is requested.
    async fn session<T: Transport>(&mut self, transport: &mut T) -> SessionEnd {
        let options = self.config.connect_options();
        let connected = tokio::select! {
            biased;
            _ = &mut self.shutdown => return SessionEnd::Shutdown,
            result = transport.connect(&options) => result,
        };
        if let Err(err) = connected {
            return SessionEnd::Lost(err);
        }

        let mut accepted = false;
        loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => return SessionEnd::Shutdown,
                event = transport.next_event() => match event {
                    TransportEvent::Connected => {
                        accepted = true;
                        self.on_connected(transport).await;
                    }
                    TransportEvent::Message { topic, payload } => {
                        if let Err(err) = self.pipeline.ingest(&topic, &payload) {
                            warn!(
                                monotonic_counter.decode_errors = 1,
                                topic = %topic,
                                code = err.code(),
                                "dropping message: {err}"
                            );
                        }
                    }
                    TransportEvent::Subscribed { filter, granted: true } => {
                        info!("subscribed to {filter}");
                    }
                    TransportEvent::Subscribed { filter, granted: false } => {
                        warn!(
                            monotonic_counter.subscribe_rejected = 1,
                            "broker rejected subscription to {filter}"
                        );
                    }
                    TransportEvent::Disconnected(cause) => {
                        let cause = cause.unwrap_or_else(|| "session closed by broker".to_string());
                        let err = if accepted {
                            TransportError::Disconnected(cause)
                        } else {
                            TransportError::ConnectFailed(cause)
                        };
                        return SessionEnd::Lost(err);
                    }
                },
                () = tick(&mut self.sweep) => self.evict_stale(),
            }
        }
    }

    async fn on_connected<T: Transport>(&mut self, transport: &mut T) {
        self.backoff.reset();
        self.pipeline.stats().record_connection();
        info!(host = %self.config.broker_host, "connected to broker");

        // one failed filter must not prevent the others
        for filter in &self.config.topic_filters {
            if let Err(err) = transport.subscribe(filter).await {
                warn!(
                    monotonic_counter.subscribe_errors = 1,
                    code = err.code(),
                    "failed to subscribe to {filter}: {err}"
                );
            }
        }

        self.state.send_replace(ConnectionState::Subscribed);
    }

    // Waits out the next backoff delay. Breaks when shutdown is requested.
    async fn wait_to_reconnect(&mut self) -> ControlFlow<()> {
        let delay = self.backoff.next_delay();
        let attempt = self.backoff.attempt();
        self.pipeline.stats().record_reconnect();
        self.state.send_replace(ConnectionState::Reconnecting { attempt, delay });
        info!(monotonic_counter.reconnects = 1, attempt, delay = ?delay, "reconnecting");

        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => return ControlFlow::Break(()),
                () = &mut sleep => return ControlFlow::Continue(()),
                () = tick(&mut self.sweep) => self.evict_stale(),
            }
        }
    }

    fn evict_stale(&self) {
        if let Some(ttl) = self.config.vehicle_ttl {
            self.pipeline.sweep(ttl);
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
