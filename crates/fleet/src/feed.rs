//! # Change Feed
//!
//! Fans registry changes out to renderers.
//!
//! Each change is delivered to the listeners registered when it was
//! published, in publication order, and listeners are called in registration
//! order. A listener that subscribes later never sees earlier changes, so the
//! `snapshot()` then `subscribe()` pattern does not replay records already in
//! the snapshot. A listener that fails or panics is logged and skipped for that
//! change only.
//!
//! Delivery runs on a dedicated dispatcher thread, never on the caller's
//! runtime, so a slow listener cannot stall ingestion. The queue is bounded:
//! when it is full the change is dropped and counted. Renderers with their own
//! cadence should use [`ChannelListener`] and drain the channel at their own
//! pace.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;

use anyhow::{Result, anyhow};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

use crate::registry::RegistryChange;

/// Changes that may wait for delivery before new ones are dropped.
pub const DEFAULT_CAPACITY: usize = 65_536;

/// A consumer of registry changes.
pub trait ChangeListener: Send + Sync {
    /// Handle a single change. Errors are logged by the feed and do not affect
    /// other listeners.
    ///
    /// # Errors
    ///
    /// Implementations return an error when they could not process the change.
    fn on_change(&self, change: &RegistryChange) -> Result<()>;
}

impl<F> ChangeListener for F
where
    F: Fn(&RegistryChange) -> Result<()> + Send + Sync,
{
    fn on_change(&self, change: &RegistryChange) -> Result<()> {
        self(change)
    }
}

/// Identifies a listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

type Entry = (SubscriptionHandle, Arc<dyn ChangeListener>);
type Entries = Arc<[Entry]>;

enum Command {
    Deliver { change: RegistryChange, listeners: Entries },
    Flush(oneshot::Sender<()>),
}

struct Shared {
    next_id: AtomicU64,
    dropped: AtomicU64,
    // replaced wholesale on every (un)subscribe; queued changes keep the set
    // they were published to
    entries: RwLock<Entries>,
}

impl Shared {
    fn current(&self) -> Entries {
        Arc::clone(&self.entries.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn replace(&self, update: impl FnOnce(&mut Vec<Entry>)) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = entries.to_vec();
        update(&mut next);
        *entries = next.into();
    }
}

/// Ordered, non-blocking fan-out of registry changes.
///
/// Cloning the feed yields another handle to the same listeners and queue. The
/// dispatcher thread stops once every handle has been dropped.
#[derive(Clone)]
pub struct ChangeFeed {
    shared: Arc<Shared>,
    queue: mpsc::Sender<Command>,
}

impl ChangeFeed {
    /// Create a feed with the default queue capacity.
    ///
    /// # Panics
    ///
    /// Panics when the dispatcher thread cannot be spawned.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a feed holding at most `capacity` undelivered changes.
    ///
    /// # Panics
    ///
    /// Panics when `capacity` is zero or the dispatcher thread cannot be
    /// spawned.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            next_id: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            entries: RwLock::new(Arc::from(Vec::new())),
        });
        let (queue, commands) = mpsc::channel(capacity);
        thread::spawn(move || dispatch(commands));
        Self { shared, queue }
    }

    /// Register a listener. It receives every change published after
    /// registration.
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared.replace(|entries| entries.push((handle, listener)));
        handle
    }

    /// Remove a listener. Returns `false` if the handle was not registered.
    /// Changes published before the call may still be delivered to it.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut removed = false;
        self.shared.replace(|entries| {
            let before = entries.len();
            entries.retain(|(registered, _)| *registered != handle);
            removed = entries.len() != before;
        });
        removed
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.current().len()
    }

    /// Changes dropped because the queue was full or the dispatcher had
    /// stopped.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Queue a change for the listeners registered now. Never blocks.
    pub fn publish(&self, change: RegistryChange) {
        let listeners = self.shared.current();
        if listeners.is_empty() {
            return;
        }

        let reason = match self.queue.try_send(Command::Deliver { change, listeners }) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => "change feed queue is full",
            Err(TrySendError::Closed(_)) => "change feed dispatcher has stopped",
        };
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(monotonic_counter.feed_dropped = 1, "{reason}, dropping change");
    }

    /// Wait until every change published before this call has been delivered.
    pub async fn flush(&self) {
        let (done, delivered) = oneshot::channel();
        if self.queue.send(Command::Flush(done)).await.is_ok() {
            // an error means the dispatcher is gone and there is nothing left to wait for
            delivered.await.unwrap_or_default();
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch(mut commands: mpsc::Receiver<Command>) {
    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::Deliver { change, listeners } => deliver(&listeners, &change),
            Command::Flush(done) => {
                done.send(()).unwrap_or_default();
            }
        }
    }
}

fn deliver(listeners: &[Entry], change: &RegistryChange) {
    for (handle, listener) in listeners {
        match panic::catch_unwind(AssertUnwindSafe(|| listener.on_change(change))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(
                    monotonic_counter.listener_errors = 1,
                    subscription = handle.0,
                    vehicle = %change.vehicle_id(),
                    error = %err,
                    "listener failed to handle change"
                );
            }
            Err(_) => {
                error!(
                    monotonic_counter.listener_panics = 1,
                    subscription = handle.0,
                    vehicle = %change.vehicle_id(),
                    "listener panicked while handling change"
                );
            }
        }
    }
}

/// Forwards every change into a channel, for renderers running on their own
/// task.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<RegistryChange>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RegistryChange>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ChangeListener for ChannelListener {
    fn on_change(&self, change: &RegistryChange) -> Result<()> {
        self.sender.send(change.clone()).map_err(|err| anyhow!("renderer channel closed: {err}"))
    }
}
