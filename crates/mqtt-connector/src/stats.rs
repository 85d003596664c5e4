use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running ingestion counters, shared between the connector task and callers.
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    applied: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
    connections: AtomicU64,
    reconnects: AtomicU64,
}

impl IngestStats {
    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self, count: usize) {
        self.evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at the time [`IngestStats::snapshot`] was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Messages delivered by the transport.
    pub received: u64,
    /// Messages decoded and applied to the registry.
    pub applied: u64,
    /// Messages dropped because they could not be decoded.
    pub dropped: u64,
    /// Vehicles removed for not reporting within the ttl.
    pub evicted: u64,
    /// Successful broker sessions.
    pub connections: u64,
    /// Reconnect attempts scheduled after a lost session.
    pub reconnects: u64,
}
