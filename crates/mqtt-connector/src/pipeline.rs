//! Decode, apply, publish.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use fleet::{ChangeFeed, Registry, RegistryChange};
use tracing::{debug, warn};

use crate::stats::IngestStats;

/// Turns raw broker messages into registry changes.
///
/// Every change the registry produces is published to the feed in the order
/// it was applied.
#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<Registry>,
    feed: ChangeFeed,
    stats: Arc<IngestStats>,
}

impl Pipeline {
    #[must_use]
    pub fn new(registry: Arc<Registry>, feed: ChangeFeed) -> Self {
        Self { registry, feed, stats: Arc::new(IngestStats::default()) }
    }

    /// Decode a message and apply it to the registry.
    ///
    /// # Errors
    ///
    /// Returns the decode error when the message is not a usable vehicle
    /// position report. The registry and feed are left untouched.
    pub fn ingest(&self, topic: &str, payload: &[u8]) -> vehicle_position::Result<RegistryChange> {
        self.stats.record_received();

        let report = match vehicle_position::decode(topic, payload) {
            Ok(report) => report,
            Err(err) => {
                self.stats.record_dropped();
                return Err(err);
            }
        };

        let change = self.registry.upsert(report);
        debug!(
            monotonic_counter.messages_applied = 1,
            vehicle = %change.vehicle_id(),
            kind = change.kind(),
            "applied report"
        );
        self.feed.publish(change.clone());
        self.stats.record_applied();

        Ok(change)
    }

    /// Remove vehicles that have not reported within `ttl` of now.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let Ok(ttl) = TimeDelta::from_std(ttl) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return 0;
        };
        self.sweep_before(cutoff)
    }

    /// Remove vehicles whose last report is older than `cutoff`.
    pub fn sweep_before(&self, cutoff: DateTime<Utc>) -> usize {
        let evicted = self.registry.evict_stale(cutoff);
        let count = evicted.len();
        if count > 0 {
            warn!(monotonic_counter.vehicles_evicted = count, "evicted {count} stale vehicles");
            self.stats.record_evicted(count);
        }
        for record in evicted {
            self.feed.publish(RegistryChange::Removed(record));
        }
        count
    }

    /// Remove every tracked vehicle.
    pub fn clear(&self) -> usize {
        let removed = self.registry.clear();
        let count = removed.len();
        for record in removed {
            self.feed.publish(RegistryChange::Removed(record));
        }
        count
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub const fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeDelta, Utc};
    use fleet::{ChangeFeed, ChannelListener, Registry};

    use super::Pipeline;

    const TOPIC: &str = "/hfp/journey/tram/1";

    fn payload(veh: &str) -> Vec<u8> {
        format!(r#"{{"VP":{{"veh":"{veh}","lat":60.17,"long":24.94,"desi":"9"}}}}"#).into_bytes()
    }

    // Should apply a decoded report and publish the resulting change.
    #[tokio::test]
    async fn ingest() {
        let feed = ChangeFeed::new();
        let (listener, mut changes) = ChannelListener::new();
        feed.subscribe(Arc::new(listener));
        let pipeline = Pipeline::new(Arc::new(Registry::new()), feed.clone());

        let change = pipeline.ingest(TOPIC, &payload("T1")).expect("should ingest");
        assert_eq!(change.kind(), "added");
        feed.flush().await;

        let published = changes.try_recv().expect("should publish change");
        assert_eq!(published, change);
        assert_eq!(pipeline.registry().len(), 1);

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.applied, 1);
    }

    // Should drop malformed messages without touching the registry.
    #[tokio::test]
    async fn ingest_malformed() {
        let feed = ChangeFeed::new();
        let (listener, mut changes) = ChannelListener::new();
        feed.subscribe(Arc::new(listener));
        let pipeline = Pipeline::new(Arc::new(Registry::new()), feed.clone());

        let err = pipeline.ingest(TOPIC, b"not json").expect_err("should fail to decode");
        assert_eq!(err.code(), "malformed_payload");
        feed.flush().await;

        assert!(changes.try_recv().is_err());
        assert!(pipeline.registry().is_empty());
        assert_eq!(pipeline.stats().snapshot().dropped, 1);
    }

    // Should publish a removal for every evicted vehicle.
    #[tokio::test]
    async fn sweep_before() {
        let feed = ChangeFeed::new();
        let (listener, mut changes) = ChannelListener::new();
        let pipeline = Pipeline::new(Arc::new(Registry::new()), feed.clone());

        pipeline.ingest(TOPIC, &payload("T1")).expect("should ingest");
        pipeline.ingest(TOPIC, &payload("T2")).expect("should ingest");
        feed.subscribe(Arc::new(listener));

        assert_eq!(pipeline.sweep_before(Utc::now() - TimeDelta::hours(1)), 0);
        assert_eq!(pipeline.sweep_before(Utc::now() + TimeDelta::seconds(1)), 2);
        feed.flush().await;

        let first = changes.try_recv().expect("should publish removal");
        let second = changes.try_recv().expect("should publish removal");
        assert_eq!((first.kind(), first.vehicle_id()), ("removed", "T1"));
        assert_eq!((second.kind(), second.vehicle_id()), ("removed", "T2"));
        assert_eq!(pipeline.stats().snapshot().evicted, 2);
    }

    // Should remove every vehicle on clear.
    #[tokio::test]
    async fn clear() {
        let feed = ChangeFeed::new();
        let pipeline = Pipeline::new(Arc::new(Registry::new()), feed.clone());
        pipeline.ingest(TOPIC, &payload("T1")).expect("should ingest");

        assert_eq!(pipeline.clear(), 1);
        assert!(pipeline.registry().is_empty());
        assert_eq!(pipeline.clear(), 0);
    }
}
