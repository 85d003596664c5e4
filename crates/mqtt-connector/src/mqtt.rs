//! MQTT transport backed by `rumqttc`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use realtime::{ConnectOptions, Result, Transport, TransportError, TransportEvent};
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubAck, SubscribeReasonCode,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace};

const CHANNEL_CAPACITY: usize = 1024;
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

type Tracker = Arc<Mutex<SubscriptionTracker>>;

/// Matches SUBACKs to the filters they answer.
///
/// The client queues requests in call order and the event loop assigns packet
/// ids in the same order, so the oldest queued filter belongs to the next
/// outgoing SUBSCRIBE.
#[derive(Debug, Default)]
struct SubscriptionTracker {
    pending: VecDeque<String>,
    requested: HashMap<u16, String>,
}

impl SubscriptionTracker {
    fn queued(&mut self, filter: &str) {
        self.pending.push_back(filter.to_string());
    }

    // The request never reached the event loop.
    fn withdraw(&mut self) {
        self.pending.pop_back();
    }

    fn sent(&mut self, pkid: u16) {
        if let Some(filter) = self.pending.pop_front() {
            self.requested.insert(pkid, filter);
        }
    }

    fn acknowledged(&mut self, ack: &SubAck) -> Option<TransportEvent> {
        let filter = self.requested.remove(&ack.pkid)?;
        let granted =
            ack.return_codes.iter().all(|code| matches!(code, SubscribeReasonCode::Success(_)));
        Some(TransportEvent::Subscribed { filter, granted })
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.requested.clear();
    }
}

fn connack_event(ack: &ConnAck) -> TransportEvent {
    if ack.code == ConnectReturnCode::Success {
        TransportEvent::Connected
    } else {
        TransportEvent::Disconnected(Some(format!("connection refused: {:?}", ack.code)))
    }
}

/// [`Transport`] speaking MQTT 3.1.1 over plain TCP.
///
/// Each `connect` opens a fresh client. The event loop is polled on its own
/// task and events are handed over through a bounded channel.
#[derive(Debug, Default)]
pub struct MqttTransport {
    client: Option<AsyncClient>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    poller: Option<JoinHandle<()>>,
    subscriptions: Tracker,
}

impl MqttTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn abort(&mut self) {
        self.client = None;
        self.events = None;
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Transport for MqttTransport {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<()> {
        self.abort();

        let mut mqtt_options = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt_options.set_keep_alive(options.keep_alive).set_clean_session(true);
        debug!(host = %options.host, port = options.port, "opening mqtt session");

        let (client, eventloop) = AsyncClient::new(mqtt_options, CHANNEL_CAPACITY);
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let poller = tokio::spawn(poll(eventloop, sender, Arc::clone(&self.subscriptions)));

        self.client = Some(client);
        self.events = Some(receiver);
        self.poller = Some(poller);
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str) -> Result<()> {
        let Some(client) = &self.client else {
            return Err(TransportError::SubscribeFailed(format!("no open session for {filter}")));
        };

        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).queued(filter);
        if let Err(err) = client.subscribe(filter, QoS::AtMostOnce).await {
            self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner).withdraw();
            return Err(TransportError::SubscribeFailed(format!("{filter}: {err}")));
        }
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        let Some(events) = self.events.as_mut() else {
            return TransportEvent::Disconnected(Some("no open session".to_string()));
        };
        events.recv().await.unwrap_or(TransportEvent::Disconnected(None))
    }

    async fn disconnect(&mut self) -> Result<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        let result = client
            .try_disconnect()
            .map_err(|err| TransportError::Disconnected(format!("failed to send disconnect: {err}")));

        // let the event loop flush the disconnect packet before tearing it down
        self.events = None;
        if let Some(mut poller) = self.poller.take()
            && time::timeout(DISCONNECT_GRACE, &mut poller).await.is_err()
        {
            trace!("mqtt event loop did not finish in time, aborting");
            poller.abort();
        }
        self.abort();

        result
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

async fn poll(mut eventloop: EventLoop, events: mpsc::Sender<TransportEvent>, tracker: Tracker) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => connack_event(&ack),
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                TransportEvent::Message { topic: publish.topic, payload: publish.payload }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                tracker.lock().unwrap_or_else(PoisonError::into_inner).sent(pkid);
                continue;
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let acknowledged =
                    tracker.lock().unwrap_or_else(PoisonError::into_inner).acknowledged(&ack);
                let Some(event) = acknowledged else {
                    continue;
                };
                event
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                TransportEvent::Disconnected(Some("broker closed the session".to_string()))
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => continue,
            Err(err) => TransportEvent::Disconnected(Some(err.to_string())),
        };

        let closed = matches!(event, TransportEvent::Disconnected(_));
        if events.send(event).await.is_err() {
            trace!("mqtt event receiver dropped");
        }
        if closed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use realtime::TransportEvent;
    use rumqttc::{ConnAck, ConnectReturnCode, QoS, SubAck, SubscribeReasonCode};

    use super::{SubscriptionTracker, connack_event};

    fn suback(pkid: u16, return_codes: Vec<SubscribeReasonCode>) -> SubAck {
        SubAck { pkid, return_codes }
    }

    fn granted(pkid: u16) -> SubAck {
        suback(pkid, vec![SubscribeReasonCode::Success(QoS::AtMostOnce)])
    }

    fn subscribed(filter: &str, granted: bool) -> Option<TransportEvent> {
        Some(TransportEvent::Subscribed { filter: filter.to_string(), granted })
    }

    // Should pair packet ids with filters in the order they were queued.
    #[test]
    fn acks_match_queued_filters() {
        let mut tracker = SubscriptionTracker::default();
        tracker.queued("/hfp/journey/bus/#");
        tracker.queued("/hfp/journey/tram/#");
        tracker.sent(7);
        tracker.sent(8);

        assert_eq!(tracker.acknowledged(&granted(8)), subscribed("/hfp/journey/tram/#", true));
        assert_eq!(tracker.acknowledged(&granted(7)), subscribed("/hfp/journey/bus/#", true));
    }

    // Should ignore acks for packet ids it never sent, or already answered.
    #[test]
    fn unknown_ack() {
        let mut tracker = SubscriptionTracker::default();
        assert_eq!(tracker.acknowledged(&granted(1)), None);

        tracker.queued("/hfp/journey/bus/#");
        tracker.sent(1);
        assert!(tracker.acknowledged(&granted(1)).is_some());
        assert_eq!(tracker.acknowledged(&granted(1)), None);
    }

    // Should report a rejected subscription when the broker returns a failure code.
    #[test]
    fn rejected_subscription() {
        let mut tracker = SubscriptionTracker::default();
        tracker.queued("/hfp/journey/bus/#");
        tracker.sent(3);

        let rejected = suback(3, vec![SubscribeReasonCode::Failure]);
        assert_eq!(tracker.acknowledged(&rejected), subscribed("/hfp/journey/bus/#", false));
    }

    // Should forget a filter whose request never left the client.
    #[test]
    fn withdrawn_filter() {
        let mut tracker = SubscriptionTracker::default();
        tracker.queued("/hfp/journey/bus/#");
        tracker.queued("/hfp/journey/tram/#");
        tracker.withdraw();
        tracker.sent(1);
        tracker.sent(2);

        assert_eq!(tracker.acknowledged(&granted(1)), subscribed("/hfp/journey/bus/#", true));
        assert_eq!(tracker.acknowledged(&granted(2)), None);
    }

    // Should drop every outstanding request on clear.
    #[test]
    fn clear() {
        let mut tracker = SubscriptionTracker::default();
        tracker.queued("/hfp/journey/bus/#");
        tracker.queued("/hfp/journey/tram/#");
        tracker.sent(1);
        tracker.clear();
        tracker.sent(2);

        assert_eq!(tracker.acknowledged(&granted(1)), None);
        assert_eq!(tracker.acknowledged(&granted(2)), None);
    }

    // Should treat only a successful CONNACK as an accepted session.
    #[test]
    fn connack() {
        let accepted = ConnAck { session_present: false, code: ConnectReturnCode::Success };
        assert_eq!(connack_event(&accepted), TransportEvent::Connected);

        let refused = ConnAck { session_present: false, code: ConnectReturnCode::NotAuthorized };
        assert_eq!(
            connack_event(&refused),
            TransportEvent::Disconnected(Some("connection refused: NotAuthorized".to_string()))
        );
    }
}
