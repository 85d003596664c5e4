//! # Provider
//!
//! Provider defines the external transport interface for the crate.

use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// Options used to open a broker session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
}

/// Signals raised by a transport while a session is open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker accepted the session.
    Connected,

    /// A message was published on a subscribed topic.
    Message { topic: String, payload: Bytes },

    /// The broker answered a subscribe request for `filter`.
    Subscribed { filter: String, granted: bool },

    /// The session ended, with the cause when it was not requested.
    Disconnected(Option<String>),
}

/// The `Transport` trait defines the publish/subscribe client behavior the
/// connector relies on.
///
/// A transport is driven by a single task: `connect` opens a session, events
/// are pulled with `next_event` until a `Disconnected` event is returned, and
/// `disconnect` closes the session gracefully.
pub trait Transport: Send + 'static {
    /// Open a new session. Session outcome is reported through `next_event`.
    fn connect(&mut self, options: &ConnectOptions) -> impl Future<Output = Result<()>> + Send;

    /// Request a subscription to `filter`. Does not wait for the broker to
    /// acknowledge.
    fn subscribe(&mut self, filter: &str) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next session event. Must be cancel safe.
    fn next_event(&mut self) -> impl Future<Output = TransportEvent> + Send;

    /// Close the current session, if any.
    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;
}
