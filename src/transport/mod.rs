//! Chat transport trait: the seam to the external chat-network client
//!
//! A `Transport` owns the provider-specific connection (pairing, auth,
//! sending). `SessionManager` is its only consumer: it calls `connect`
//! and receives lifecycle events through the `TransportEvents` handle,
//! in the order the transport produced them.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub mod memory;
pub mod nats;

/// Lifecycle events emitted by a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum TransportEvent {
    /// A new pairing code is available
    Pairing { payload: String },
    /// The pairing code was accepted
    Authenticated,
    /// The client is ready to send
    Ready,
    /// The connection was lost
    Disconnected { reason: String },
    /// Pairing or stored credentials were rejected
    AuthFailure,
}

/// An address-book entry reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteContact {
    /// Raw serialized address (e.g., `15550001@c.us`)
    pub address: String,

    /// Name saved on the paired account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RemoteContact {
    pub fn new(address: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
        }
    }
}

/// Messages flowing into the session event loop
#[derive(Debug)]
pub(crate) enum Signal {
    /// A connect attempt is starting
    Connecting,
    /// A connect attempt failed before any event was produced
    ConnectFailed { reason: String, retry: bool },
    /// Event produced by the transport
    Event(TransportEvent),
}

/// Handle a transport uses to report lifecycle events
///
/// Cheap to clone. Sending never blocks; it fails only once the session
/// has stopped listening.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    tx: mpsc::UnboundedSender<Signal>,
}

impl TransportEvents {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { tx }
    }

    /// Create a standalone handle and the receiving end of its events
    ///
    /// Useful for driving a transport without a `SessionManager`.
    pub fn channel() -> (Self, TransportEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, TransportEventReceiver { rx })
    }

    /// Report an event; returns false if nobody is listening
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send(Signal::Event(event)).is_ok()
    }

    /// Whether the receiving side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving end of a standalone `TransportEvents` channel
pub struct TransportEventReceiver {
    rx: mpsc::UnboundedReceiver<Signal>,
}

impl TransportEventReceiver {
    /// Next transport event, or `None` once every sender is dropped
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        while let Some(signal) = self.rx.recv().await {
            if let Signal::Event(event) = signal {
                return Some(event);
            }
        }
        None
    }
}

/// Core trait for chat-network clients
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the connection and pairing flow
    ///
    /// Returns once the flow has begun; pairing codes, authentication and
    /// readiness are reported later through `events`. A
    /// `DispatchError::Config` return is fatal and is never retried; any
    /// retryable error is treated as a disconnect.
    async fn connect(&self, events: TransportEvents) -> Result<()>;

    /// Deliver one message to an address
    async fn send_message(&self, address: &str, body: &str) -> Result<()>;

    /// Address book of the paired account
    async fn contacts(&self) -> Result<Vec<RemoteContact>>;

    /// Release the connection
    async fn shutdown(&self) -> Result<()>;

    /// Transport name (e.g., "memory", "nats")
    fn name(&self) -> &str;
}
