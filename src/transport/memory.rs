//! In-memory transport for testing and single-process use
//!
//! Scriptable stand-in for a real chat client: it records every message,
//! counts connect attempts, and lets the caller drive the pairing flow
//! (`complete_pairing`, `disconnect`, `emit`) by hand.

use super::{RemoteContact, Transport, TransportEvent, TransportEvents};
use crate::error::{DispatchError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the transport does when `connect` is called
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Emit a fresh pairing code and wait for `complete_pairing`
    #[default]
    Pair,
    /// Behave like a restored session: authenticated and ready at once
    Restore,
    /// Emit nothing
    Idle,
}

/// Failure injected into the next `connect` call
#[derive(Debug, Clone)]
pub enum ConnectFailure {
    /// Misconfiguration, fatal
    Config(String),
    /// Unreachable, retryable
    Connection(String),
}

/// A message accepted by the memory transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub address: String,
    pub body: String,
}

#[derive(Default)]
struct MemoryInner {
    behavior: Mutex<ConnectBehavior>,
    events: Mutex<Option<TransportEvents>>,
    connect_calls: AtomicUsize,
    pairing_codes: AtomicUsize,
    connect_failures: Mutex<VecDeque<ConnectFailure>>,
    sent: Mutex<Vec<SentMessage>>,
    failing: Mutex<HashMap<String, String>>,
    contacts: Mutex<Vec<RemoteContact>>,
    send_latency: Mutex<Duration>,
    shut_down: AtomicBool,
}

/// In-memory transport
///
/// Clones share state, so a test can keep one handle while the
/// `SessionManager` owns another.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<MemoryInner>,
}

impl MemoryTransport {
    /// Transport that requires pairing on every connect
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport with the given connect behavior
    pub fn with_behavior(behavior: ConnectBehavior) -> Self {
        let transport = Self::default();
        *lock(&transport.inner.behavior) = behavior;
        transport
    }

    /// Transport that restores a saved session on every connect
    pub fn restored() -> Self {
        Self::with_behavior(ConnectBehavior::Restore)
    }

    /// Change what subsequent `connect` calls do
    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *lock(&self.inner.behavior) = behavior;
    }

    /// Make the next `connect` call fail
    pub fn fail_next_connect(&self, failure: ConnectFailure) {
        lock(&self.inner.connect_failures).push_back(failure);
    }

    /// Make every send to `address` fail with `reason`
    pub fn fail_address(&self, address: impl Into<String>, reason: impl Into<String>) {
        lock(&self.inner.failing).insert(address.into(), reason.into());
    }

    /// Simulate network round-trip time on each send
    pub fn set_send_latency(&self, latency: Duration) {
        *lock(&self.inner.send_latency) = latency;
    }

    /// Set the address book returned by `contacts`
    pub fn set_contacts(&self, contacts: Vec<RemoteContact>) {
        *lock(&self.inner.contacts) = contacts;
    }

    /// Emit an arbitrary event on the current connection
    pub fn emit(&self, event: TransportEvent) -> bool {
        match lock(&self.inner.events).as_ref() {
            Some(events) => events.send(event),
            None => false,
        }
    }

    /// Simulate the user scanning the pairing code
    pub fn complete_pairing(&self) -> bool {
        self.emit(TransportEvent::Authenticated) && self.emit(TransportEvent::Ready)
    }

    /// Simulate a dropped connection
    pub fn disconnect(&self, reason: impl Into<String>) -> bool {
        self.emit(TransportEvent::Disconnected {
            reason: reason.into(),
        })
    }

    /// Number of `connect` calls so far
    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    /// Messages accepted so far, in send order
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.inner.sent).clone()
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, events: TransportEvents) -> Result<()> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = lock(&self.inner.connect_failures).pop_front() {
            return Err(match failure {
                ConnectFailure::Config(reason) => DispatchError::Config(reason),
                ConnectFailure::Connection(reason) => DispatchError::Connection(reason),
            });
        }

        self.inner.shut_down.store(false, Ordering::SeqCst);
        *lock(&self.inner.events) = Some(events.clone());

        match *lock(&self.inner.behavior) {
            ConnectBehavior::Pair => {
                let n = self.inner.pairing_codes.fetch_add(1, Ordering::SeqCst) + 1;
                events.send(TransportEvent::Pairing {
                    payload: format!("qr-{}", n),
                });
            }
            ConnectBehavior::Restore => {
                events.send(TransportEvent::Authenticated);
                events.send(TransportEvent::Ready);
            }
            ConnectBehavior::Idle => {}
        }

        Ok(())
    }

    async fn send_message(&self, address: &str, body: &str) -> Result<()> {
        let latency = *lock(&self.inner.send_latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.is_shut_down() {
            return Err(DispatchError::Connection("transport shut down".to_string()));
        }

        if let Some(reason) = lock(&self.inner.failing).get(address).cloned() {
            return Err(DispatchError::Send {
                address: address.to_string(),
                reason,
            });
        }

        lock(&self.inner.sent).push(SentMessage {
            address: address.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn contacts(&self) -> Result<Vec<RemoteContact>> {
        Ok(lock(&self.inner.contacts).clone())
    }

    async fn shutdown(&self) -> Result<()> {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        lock(&self.inner.events).take();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
