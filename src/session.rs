//! Chat session lifecycle manager
//!
//! `SessionManager` owns the single transport connection. Transport events
//! are consumed by one event-loop task, in order, and turned into
//! `SessionState` transitions that are fanned out to every subscriber.
//!
//! ```text
//! Uninitialized -> AwaitingPairing -> Authenticated -> Connected
//!                        ^                                 |
//!                        +---- (fixed backoff) ---- Disconnected
//! ```
//!
//! Auth failures land in `Disconnected("auth_failure")` and take the same
//! backoff path. Only one reconnect can be pending at a time.

use crate::config::SessionConfig;
use crate::error::{DispatchError, Result};
use crate::notify::{Notification, NotificationSink};
use crate::transport::{RemoteContact, Signal, Transport, TransportEvent, TransportEvents};
use crate::types::SessionState;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Stream of session states; the current state is always the first item
pub type SessionStateStream = UnboundedReceiverStream<SessionState>;

/// Current state plus the subscribers to notify on change
#[derive(Default)]
struct StateFeed {
    current: SessionState,
    subscribers: Vec<mpsc::UnboundedSender<SessionState>>,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    sink: Option<Arc<dyn NotificationSink>>,

    feed: Mutex<StateFeed>,

    /// Sender feeding the event loop; `None` until `initialize`
    signals: Mutex<Option<mpsc::UnboundedSender<Signal>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    /// Reconnect tasks that may still be sleeping or connecting
    reconnect_tasks: Mutex<Vec<JoinHandle<()>>>,

    initialized: AtomicBool,
    reconnect_pending: AtomicBool,
    stopped: AtomicBool,
    connect_attempts: AtomicUsize,
}

/// Handle to the chat session
///
/// Cheap to clone; all clones share the same connection and state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Create a session manager around a transport
    pub fn new(transport: impl Transport + 'static, config: SessionConfig) -> Self {
        Self::build(Arc::new(transport), config, None)
    }

    /// Create a session manager that publishes state changes to a sink
    pub fn with_notification_sink(
        transport: impl Transport + 'static,
        config: SessionConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::build(Arc::new(transport), config, Some(sink))
    }

    fn build(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                config,
                sink,
                feed: Mutex::new(StateFeed::default()),
                signals: Mutex::new(None),
                event_loop: Mutex::new(None),
                reconnect_tasks: Mutex::new(Vec::new()),
                initialized: AtomicBool::new(false),
                reconnect_pending: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                connect_attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// Start the connection flow if no connection exists
    ///
    /// Idempotent while a connection is live or being established. On a
    /// `Disconnected` session with no reconnect pending it starts a fresh
    /// connect attempt. Pairing and connectivity problems show up as state
    /// transitions; only fatal configuration errors are returned.
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;

        if inner.stopped.load(Ordering::Acquire) {
            return Err(DispatchError::Config(
                "session has been shut down".to_string(),
            ));
        }
        if inner.initialized.swap(true, Ordering::AcqRel) {
            return self.reconnect_if_idle().await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&inner.signals) = Some(tx);
        let handle = tokio::spawn(run_event_loop(Arc::downgrade(inner), rx));
        if let Some(previous) = lock(&inner.event_loop).replace(handle) {
            previous.abort();
        }

        tracing::info!(transport = inner.transport.name(), "Initializing session");

        match inner.connect_once().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "Initial connect failed, will retry");
                inner.signal(Signal::ConnectFailed {
                    reason: e.to_string(),
                    retry: true,
                });
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Session initialization failed");
                lock(&inner.signals).take();
                inner.stop_event_loop().await;
                inner.publish(SessionState::Disconnected {
                    reason: e.to_string(),
                });
                inner.initialized.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Host-driven reconnect of an initialized but disconnected session
    async fn reconnect_if_idle(&self) -> Result<()> {
        let inner = &self.inner;
        if !matches!(self.current_state(), SessionState::Disconnected { .. }) {
            tracing::debug!("Session already initialized");
            return Ok(());
        }
        if inner
            .reconnect_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Reconnect already pending, initialize is a no-op");
            return Ok(());
        }
        inner.reconnect_pending.store(false, Ordering::Release);

        tracing::info!("Reconnecting disconnected session");
        let result = inner.connect_once().await;
        inner.finish_connect(result)
    }

    /// Snapshot of the current state
    pub fn current_state(&self) -> SessionState {
        lock(&self.inner.feed).current.clone()
    }

    /// Subscribe to state changes
    ///
    /// The current state is delivered first, then every later transition
    /// in order. Drop the stream to unsubscribe.
    pub fn subscribe(&self) -> SessionStateStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut feed = lock(&self.inner.feed);
        let _ = tx.send(feed.current.clone());
        feed.subscribers.push(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Send a message through the transport
    ///
    /// Fails with `NotConnected` unless the session is `Connected` at call
    /// time. Suspends for the transport round-trip.
    pub async fn send_to(&self, address: &str, body: &str) -> Result<()> {
        if !self.current_state().is_connected() {
            return Err(DispatchError::NotConnected);
        }

        self.inner
            .transport
            .send_message(address, body)
            .await
            .map_err(|e| match e {
                DispatchError::Send { .. } | DispatchError::NotConnected => e,
                other => DispatchError::Send {
                    address: address.to_string(),
                    reason: other.to_string(),
                },
            })
    }

    /// Address book of the paired account
    pub async fn fetch_contacts(&self) -> Result<Vec<RemoteContact>> {
        if !self.current_state().is_connected() {
            return Err(DispatchError::NotConnected);
        }
        self.inner.transport.contacts().await
    }

    /// Current pairing payload, if waiting for a scan
    pub fn qr_payload(&self) -> Option<String> {
        match self.current_state() {
            SessionState::AwaitingPairing { qr } => qr,
            _ => None,
        }
    }

    /// Number of transport connect attempts so far
    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Whether a reconnect is scheduled but not yet finished
    pub fn reconnect_pending(&self) -> bool {
        self.inner.reconnect_pending.load(Ordering::Acquire)
    }

    /// Name of the underlying transport
    pub fn transport_name(&self) -> &str {
        self.inner.transport.name()
    }

    /// Stop the session for good
    ///
    /// Cancels any pending reconnect, stops consuming transport events and
    /// releases the transport. The final state is `Disconnected("shutdown")`.
    pub async fn shutdown(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for handle in lock(&inner.reconnect_tasks).drain(..) {
            handle.abort();
        }
        lock(&inner.signals).take();
        inner.stop_event_loop().await;
        inner.reconnect_pending.store(false, Ordering::Release);

        let result = inner.transport.shutdown().await;
        if let Err(ref e) = result {
            tracing::warn!(error = %e, "Transport shutdown failed");
        }

        inner.publish(SessionState::Disconnected {
            reason: "shutdown".to_string(),
        });
        inner.initialized.store(false, Ordering::Release);
        tracing::info!("Session shut down");
        result
    }
}

impl SessionInner {
    /// Replace the current state and notify everyone
    fn publish(&self, state: SessionState) {
        {
            let mut feed = lock(&self.feed);
            feed.current = state.clone();
            feed.subscribers.retain(|tx| tx.send(state.clone()).is_ok());
        }

        tracing::info!(state = state.label(), "Session state changed");

        if let Some(ref sink) = self.sink {
            sink.publish(Notification::session(state));
        }
    }

    fn signal(&self, signal: Signal) {
        let sent = lock(&self.signals)
            .as_ref()
            .map(|tx| tx.send(signal).is_ok())
            .unwrap_or(false);
        if !sent {
            tracing::debug!("Session event loop is not running, signal dropped");
        }
    }

    /// Announce a connect attempt and call the transport
    async fn connect_once(&self) -> Result<()> {
        let tx = lock(&self.signals)
            .clone()
            .ok_or_else(|| DispatchError::Config("session is not initialized".to_string()))?;

        let _ = tx.send(Signal::Connecting);
        let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            transport = self.transport.name(),
            attempt,
            "Connecting to transport"
        );

        self.transport.connect(TransportEvents::new(tx)).await
    }

    /// Abort the event loop and wait until it has really stopped
    ///
    /// A signal being handled on another worker finishes first, so no
    /// transition can be published after this returns.
    async fn stop_event_loop(&self) {
        let handle = lock(&self.event_loop).take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Turn the result of a non-initial connect attempt into signals
    fn finish_connect(&self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "Reconnect failed, will retry");
                self.signal(Signal::ConnectFailed {
                    reason: e.to_string(),
                    retry: true,
                });
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Reconnect failed with fatal error, giving up");
                self.signal(Signal::ConnectFailed {
                    reason: e.to_string(),
                    retry: false,
                });
                Err(e)
            }
        }
    }

    fn handle(self: &Arc<Self>, signal: Signal) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }

        match signal {
            Signal::Connecting => self.publish(SessionState::AwaitingPairing { qr: None }),
            Signal::ConnectFailed { reason, retry } => {
                self.publish(SessionState::Disconnected { reason });
                if retry {
                    self.schedule_reconnect();
                }
            }
            Signal::Event(event) => self.apply(event),
        }
    }

    fn apply(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Pairing { payload } => {
                tracing::info!("Pairing code ready");
                self.publish(SessionState::AwaitingPairing { qr: Some(payload) });
            }
            TransportEvent::Authenticated => self.publish(SessionState::Authenticated),
            TransportEvent::Ready => self.publish(SessionState::Connected),
            TransportEvent::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "Transport disconnected");
                self.publish(SessionState::Disconnected { reason });
                self.schedule_reconnect();
            }
            TransportEvent::AuthFailure => {
                tracing::warn!("Transport authentication failed");
                self.publish(SessionState::Disconnected {
                    reason: "auth_failure".to_string(),
                });
                self.schedule_reconnect();
            }
        }
    }

    /// Reconnect after the fixed backoff, unless one is already pending
    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.config.auto_reconnect || self.stopped.load(Ordering::Acquire) {
            return;
        }
        if self
            .reconnect_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Reconnect already pending, ignoring disconnect");
            return;
        }

        let delay = self.config.reconnect_delay();
        tracing::info!(delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.stopped.load(Ordering::Acquire) {
                return;
            }

            // Disconnects are coalesced only during the backoff. Events from
            // the attempt below may schedule the next reconnect.
            inner.reconnect_pending.store(false, Ordering::Release);
            let result = inner.connect_once().await;
            let _ = inner.finish_connect(result);
        });

        let mut tasks = lock(&self.reconnect_tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

async fn run_event_loop(inner: Weak<SessionInner>, mut rx: mpsc::UnboundedReceiver<Signal>) {
    while let Some(signal) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle(signal);
    }
    tracing::debug!("Session event loop stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
