//! # a3s-dispatch
//!
//! QR-paired chat session management and throttled bulk message dispatch
//! for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-dispatch` keeps exactly one connection to an external chat-network
//! client alive and turns (recipients, template) pairs into independently
//! delayed, individually tracked sends. The chat client sits behind the
//! `Transport` trait, so the same engine runs against an in-memory fake or a
//! NATS-bridged sidecar.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_dispatch::{
//!     DispatchConfig, DispatchEngine, MessageTemplate, Recipient, SessionConfig, SessionManager,
//! };
//! use a3s_dispatch::transport::memory::MemoryTransport;
//!
//! # async fn example() -> a3s_dispatch::Result<()> {
//! let transport = MemoryTransport::restored();
//! let session = SessionManager::new(transport, SessionConfig::default());
//! session.initialize().await?;
//!
//! let engine = DispatchEngine::new(session.clone(), DispatchConfig::default())?;
//! let job = engine.submit(
//!     vec![Recipient::new("c-1", "15550001", "Samuel").with_custom_name("Sam")],
//!     MessageTemplate::new("Hey", "<p>Hi</p>").with_custom_name(true),
//! )?;
//!
//! let progress = engine.progress(&job.job_id)?;
//! println!("{}/{} sent", progress.sent, progress.total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Transports
//!
//! - **memory**: scriptable in-process transport for tests and demos
//! - **nats**: request/reply bridge to a chat client running as a sidecar
//!
//! ## Architecture
//!
//! - **SessionManager**: connection lifecycle, ordered state stream, reconnect backoff
//! - **DispatchEngine**: per-recipient jittered scheduling and delivery tracking
//! - **Scheduler** / **Jitter**: injectable clock and delay source
//! - **ContactStore**: recipients and groups consumed by the engine
//! - **NotificationSink**: fire-and-forget state and progress push

pub mod config;
pub mod contacts;
pub mod dispatch;
pub mod error;
pub mod notify;
pub mod schedule;
pub mod session;
pub mod template;
pub mod transport;
pub mod types;

// Re-export core types
pub use config::{ConsoleConfig, DispatchConfig, SessionConfig};
pub use contacts::{
    sync_from_session, Contact, ContactStore, Group, GroupSummary, MemoryContactStore,
};
pub use dispatch::DispatchEngine;
pub use error::{DispatchError, Result};
pub use notify::{
    ChannelNotificationSink, MemoryNotificationSink, Notification, NotificationKind,
    NotificationSink,
};
pub use schedule::{FixedJitter, Jitter, ManualScheduler, Scheduler, TokioScheduler, UniformJitter};
pub use session::{SessionManager, SessionStateStream};
pub use template::{personalize, strip_markup};
pub use transport::{RemoteContact, Transport, TransportEvent, TransportEvents};
pub use types::{
    normalize_address, DeliveryOutcome, DeliveryState, DispatchJob, JobProgress, JobStatus,
    MessageTemplate, Recipient, SessionState,
};

// Re-export transports for convenience
pub use transport::memory::MemoryTransport;
pub use transport::nats::{NatsNotificationSink, NatsTransport, NatsTransportConfig};
