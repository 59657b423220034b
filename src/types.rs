//! Core types for the a3s-dispatch system
//!
//! All types use camelCase JSON serialization for wire compatibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A message recipient
///
/// `address` is the provider-specific routing identifier (a normalized
/// phone number for chat networks). Recipients are cloned into a job at
/// submission and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    /// Contact identifier in the contact store
    pub id: String,

    /// Routing address on the chat network
    pub address: String,

    /// Name shown in the address book
    pub display_name: String,

    /// Optional name used when personalizing messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
}

impl Recipient {
    /// Create a recipient without a custom name
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            display_name: display_name.into(),
            custom_name: None,
        }
    }

    /// Set the custom name used for personalization
    pub fn with_custom_name(mut self, custom_name: impl Into<String>) -> Self {
        self.custom_name = Some(custom_name.into());
        self
    }
}

/// Message template personalized per recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplate {
    /// Message body, possibly containing markup from a rich-text editor
    pub raw_body: String,

    /// Greeting placed before the recipient name (e.g., "Hey", "Dear")
    pub salutation: String,

    /// Whether to address recipients by their custom name
    #[serde(default)]
    pub use_custom_name: bool,
}

impl MessageTemplate {
    /// Create a template that does not use custom names
    pub fn new(salutation: impl Into<String>, raw_body: impl Into<String>) -> Self {
        Self {
            raw_body: raw_body.into(),
            salutation: salutation.into(),
            use_custom_name: false,
        }
    }

    /// Address recipients by their custom name
    pub fn with_custom_name(mut self, use_custom_name: bool) -> Self {
        self.use_custom_name = use_custom_name;
        self
    }
}

/// Lifecycle of a dispatch job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    /// Submitted, no send attempted yet while connected
    #[default]
    Pending,
    /// At least one send has run against a connected session
    Running,
    /// Every recipient was sent
    Completed,
    /// Every outcome is terminal and at least one failed
    PartiallyFailed,
}

impl JobStatus {
    /// Whether the job has reached a final status
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyFailed)
    }
}

/// Delivery state of one recipient within a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum DeliveryState {
    /// Scheduled, not yet attempted
    Queued,
    /// Accepted by the transport
    Sent,
    /// Attempt failed; `reason` is kept for diagnostics
    Failed { reason: String },
}

impl DeliveryState {
    /// Sent and Failed are terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued)
    }
}

/// Per-recipient delivery record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    /// Recipient this outcome belongs to
    pub recipient_id: String,

    /// Current delivery state
    #[serde(flatten)]
    pub state: DeliveryState,

    /// When the transport accepted the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl DeliveryOutcome {
    /// A fresh queued outcome
    pub fn queued(recipient_id: impl Into<String>) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            state: DeliveryState::Queued,
            sent_at: None,
        }
    }
}

/// A submitted dispatch job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchJob {
    /// Unique job identifier (job-<uuid>)
    pub job_id: String,

    /// Recipients in submission order
    pub recipients: Vec<Recipient>,

    /// Template the messages were rendered from
    pub template: MessageTemplate,

    /// Submission time
    pub created_at: DateTime<Utc>,

    /// Status at the time this snapshot was taken
    pub status: JobStatus,
}

impl DispatchJob {
    /// Create a pending job with a generated id
    pub fn new(recipients: Vec<Recipient>, template: MessageTemplate) -> Self {
        Self {
            job_id: format!("job-{}", uuid::Uuid::new_v4()),
            recipients,
            template,
            created_at: Utc::now(),
            status: JobStatus::Pending,
        }
    }

    /// Number of recipients
    pub fn total(&self) -> usize {
        self.recipients.len()
    }
}

/// Aggregate progress of a dispatch job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: String,
    pub status: JobStatus,
    pub sent: usize,
    pub failed: usize,
    pub total: usize,

    /// Outcomes in recipient order
    pub per_recipient: Vec<DeliveryOutcome>,

    /// Estimated time until every queued send has fired, in milliseconds
    pub eta_ms: u64,
}

impl JobProgress {
    /// Outcomes still queued
    pub fn queued(&self) -> usize {
        self.total - self.sent - self.failed
    }

    /// Estimated remaining time
    pub fn eta(&self) -> Duration {
        Duration::from_millis(self.eta_ms)
    }
}

/// Connection state of the chat session
///
/// The pairing payload is part of the value: two `AwaitingPairing` states
/// with different payloads are distinct transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum SessionState {
    /// `initialize` has not been called
    #[default]
    Uninitialized,
    /// Waiting for the user to scan a pairing code
    AwaitingPairing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        qr: Option<String>,
    },
    /// Paired, waiting for the transport's ready signal
    Authenticated,
    /// Ready to send
    Connected,
    /// Connection lost or pairing rejected
    Disconnected { reason: String },
}

impl SessionState {
    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::AwaitingPairing { .. } => "awaiting_pairing",
            Self::Authenticated => "authenticated",
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Normalize a raw chat-network address to a bare phone number
///
/// Strips any `@...` routing suffix, whitespace, `+`, `-`, `.` and parentheses.
pub fn normalize_address(raw: &str) -> String {
    let bare = raw.split('@').next().unwrap_or_default();
    bare.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '+' | '-' | '(' | ')' | '.'))
        .collect()
}
