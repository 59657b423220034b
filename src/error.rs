//! Error types for a3s-dispatch

use thiserror::Error;

/// Errors that can occur in the session and dispatch layers
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Invalid configuration (fatal, never retried)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport could not be reached (retryable)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Session is not in the `Connected` state
    #[error("not connected")]
    NotConnected,

    /// Provider-reported send failure
    #[error("Failed to send message to '{address}': {reason}")]
    Send {
        address: String,
        reason: String,
    },

    /// Dispatch submitted without recipients
    #[error("Dispatch has no recipients")]
    EmptyRecipients,

    /// Template renders to a blank message
    #[error("Message body is empty")]
    EmptyMessage,

    /// Dispatch job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Job still has queued recipients
    #[error("Job still running: {0}")]
    JobRunning(String),

    /// Contact group not found
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// Recipient not known to the contact store
    #[error("Unknown recipient: {0}")]
    UnknownRecipient(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl DispatchError {
    /// Whether the session layer may retry after this error
    ///
    /// Configuration errors are fatal; connectivity errors are retried
    /// through the reconnect backoff path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }

    /// Reason string recorded on a failed delivery outcome
    pub fn delivery_reason(&self) -> String {
        match self {
            Self::Send { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;
