//! NATS sidecar transport configuration

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};

/// Connection settings for the NATS-bridged chat client
///
/// The chat client runs as a sidecar process and talks to this crate over
/// subjects rooted at `subject_prefix`:
///
/// - `<prefix>.events`: lifecycle events published by the sidecar
/// - `<prefix>.connect`: request the sidecar to start (or restart) pairing
/// - `<prefix>.send`: request/reply message delivery
/// - `<prefix>.contacts`: request/reply address book
/// - `<prefix>.shutdown`: log out and release the client
/// - `<prefix>.notifications`: state and progress snapshots for UIs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsTransportConfig {
    /// NATS server URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Root subject shared with the sidecar
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// Optional auth token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Request/reply timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for NatsTransportConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            subject_prefix: default_subject_prefix(),
            token: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl NatsTransportConfig {
    /// Build a full subject under the prefix
    pub fn subject(&self, name: &str) -> String {
        format!("{}.{}", self.subject_prefix, name)
    }

    /// Reject settings that can never connect
    pub fn validate(&self) -> Result<()> {
        const SCHEMES: [&str; 4] = ["nats://", "tls://", "ws://", "wss://"];

        if self.url.trim().is_empty() {
            return Err(DispatchError::Config("NATS url is empty".to_string()));
        }
        if !SCHEMES.iter().any(|s| self.url.starts_with(s)) {
            return Err(DispatchError::Config(format!(
                "Unsupported NATS url scheme: {}",
                self.url
            )));
        }
        if self.subject_prefix.is_empty()
            || self
                .subject_prefix
                .chars()
                .any(|c| c.is_whitespace() || c == '*' || c == '>')
        {
            return Err(DispatchError::Config(format!(
                "Invalid subject prefix: '{}'",
                self.subject_prefix
            )));
        }
        Ok(())
    }
}

fn default_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_subject_prefix() -> String {
    "dispatch".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}
