//! Publishes notifications to `<prefix>.notifications`

use super::client;
use super::config::NatsTransportConfig;
use crate::error::Result;
use crate::notify::{Notification, NotificationSink};
use bytes::Bytes;

/// Notification sink that forwards snapshots over NATS
///
/// Publishing is fire-and-forget: each notification is sent from a
/// spawned task and failures are only logged.
pub struct NatsNotificationSink {
    client: async_nats::Client,
    subject: String,
}

impl NatsNotificationSink {
    /// Connect a dedicated client for notifications
    pub async fn connect(config: &NatsTransportConfig) -> Result<Self> {
        let client = client::connect(config).await?;
        Ok(Self::with_client(client, config))
    }

    /// Reuse an existing client
    pub fn with_client(client: async_nats::Client, config: &NatsTransportConfig) -> Self {
        Self {
            client,
            subject: config.subject("notifications"),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl NotificationSink for NatsNotificationSink {
    fn publish(&self, notification: Notification) {
        let payload = match serde_json::to_vec(&notification) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode notification");
                return;
            }
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(subject = %self.subject, "No runtime available, notification dropped");
            return;
        };

        let client = self.client.clone();
        let subject = self.subject.clone();
        runtime.spawn(async move {
            if let Err(e) = client.publish(subject.clone(), payload).await {
                tracing::warn!(subject = %subject, error = %e, "Failed to publish notification");
            }
        });
    }
}
