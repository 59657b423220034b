//! NATS-bridged chat transport
//!
//! Implements `Transport` for a chat client running as a sidecar process.
//! Lifecycle events arrive on `<prefix>.events`; sends, contact lookups and
//! shutdown are request/reply calls.

mod client;
mod config;
mod sink;

pub use config::NatsTransportConfig;
pub use sink::NatsNotificationSink;

use crate::error::{DispatchError, Result};
use crate::transport::{RemoteContact, Transport, TransportEvent, TransportEvents};
use async_trait::async_trait;
use client::{ContactsReply, SendReply, SendRequest};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// NATS sidecar transport
pub struct NatsTransport {
    config: NatsTransportConfig,

    /// Live connection, replaced on every `connect`
    client: Mutex<Option<async_nats::Client>>,

    /// Task forwarding `<prefix>.events` into the session
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl NatsTransport {
    /// Create a transport; fails fast on invalid configuration
    pub fn new(config: NatsTransportConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client: Mutex::new(None),
            listener: Mutex::new(None),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsTransportConfig {
        &self.config
    }

    async fn client(&self) -> Result<async_nats::Client> {
        self.client
            .lock()
            .await
            .clone()
            .ok_or_else(|| DispatchError::Connection("NATS transport is not connected".to_string()))
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn connect(&self, events: TransportEvents) -> Result<()> {
        let client = client::connect(&self.config).await?;

        let events_subject = self.config.subject("events");
        let mut subscriber = client
            .subscribe(events_subject.clone())
            .await
            .map_err(|e| {
                DispatchError::Connection(format!(
                    "Failed to subscribe to '{}': {}",
                    events_subject, e
                ))
            })?;

        let listener = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<TransportEvent>(&msg.payload) {
                    Ok(event) => {
                        if !events.send(event) {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring malformed transport event");
                    }
                }
            }
            events.send(TransportEvent::Disconnected {
                reason: "event stream closed".to_string(),
            });
        });

        if let Some(previous) = self.listener.lock().await.replace(listener) {
            previous.abort();
        }
        *self.client.lock().await = Some(client.clone());

        // Ask the sidecar to (re)start its pairing flow now that we listen.
        client
            .publish(self.config.subject("connect"), bytes::Bytes::new())
            .await
            .map_err(|e| DispatchError::Connection(format!("Failed to request connect: {}", e)))?;
        client
            .flush()
            .await
            .map_err(|e| DispatchError::Connection(format!("Failed to flush: {}", e)))?;

        tracing::info!(subject = %events_subject, "Listening for transport events");
        Ok(())
    }

    async fn send_message(&self, address: &str, body: &str) -> Result<()> {
        let client = self.client().await?;
        let request = SendRequest {
            address: address.to_string(),
            body: body.to_string(),
        };

        let reply: SendReply =
            client::request_json(&client, self.config.subject("send"), &request)
                .await
                .map_err(|e| DispatchError::Send {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;

        if reply.ok {
            tracing::debug!(address = %address, "Message delivered to sidecar");
            Ok(())
        } else {
            Err(DispatchError::Send {
                address: address.to_string(),
                reason: reply.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }

    async fn contacts(&self) -> Result<Vec<RemoteContact>> {
        let client = self.client().await?;
        let reply: ContactsReply = client::request_json(
            &client,
            self.config.subject("contacts"),
            &serde_json::json!({}),
        )
        .await?;
        Ok(reply.contacts)
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
        }

        let Some(client) = self.client.lock().await.take() else {
            return Ok(());
        };

        if let Err(e) = client
            .publish(self.config.subject("shutdown"), bytes::Bytes::new())
            .await
        {
            tracing::warn!(error = %e, "Failed to notify sidecar of shutdown");
        }
        let _ = client.flush().await;

        tracing::info!("NATS transport shut down");
        Ok(())
    }

    fn name(&self) -> &str {
        "nats"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_config() {
        let bad = NatsTransportConfig {
            subject_prefix: String::new(),
            ..Default::default()
        };
        assert!(matches!(NatsTransport::new(bad), Err(DispatchError::Config(_))));

        let transport = NatsTransport::new(NatsTransportConfig::default()).unwrap();
        assert_eq!(transport.name(), "nats");
    }

    #[tokio::test]
    async fn test_send_before_connect_is_connection_error() {
        let transport = NatsTransport::new(NatsTransportConfig::default()).unwrap();
        let err = transport.send_message("111", "hi").await.unwrap_err();
        assert!(matches!(err, DispatchError::Connection(_)));
    }

    #[tokio::test]
    async fn test_shutdown_without_connection_is_noop() {
        let transport = NatsTransport::new(NatsTransportConfig::default()).unwrap();
        assert!(transport.shutdown().await.is_ok());
    }
}
