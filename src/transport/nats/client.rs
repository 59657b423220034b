//! NATS connection helpers and sidecar wire types

use super::config::NatsTransportConfig;
use crate::error::{DispatchError, Result};
use crate::transport::RemoteContact;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Body of a `<prefix>.send` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendRequest {
    pub address: String,
    pub body: String,
}

/// Sidecar reply to a `<prefix>.send` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sidecar reply to a `<prefix>.contacts` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContactsReply {
    #[serde(default)]
    pub contacts: Vec<RemoteContact>,
}

/// Connect to NATS, classifying failures as fatal or retryable
pub(crate) async fn connect(config: &NatsTransportConfig) -> Result<async_nats::Client> {
    config.validate()?;

    let client = build_connect_options(config)
        .connect(&config.url)
        .await
        .map_err(|e| classify_connect_error(&config.url, e))?;

    tracing::info!(url = %config.url, "Connected to NATS");
    Ok(client)
}

/// Issue a JSON request and decode the JSON reply
pub(crate) async fn request_json<Req, Resp>(
    client: &async_nats::Client,
    subject: String,
    request: &Req,
) -> Result<Resp>
where
    Req: Serialize,
    Resp: for<'de> Deserialize<'de>,
{
    let payload = Bytes::from(serde_json::to_vec(request)?);
    let reply = client
        .request(subject.clone(), payload)
        .await
        .map_err(|e| match e.kind() {
            async_nats::RequestErrorKind::TimedOut => {
                DispatchError::Timeout(format!("request to '{}' timed out", subject))
            }
            _ => DispatchError::Connection(format!("request to '{}' failed: {}", subject, e)),
        })?;

    Ok(serde_json::from_slice(&reply.payload)?)
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsTransportConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}

fn classify_connect_error(url: &str, err: async_nats::ConnectError) -> DispatchError {
    use async_nats::ConnectErrorKind;

    match err.kind() {
        ConnectErrorKind::ServerParse
        | ConnectErrorKind::Authentication
        | ConnectErrorKind::AuthorizationViolation => {
            DispatchError::Config(format!("{}: {}", url, err))
        }
        _ => DispatchError::Connection(format!("{}: {}", url, err)),
    }
}
