//! NATS transport integration tests
//!
//! These tests require a running NATS server:
//!   nats-server
//!
//! Each test plays the chat sidecar itself on a unique subject prefix.
//! Tests are skipped automatically if NATS is not available.

use a3s_dispatch::{
    DispatchConfig, DispatchEngine, FixedJitter, JobStatus, MessageTemplate, NatsNotificationSink,
    NatsTransport, NatsTransportConfig, NotificationSink, Recipient, SessionConfig,
    SessionManager, SessionState, Transport, TransportEvent,
};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

fn test_config(suffix: &str) -> NatsTransportConfig {
    NatsTransportConfig {
        url: "nats://127.0.0.1:4222".to_string(),
        subject_prefix: format!("test.dispatch.{}", suffix),
        request_timeout_secs: 2,
        ..Default::default()
    }
}

/// Try to connect a sidecar client. Returns None if the server is unavailable.
async fn try_sidecar() -> Option<async_nats::Client> {
    match async_nats::connect("nats://127.0.0.1:4222").await {
        Ok(client) => Some(client),
        Err(_) => {
            eprintln!("NATS not available, skipping integration test");
            None
        }
    }
}

/// Connect the sidecar client, or skip the test
macro_rules! sidecar {
    () => {
        match try_sidecar().await {
            Some(c) => c,
            None => return,
        }
    };
}

/// Answer `<prefix>.send` requests; addresses starting with `9` are rejected
fn spawn_send_responder(mut requests: async_nats::Subscriber, client: async_nats::Client) {
    tokio::spawn(async move {
        while let Some(msg) = requests.next().await {
            let request: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
            let address = request["address"].as_str().unwrap_or_default();
            let reply = if address.starts_with('9') {
                serde_json::json!({"ok": false, "error": "number not on network"})
            } else {
                serde_json::json!({"ok": true})
            };
            if let Some(inbox) = msg.reply {
                client
                    .publish(inbox, Bytes::from(reply.to_string()))
                    .await
                    .unwrap();
            }
        }
    });
}

async fn publish_event(client: &async_nats::Client, config: &NatsTransportConfig, event: TransportEvent) {
    client
        .publish(
            config.subject("events"),
            Bytes::from(serde_json::to_vec(&event).unwrap()),
        )
        .await
        .unwrap();
    client.flush().await.unwrap();
}

async fn wait_for(session: &SessionManager, pred: impl Fn(&SessionState) -> bool) {
    let mut states = session.subscribe();
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(state) = states.next().await {
            if pred(&state) {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(found, Ok(true), "session never reached the expected state");
}

#[tokio::test]
async fn test_nats_pairing_and_dispatch() {
    let sidecar = sidecar!();
    let config = test_config("pair");

    let mut connects = sidecar.subscribe(config.subject("connect")).await.unwrap();
    let sends = sidecar.subscribe(config.subject("send")).await.unwrap();
    spawn_send_responder(sends, sidecar.clone());
    sidecar.flush().await.unwrap();

    let session = SessionManager::new(
        NatsTransport::new(config.clone()).unwrap(),
        SessionConfig::default(),
    );
    session.initialize().await.unwrap();
    assert_eq!(session.transport_name(), "nats");

    // The transport announces itself once it listens for events
    tokio::time::timeout(Duration::from_secs(5), connects.next())
        .await
        .unwrap()
        .unwrap();

    publish_event(
        &sidecar,
        &config,
        TransportEvent::Pairing {
            payload: "2@pairing-code".into(),
        },
    )
    .await;
    wait_for(&session, |s| matches!(s, SessionState::AwaitingPairing { qr: Some(_) })).await;
    assert_eq!(session.qr_payload().as_deref(), Some("2@pairing-code"));

    publish_event(&sidecar, &config, TransportEvent::Authenticated).await;
    publish_event(&sidecar, &config, TransportEvent::Ready).await;
    wait_for(&session, SessionState::is_connected).await;

    let engine = DispatchEngine::new(session.clone(), DispatchConfig::default())
        .unwrap()
        .with_jitter(Arc::new(FixedJitter::new(vec![Duration::from_millis(10)])));
    let job = engine
        .submit(
            vec![
                Recipient::new("c-1", "15550001", "Ann"),
                Recipient::new("c-2", "99999999", "Nobody"),
            ],
            MessageTemplate::new("Hi", "<p>NATS works</p>"),
        )
        .unwrap();

    let progress = tokio::time::timeout(Duration::from_secs(10), engine.wait(&job.job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, JobStatus::PartiallyFailed);
    assert_eq!(progress.sent, 1);
    assert_eq!(progress.failed, 1);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_nats_contacts_request() {
    let sidecar = sidecar!();
    let config = test_config("contacts");

    let mut requests = sidecar.subscribe(config.subject("contacts")).await.unwrap();
    let responder = sidecar.clone();
    tokio::spawn(async move {
        while let Some(msg) = requests.next().await {
            let reply = serde_json::json!({
                "contacts": [
                    {"address": "15550001@c.us", "name": "Ann"},
                    {"address": "120363@g.us"}
                ]
            });
            if let Some(inbox) = msg.reply {
                let _ = responder.publish(inbox, Bytes::from(reply.to_string())).await;
            }
        }
    });
    sidecar.flush().await.unwrap();

    let transport = NatsTransport::new(config.clone()).unwrap();
    let (events, _rx) = a3s_dispatch::TransportEvents::channel();
    transport.connect(events).await.unwrap();

    let contacts = transport.contacts().await.unwrap();
    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0].name.as_deref(), Some("Ann"));
    assert!(contacts[1].name.is_none());

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_nats_send_timeout_is_send_failure() {
    let _sidecar = sidecar!();
    let config = test_config("timeout");

    // Nobody answers `<prefix>.send`
    let transport = NatsTransport::new(config).unwrap();
    let (events, _rx) = a3s_dispatch::TransportEvents::channel();
    transport.connect(events).await.unwrap();

    let err = transport.send_message("15550001", "hello").await.unwrap_err();
    assert!(matches!(err, a3s_dispatch::DispatchError::Send { .. }));

    transport.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_nats_notification_sink_publishes() {
    let sidecar = sidecar!();
    let config = test_config("notify");

    let mut notifications = sidecar.subscribe(config.subject("notifications")).await.unwrap();
    sidecar.flush().await.unwrap();

    let sink = NatsNotificationSink::connect(&config).await.unwrap();
    assert_eq!(sink.subject(), "test.dispatch.notify.notifications");
    sink.publish(a3s_dispatch::Notification::session(SessionState::Connected));

    let msg = tokio::time::timeout(Duration::from_secs(5), notifications.next())
        .await
        .unwrap()
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(json["kind"]["type"], "session");
    assert_eq!(json["kind"]["data"]["state"], "connected");
}
