//! Dispatch integration tests
//!
//! End-to-end tests driving SessionManager + DispatchEngine with the
//! in-memory transport on tokio's paused clock. Covers the pairing flow,
//! throttled delivery, session loss mid-job, reconnects, contact groups,
//! and notifications.

use a3s_dispatch::{
    sync_from_session, DeliveryState, DispatchConfig, DispatchEngine, DispatchError, FixedJitter,
    JobStatus, MemoryContactStore, MemoryNotificationSink, MemoryTransport, MessageTemplate,
    NotificationKind, Recipient, RemoteContact, SessionConfig, SessionManager, SessionState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

async fn wait_for(session: &SessionManager, pred: impl Fn(&SessionState) -> bool) {
    let mut states = session.subscribe();
    while let Some(state) = states.next().await {
        if pred(&state) {
            return;
        }
    }
    panic!("session state stream ended");
}

async fn connected_session(transport: &MemoryTransport) -> SessionManager {
    let session = SessionManager::new(transport.clone(), SessionConfig::default());
    session.initialize().await.unwrap();
    wait_for(&session, SessionState::is_connected).await;
    session
}

fn recipients(count: usize) -> Vec<Recipient> {
    (1..=count)
        .map(|i| {
            Recipient::new(format!("c-{}", i), format!("1555000{}", i), format!("Person {}", i))
                .with_custom_name(format!("P{}", i))
        })
        .collect()
}

// ─── Pairing & Delivery ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_pair_then_dispatch_with_default_jitter() {
    let transport = MemoryTransport::new();
    let session = SessionManager::new(transport.clone(), SessionConfig::default());
    session.initialize().await.unwrap();

    wait_for(&session, |s| matches!(s, SessionState::AwaitingPairing { qr: Some(_) })).await;
    assert_eq!(session.qr_payload().as_deref(), Some("qr-1"));
    transport.complete_pairing();
    wait_for(&session, SessionState::is_connected).await;

    let engine = DispatchEngine::new(session.clone(), DispatchConfig::default()).unwrap();
    let template = MessageTemplate::new("Dear", "<b>Meeting</b> at <i>noon</i>").with_custom_name(true);
    let job = engine.submit(recipients(5), template).unwrap();

    let progress = engine.progress(&job.job_id).unwrap();
    assert_eq!(progress.total, 5);
    assert!(progress.eta_ms >= 3987 && progress.eta_ms <= 7658);

    // Nothing fires before the minimum delay
    tokio::time::sleep(Duration::from_millis(3900)).await;
    assert_eq!(engine.progress(&job.job_id).unwrap().sent, 0);

    tokio::time::sleep(Duration::from_millis(4000)).await;
    let progress = engine.wait(&job.job_id).await.unwrap();
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.sent, 5);

    let mut bodies: Vec<_> = transport.sent().into_iter().map(|m| m.body).collect();
    bodies.sort();
    assert_eq!(bodies[0], "Dear P1,\n\nMeeting at noon");
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_delays_send_concurrently() {
    let transport = MemoryTransport::restored();
    transport.set_send_latency(Duration::from_secs(2));
    let session = connected_session(&transport).await;

    let engine = DispatchEngine::new(session, DispatchConfig::default())
        .unwrap()
        .with_jitter(Arc::new(FixedJitter::new(vec![Duration::from_secs(1)])));
    let job = engine.submit(recipients(3), MessageTemplate::new("Hi", "x")).unwrap();

    // All three fire at 1s and finish at 3s; serial sends would need 7s
    tokio::time::sleep(Duration::from_millis(3100)).await;
    let progress = engine.progress(&job.job_id).unwrap();
    assert_eq!(progress.sent, 3);
    assert_eq!(progress.status, JobStatus::Completed);
}

// ─── Session Loss ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_disconnect_mid_job_then_reconnect() {
    let transport = MemoryTransport::restored();
    let session = connected_session(&transport).await;

    // Sends at 1s, 2s, 3s, 4s, 5s; reconnect lands at 2.5s + 5s
    let engine = DispatchEngine::new(session.clone(), DispatchConfig::default())
        .unwrap()
        .with_jitter(Arc::new(FixedJitter::stepped(Duration::from_secs(1), 5)));
    let job = engine.submit(recipients(5), MessageTemplate::new("Hi", "x")).unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    transport.disconnect("LOGOUT");
    wait_for(&session, |s| matches!(s, SessionState::Disconnected { .. })).await;

    let progress = engine.wait(&job.job_id).await.unwrap();
    assert_eq!(progress.status, JobStatus::PartiallyFailed);
    assert_eq!(progress.sent, 2);
    assert_eq!(progress.failed, 3);
    assert!(progress.per_recipient[2..]
        .iter()
        .all(|o| o.state == DeliveryState::Failed { reason: "not connected".into() }));

    // The session comes back on its own; a new job goes through
    wait_for(&session, SessionState::is_connected).await;
    assert_eq!(transport.connect_calls(), 2);

    let retry = engine.submit(recipients(3)[2..].to_vec(), MessageTemplate::new("Hi", "x")).unwrap();
    let progress = engine.wait(&retry.job_id).await.unwrap();
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(transport.sent().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_burst_reconnects_once() {
    let transport = MemoryTransport::restored();
    let session = connected_session(&transport).await;

    for reason in ["a", "b", "c"] {
        transport.disconnect(reason);
    }
    transport.emit(a3s_dispatch::TransportEvent::AuthFailure);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(transport.connect_calls(), 2);
    assert_eq!(session.connect_attempts(), 2);
    assert!(session.current_state().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_fails_later_sends() {
    let transport = MemoryTransport::restored();
    let session = connected_session(&transport).await;
    let engine = DispatchEngine::new(session.clone(), DispatchConfig::default()).unwrap();

    let job = engine.submit(recipients(2), MessageTemplate::new("Hi", "x")).unwrap();
    session.shutdown().await.unwrap();

    let progress = engine.wait(&job.job_id).await.unwrap();
    assert_eq!(progress.failed, 2);
    assert!(transport.sent().is_empty());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.connect_calls(), 1);
}

// ─── Contacts & Groups ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_sync_contacts_and_dispatch_to_group() {
    let transport = MemoryTransport::restored();
    transport.set_contacts(vec![
        RemoteContact::new("4915112345@c.us", Some("Lena")),
        RemoteContact::new("4915167890@c.us", Some("Jonas")),
        RemoteContact::new("4915100000@c.us", Some("Unknown")),
        RemoteContact::new("120363@g.us", Some("Family chat")),
    ]);
    let session = connected_session(&transport).await;

    let store = Arc::new(MemoryContactStore::new());
    assert_eq!(sync_from_session(&session, &store).await.unwrap(), 2);

    let contacts = store.contacts().await;
    store
        .set_custom_name(&contacts[0].id, Some("Lenchen"))
        .await
        .unwrap();
    let group = store.create_group("Book club").await;
    for contact in &contacts {
        store.add_to_group(&group.id, &contact.id).await.unwrap();
    }

    let engine = DispatchEngine::new(session, DispatchConfig::default())
        .unwrap()
        .with_contact_store(store.clone());
    let template = MessageTemplate::new("Hallo", "<p>Next meeting Friday</p>").with_custom_name(true);
    let job = engine.submit_group(&group.id, template).await.unwrap();

    let progress = engine.wait(&job.job_id).await.unwrap();
    assert_eq!(progress.status, JobStatus::Completed);

    let sent = transport.sent();
    let lena = sent.iter().find(|m| m.address == "4915112345").unwrap();
    assert_eq!(lena.body, "Hallo Lenchen,\n\nNext meeting Friday");
    let jonas = sent.iter().find(|m| m.address == "4915167890").unwrap();
    assert_eq!(jonas.body, "Hallo ,\n\nNext meeting Friday");
}

#[tokio::test]
async fn test_sync_requires_connected_session() {
    let transport = MemoryTransport::new();
    let session = SessionManager::new(transport, SessionConfig::default());
    let store = MemoryContactStore::new();
    assert!(matches!(
        sync_from_session(&session, &store).await,
        Err(DispatchError::NotConnected)
    ));
}

// ─── Notifications ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_session_and_progress_notifications() {
    let sink = Arc::new(MemoryNotificationSink::default());
    let transport = MemoryTransport::restored();
    let session = SessionManager::with_notification_sink(
        transport.clone(),
        SessionConfig::default(),
        sink.clone(),
    );
    session.initialize().await.unwrap();
    wait_for(&session, SessionState::is_connected).await;

    let engine = DispatchEngine::new(session, DispatchConfig::default())
        .unwrap()
        .with_notification_sink(sink.clone());
    let job = engine.submit(recipients(2), MessageTemplate::new("Hi", "x")).unwrap();
    engine.wait(&job.job_id).await.unwrap();

    assert_eq!(sink.session_states().last(), Some(&SessionState::Connected));
    let latest = sink.latest_progress(&job.job_id).unwrap();
    assert_eq!(latest.status, JobStatus::Completed);

    let newest = &sink.list(1)[0];
    assert!(matches!(newest.kind, NotificationKind::Progress(_)));
}

#[tokio::test(start_paused = true)]
async fn test_progress_notifications_can_be_disabled() {
    let sink = Arc::new(MemoryNotificationSink::default());
    let transport = MemoryTransport::restored();
    let session = connected_session(&transport).await;

    let config = DispatchConfig {
        notify_progress: false,
        ..Default::default()
    };
    let engine = DispatchEngine::new(session, config)
        .unwrap()
        .with_notification_sink(sink.clone());
    let job = engine.submit(recipients(1), MessageTemplate::new("Hi", "x")).unwrap();
    engine.wait(&job.job_id).await.unwrap();

    assert_eq!(sink.count(), 0);
}

// ─── Job Listing ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_jobs_listing_reflects_status() {
    let transport = MemoryTransport::restored();
    let session = connected_session(&transport).await;
    let engine = DispatchEngine::new(session, DispatchConfig::default()).unwrap();

    let first = engine.submit(recipients(1), MessageTemplate::new("Hi", "one")).unwrap();
    engine.wait(&first.job_id).await.unwrap();
    let second = engine.submit(recipients(1), MessageTemplate::new("Hi", "two")).unwrap();

    let jobs = engine.jobs();
    assert_eq!(jobs.len(), 2);
    let status_of = |id: &str| jobs.iter().find(|j| j.job_id == id).unwrap().status;
    assert_eq!(status_of(&first.job_id), JobStatus::Completed);
    assert_eq!(status_of(&second.job_id), JobStatus::Pending);
    assert_eq!(engine.job(&second.job_id).unwrap().total(), 1);
}
