//! Outward notification sinks
//!
//! `SessionManager` and `DispatchEngine` push state and progress snapshots
//! to an optional `NotificationSink` (e.g., for a UI). Publishing is
//! synchronous and fire-and-forget: sinks must not block and no
//! acknowledgement is expected.

use crate::types::{JobProgress, SessionState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::RwLock;
use tokio::sync::mpsc;

/// What a notification carries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "data")]
pub enum NotificationKind {
    /// Session state transition
    Session(SessionState),
    /// Job progress snapshot
    Progress(JobProgress),
}

/// A timestamped notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn session(state: SessionState) -> Self {
        Self {
            kind: NotificationKind::Session(state),
            timestamp: Utc::now(),
        }
    }

    pub fn progress(progress: JobProgress) -> Self {
        Self {
            kind: NotificationKind::Progress(progress),
            timestamp: Utc::now(),
        }
    }
}

/// Push interface for notifications
pub trait NotificationSink: Send + Sync {
    /// Publish a notification without waiting
    fn publish(&self, notification: Notification);
}

/// In-memory sink keeping a bounded history
///
/// Oldest notifications are drained once `max_entries` is exceeded.
pub struct MemoryNotificationSink {
    entries: RwLock<VecDeque<Notification>>,
    max_entries: usize,
}

impl MemoryNotificationSink {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            max_entries,
        }
    }

    /// Number of stored notifications
    pub fn count(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Most recent notifications, newest first
    pub fn list(&self, limit: usize) -> Vec<Notification> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Session states in publish order
    pub fn session_states(&self) -> Vec<SessionState> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter_map(|n| match &n.kind {
                NotificationKind::Session(state) => Some(state.clone()),
                NotificationKind::Progress(_) => None,
            })
            .collect()
    }

    /// Latest progress snapshot for a job
    pub fn latest_progress(&self, job_id: &str) -> Option<JobProgress> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().find_map(|n| match &n.kind {
            NotificationKind::Progress(p) if p.job_id == job_id => Some(p.clone()),
            _ => None,
        })
    }
}

impl Default for MemoryNotificationSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl NotificationSink for MemoryNotificationSink {
    fn publish(&self, notification: Notification) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push_back(notification);

        if self.max_entries > 0 && entries.len() > self.max_entries {
            let drain_count = entries.len() - self.max_entries;
            entries.drain(..drain_count);
        }
    }
}

/// Sink forwarding notifications into a channel
pub struct ChannelNotificationSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotificationSink {
    /// Create a sink and the receiver consuming its notifications
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotificationSink {
    fn publish(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("Notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;

    fn progress(job_id: &str, sent: usize) -> JobProgress {
        JobProgress {
            job_id: job_id.to_string(),
            status: JobStatus::Running,
            sent,
            failed: 0,
            total: 3,
            per_recipient: Vec::new(),
            eta_ms: 0,
        }
    }

    #[test]
    fn test_notification_serialization() {
        let n = Notification::session(SessionState::Connected);
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains(r#""kind":{"type":"session","data":{"state":"connected"}}"#));
        assert!(json.contains("\"timestamp\""));
    }

    #[test]
    fn test_memory_sink_list_newest_first() {
        let sink = MemoryNotificationSink::default();
        sink.publish(Notification::session(SessionState::Authenticated));
        sink.publish(Notification::session(SessionState::Connected));

        let list = sink.list(10);
        assert_eq!(list.len(), 2);
        assert!(matches!(
            list[0].kind,
            NotificationKind::Session(SessionState::Connected)
        ));
        assert_eq!(
            sink.session_states(),
            vec![SessionState::Authenticated, SessionState::Connected]
        );
    }

    #[test]
    fn test_memory_sink_max_capacity() {
        let sink = MemoryNotificationSink::new(3);
        for i in 0..5 {
            sink.publish(Notification::progress(progress("job-1", i)));
        }
        assert_eq!(sink.count(), 3);
        assert_eq!(sink.latest_progress("job-1").unwrap().sent, 4);
        assert!(sink.latest_progress("job-2").is_none());
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelNotificationSink::channel();
        sink.publish(Notification::progress(progress("job-9", 1)));

        let received = rx.recv().await.unwrap();
        match received.kind {
            NotificationKind::Progress(p) => assert_eq!(p.job_id, "job-9"),
            other => panic!("unexpected notification: {:?}", other),
        }

        drop(rx);
        sink.publish(Notification::session(SessionState::Connected));
    }
}
