//! Throttled message dispatch with per-recipient delivery tracking
//!
//! `submit` renders every message up front, draws an independent delay per
//! recipient and hands one task per recipient to the `Scheduler`. Each task
//! checks the session when it fires, so a job scheduled while connected
//! degrades to `Failed("not connected")` outcomes if the session drops.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let engine = DispatchEngine::new(session.clone(), DispatchConfig::default())?;
//! let job = engine.submit(recipients, MessageTemplate::new("Hey", "<p>Hi</p>"))?;
//!
//! let progress = engine.progress(&job.job_id)?;
//! println!("{}/{} sent, eta {:?}", progress.sent, progress.total, progress.eta());
//!
//! let done = engine.wait(&job.job_id).await?;
//! ```

use crate::config::DispatchConfig;
use crate::contacts::ContactStore;
use crate::error::{DispatchError, Result};
use crate::notify::{Notification, NotificationSink};
use crate::schedule::{Jitter, Scheduler, TokioScheduler, UniformJitter};
use crate::session::SessionManager;
use crate::template;
use crate::types::{
    DeliveryOutcome, DeliveryState, DispatchJob, JobProgress, JobStatus, MessageTemplate,
    Recipient,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::watch;

/// One recipient's slot in a job
struct Entry {
    outcome: DeliveryOutcome,
    body: String,
    /// Scheduler time at which the send fires
    due_at: Duration,
}

/// Mutable state of one submitted job
///
/// Each scheduled task writes only its own entry; the counters are shared
/// and updated atomically.
struct JobTracker {
    job: DispatchJob,
    /// Submission order, used to evict the oldest finished jobs
    seq: u64,
    entries: Vec<Mutex<Entry>>,
    status: Mutex<JobStatus>,
    sent: AtomicUsize,
    failed: AtomicUsize,
    resolved: AtomicUsize,
    done: watch::Sender<bool>,
}

impl JobTracker {
    fn new(job: DispatchJob, seq: u64, entries: Vec<Entry>) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            job,
            seq,
            entries: entries.into_iter().map(Mutex::new).collect(),
            status: Mutex::new(JobStatus::Pending),
            sent: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            resolved: AtomicUsize::new(0),
            done,
        }
    }

    fn status(&self) -> JobStatus {
        *lock(&self.status)
    }

    fn mark_running(&self) {
        let mut status = lock(&self.status);
        if *status == JobStatus::Pending {
            *status = JobStatus::Running;
            tracing::info!(job_id = %self.job.job_id, "Dispatch job running");
        }
    }

    /// Record the terminal outcome of one recipient
    ///
    /// Returns false if the entry was already terminal.
    fn record(&self, index: usize, result: Result<()>) -> bool {
        let Some(slot) = self.entries.get(index) else {
            return false;
        };

        {
            let mut entry = lock(slot);
            if entry.outcome.state.is_terminal() {
                return false;
            }
            match result {
                Ok(()) => {
                    entry.outcome.state = DeliveryState::Sent;
                    entry.outcome.sent_at = Some(Utc::now());
                    self.sent.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    entry.outcome.state = DeliveryState::Failed {
                        reason: e.delivery_reason(),
                    };
                    self.failed.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let resolved = self.resolved.fetch_add(1, Ordering::SeqCst) + 1;
        if resolved == self.entries.len() {
            self.finish();
        }
        true
    }

    fn finish(&self) {
        let failed = self.failed.load(Ordering::SeqCst);
        let status = if failed == 0 {
            JobStatus::Completed
        } else {
            JobStatus::PartiallyFailed
        };
        *lock(&self.status) = status;
        self.done.send_replace(true);

        tracing::info!(
            job_id = %self.job.job_id,
            sent = self.sent.load(Ordering::SeqCst),
            failed,
            status = ?status,
            "Dispatch job finished"
        );
    }

    fn progress(&self, now: Duration) -> JobProgress {
        let mut eta = Duration::ZERO;
        let per_recipient = self
            .entries
            .iter()
            .map(|slot| {
                let entry = lock(slot);
                if !entry.outcome.state.is_terminal() {
                    eta = eta.max(entry.due_at.saturating_sub(now));
                }
                entry.outcome.clone()
            })
            .collect();

        JobProgress {
            job_id: self.job.job_id.clone(),
            status: self.status(),
            sent: self.sent.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            total: self.entries.len(),
            per_recipient,
            eta_ms: eta.as_millis() as u64,
        }
    }

    fn snapshot(&self) -> DispatchJob {
        let mut job = self.job.clone();
        job.status = self.status();
        job
    }
}

/// Converts (recipients, template) pairs into throttled, independent sends
pub struct DispatchEngine {
    session: SessionManager,
    config: DispatchConfig,
    scheduler: Arc<dyn Scheduler>,
    jitter: Arc<dyn Jitter>,
    contacts: Option<Arc<dyn ContactStore>>,
    sink: Option<Arc<dyn NotificationSink>>,
    jobs: RwLock<HashMap<String, Arc<JobTracker>>>,
    next_seq: AtomicU64,
}

impl DispatchEngine {
    /// Create an engine using the tokio timer and uniform jitter
    pub fn new(session: SessionManager, config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        let jitter = Arc::new(UniformJitter::from_config(&config));
        Ok(Self {
            session,
            config,
            scheduler: Arc::new(TokioScheduler::new()),
            jitter,
            contacts: None,
            sink: None,
            jobs: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Replace the scheduler (e.g., a manual clock in tests)
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Replace the delay source
    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Contact store used by `submit_group`
    pub fn with_contact_store(mut self, contacts: Arc<dyn ContactStore>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    /// Publish progress snapshots to a sink
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Submit a dispatch job
    ///
    /// Validates input, schedules one send per recipient and returns the
    /// pending job immediately. Never suspends.
    pub fn submit(
        &self,
        recipients: Vec<Recipient>,
        template: MessageTemplate,
    ) -> Result<DispatchJob> {
        if recipients.is_empty() {
            return Err(DispatchError::EmptyRecipients);
        }
        if template::is_blank(&template) {
            return Err(DispatchError::EmptyMessage);
        }

        let now = self.scheduler.now();
        let delays: Vec<Duration> = recipients.iter().map(|_| self.jitter.draw()).collect();
        let entries = recipients
            .iter()
            .zip(&delays)
            .map(|(recipient, delay)| Entry {
                outcome: DeliveryOutcome::queued(recipient.id.clone()),
                body: template::personalize(&template, recipient),
                due_at: now + *delay,
            })
            .collect();

        let job = DispatchJob::new(recipients, template);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let tracker = Arc::new(JobTracker::new(job.clone(), seq, entries));
        {
            let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
            jobs.insert(job.job_id.clone(), tracker.clone());
            let evicted = evict_finished(&mut jobs, self.config.max_finished_jobs);
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted oldest finished jobs");
            }
        }

        tracing::info!(
            job_id = %job.job_id,
            total = job.total(),
            "Dispatch job submitted"
        );

        for (index, delay) in delays.into_iter().enumerate() {
            self.scheduler.schedule(delay, Box::pin(self.send_task(&tracker, index)));
        }

        self.publish_progress(&tracker);
        Ok(job)
    }

    /// Submit a job addressed to every member of a contact group
    pub async fn submit_group(
        &self,
        group_id: &str,
        template: MessageTemplate,
    ) -> Result<DispatchJob> {
        let contacts = self.contacts.as_ref().ok_or_else(|| {
            DispatchError::Config("no contact store configured".to_string())
        })?;
        let members = contacts.list_group_members(group_id).await?;
        self.submit(members, template)
    }

    /// Current aggregate progress of a job
    pub fn progress(&self, job_id: &str) -> Result<JobProgress> {
        Ok(self.tracker(job_id)?.progress(self.scheduler.now()))
    }

    /// Job snapshot with its current status
    pub fn job(&self, job_id: &str) -> Result<DispatchJob> {
        Ok(self.tracker(job_id)?.snapshot())
    }

    /// Snapshots of every submitted job, oldest first
    pub fn jobs(&self) -> Vec<DispatchJob> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<DispatchJob> = jobs.values().map(|t| t.snapshot()).collect();
        all.sort_by_key(|job| job.created_at);
        all
    }

    /// Forget a finished job
    ///
    /// Fails with `JobRunning` while any recipient is still queued.
    pub fn remove_job(&self, job_id: &str) -> Result<DispatchJob> {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let tracker = jobs
            .get(job_id)
            .ok_or_else(|| DispatchError::JobNotFound(job_id.to_string()))?;
        if !tracker.status().is_finished() {
            return Err(DispatchError::JobRunning(job_id.to_string()));
        }
        let job = tracker.snapshot();
        jobs.remove(job_id);
        Ok(job)
    }

    /// Forget every finished job, returning how many were dropped
    pub fn prune_finished(&self) -> usize {
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|_, tracker| !tracker.status().is_finished());
        before - jobs.len()
    }

    /// Rendered message bodies of a job, in recipient order
    pub fn messages(&self, job_id: &str) -> Result<Vec<String>> {
        let tracker = self.tracker(job_id)?;
        Ok(tracker
            .entries
            .iter()
            .map(|slot| lock(slot).body.clone())
            .collect())
    }

    /// Wait until every outcome of a job is terminal
    pub async fn wait(&self, job_id: &str) -> Result<JobProgress> {
        let tracker = self.tracker(job_id)?;
        let mut done = tracker.done.subscribe();
        done.wait_for(|finished| *finished)
            .await
            .map_err(|_| DispatchError::JobNotFound(job_id.to_string()))?;
        Ok(tracker.progress(self.scheduler.now()))
    }

    fn tracker(&self, job_id: &str) -> Result<Arc<JobTracker>> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned()
            .ok_or_else(|| DispatchError::JobNotFound(job_id.to_string()))
    }

    fn send_task(
        &self,
        tracker: &Arc<JobTracker>,
        index: usize,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let tracker = tracker.clone();
        let session = self.session.clone();
        let scheduler = self.scheduler.clone();
        let sink = self.progress_sink();

        async move {
            let (address, body) = {
                let recipient = &tracker.job.recipients[index];
                let entry = lock(&tracker.entries[index]);
                (recipient.address.clone(), entry.body.clone())
            };

            if session.current_state().is_connected() {
                tracker.mark_running();
            }

            let result = session.send_to(&address, &body).await;
            match &result {
                Ok(()) => tracing::debug!(
                    job_id = %tracker.job.job_id,
                    address = %address,
                    "Message sent"
                ),
                Err(e) => tracing::warn!(
                    job_id = %tracker.job.job_id,
                    address = %address,
                    error = %e,
                    "Message delivery failed"
                ),
            }

            if tracker.record(index, result) {
                if let Some(sink) = sink {
                    sink.publish(Notification::progress(tracker.progress(scheduler.now())));
                }
            }
        }
    }

    fn progress_sink(&self) -> Option<Arc<dyn NotificationSink>> {
        if self.config.notify_progress {
            self.sink.clone()
        } else {
            None
        }
    }

    fn publish_progress(&self, tracker: &JobTracker) {
        if let Some(sink) = self.progress_sink() {
            sink.publish(Notification::progress(
                tracker.progress(self.scheduler.now()),
            ));
        }
    }
}

/// Drop the oldest finished jobs beyond `keep`; 0 keeps everything
///
/// Unfinished jobs are never dropped.
fn evict_finished(jobs: &mut HashMap<String, Arc<JobTracker>>, keep: usize) -> usize {
    if keep == 0 {
        return 0;
    }
    let mut finished: Vec<(u64, String)> = jobs
        .values()
        .filter(|tracker| tracker.status().is_finished())
        .map(|tracker| (tracker.seq, tracker.job.job_id.clone()))
        .collect();
    if finished.len() <= keep {
        return 0;
    }
    finished.sort_unstable();
    let excess = finished.len() - keep;
    for (_, job_id) in finished.drain(..excess) {
        jobs.remove(&job_id);
    }
    excess
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
