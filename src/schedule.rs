//! Delayed-task scheduling and delay jitter
//!
//! `DispatchEngine` never sleeps itself: each recipient's send is handed
//! to a `Scheduler` together with a delay drawn from a `Jitter` source.
//! Production uses `TokioScheduler` + `UniformJitter`; tests can swap in
//! `ManualScheduler` + `FixedJitter` to drive time explicitly.

use crate::config::DispatchConfig;
use futures::future::BoxFuture;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Runs a task after a delay
pub trait Scheduler: Send + Sync {
    /// Schedule `task` to run once `delay` has elapsed
    ///
    /// Must not block. Tasks scheduled with overlapping delays may run
    /// concurrently.
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>);

    /// Time elapsed on this scheduler's clock
    fn now(&self) -> Duration;
}

/// Scheduler backed by the tokio timer
///
/// Each task is spawned onto the current runtime, so `schedule` must be
/// called from within a tokio context. The clock follows `tokio::time`,
/// which makes paused-time tests deterministic.
#[derive(Debug, Clone, Copy)]
pub struct TokioScheduler {
    origin: Instant,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
    }

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

struct PendingTask {
    due: Duration,
    seq: u64,
    task: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    pending: Vec<PendingTask>,
}

/// Scheduler driven by explicit `advance` calls
///
/// Keeps a virtual clock starting at zero. Due tasks run in due-time
/// order (ties in scheduling order) when the clock is advanced past them.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed on the virtual clock
    pub fn elapsed(&self) -> Duration {
        self.lock().now
    }

    /// Number of tasks not yet run
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Move the clock forward, running every task that becomes due
    ///
    /// Returns the number of tasks run.
    pub async fn advance(&self, by: Duration) -> usize {
        let target = self.elapsed() + by;
        let mut ran = 0;

        while let Some(task) = self.pop_due(target) {
            task.await;
            ran += 1;
        }

        self.lock().now = target;
        ran
    }

    fn pop_due(&self, target: Duration) -> Option<BoxFuture<'static, ()>> {
        let mut state = self.lock();
        let index = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= target)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(i, _)| i)?;
        let task = state.pending.swap_remove(index);
        state.now = state.now.max(task.due);
        Some(task.task)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        let mut state = self.lock();
        let due = state.now + delay;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(PendingTask { due, seq, task });
    }

    fn now(&self) -> Duration {
        self.elapsed()
    }
}

/// Source of per-recipient send delays
pub trait Jitter: Send + Sync {
    /// Draw the next delay
    fn draw(&self) -> Duration;
}

/// Uniformly distributed delay in `[min, max]` (millisecond resolution)
#[derive(Debug, Clone, Copy)]
pub struct UniformJitter {
    min_ms: u64,
    max_ms: u64,
}

impl UniformJitter {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_ms = min.as_millis() as u64;
        let max_ms = (max.as_millis() as u64).max(min_ms);
        Self { min_ms, max_ms }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.min_delay(), config.max_delay())
    }
}

impl Jitter for UniformJitter {
    fn draw(&self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }
}

/// Cycles through a fixed list of delays
pub struct FixedJitter {
    delays: Vec<Duration>,
    next: AtomicUsize,
}

impl FixedJitter {
    /// Create from a delay list; an empty list yields zero delays
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            next: AtomicUsize::new(0),
        }
    }

    /// Delays of `step`, `2 * step`, `3 * step`, ... for `count` draws
    pub fn stepped(step: Duration, count: usize) -> Self {
        Self::new((1..=count as u32).map(|i| step * i).collect())
    }
}

impl Jitter for FixedJitter {
    fn draw(&self) -> Duration {
        if self.delays.is_empty() {
            return Duration::ZERO;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        self.delays[i % self.delays.len()]
    }
}
