//! Deferred task execution behind an injectable clock.
//!
//! The uniqueness validator and the save coordinator never touch timers
//! directly. They hand delayed work to a [`Scheduler`], which is a tokio
//! timer in production and a manually advanced virtual clock in tests.
//! [`Debouncer`] builds the per-key cancel-and-reschedule behaviour both
//! components need on top of it.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// A unit of deferred work.
pub type Task = BoxFuture<'static, ()>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a scheduled task.
///
/// Cancelling before the delay elapses prevents the task from running.
/// Once it has started, the task runs to completion.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl ScheduledTask {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the task is still waiting for its delay.
    pub fn is_pending(&self) -> bool {
        !self.is_cancelled() && !self.fired.load(Ordering::Acquire)
    }

    fn mark_fired(&self) {
        self.fired.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub trait Scheduler: Send + Sync {
    /// Run `task` after `delay` unless the returned handle is cancelled
    /// first.
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask;
}

/// Scheduler backed by tokio timers.
///
/// Must be used from within a tokio runtime. Under a paused runtime
/// (`tokio::test(start_paused = true)`) the timers follow virtual time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let handle = ScheduledTask::new();
        let watcher = handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watcher.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    watcher.mark_fired();
                    task.await;
                }
            }
        });
        handle
    }
}

struct Pending {
    due: Duration,
    seq: u64,
    handle: ScheduledTask,
    task: Task,
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    seq: u64,
    pending: Vec<Pending>,
}

/// Scheduler driven by an explicit virtual clock.
///
/// Nothing runs until [`advance`](Self::advance) is awaited; due tasks then
/// run inline in due order, ties broken by scheduling order.
#[derive(Default)]
pub struct ManualScheduler {
    clock: Mutex<ManualClock>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        lock(&self.clock).now
    }

    /// Number of tasks still waiting to run.
    pub fn pending(&self) -> usize {
        lock(&self.clock)
            .pending
            .iter()
            .filter(|p| !p.handle.is_cancelled())
            .count()
    }

    /// Move the clock forward by `by`, running every task that falls due.
    ///
    /// Tasks scheduled by a running task are picked up in the same call if
    /// they fall due before the target time.
    pub async fn advance(&self, by: Duration) {
        let target = lock(&self.clock).now + by;

        loop {
            let next = {
                let mut clock = lock(&self.clock);
                clock.pending.retain(|p| !p.handle.is_cancelled());
                let index = clock
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.due <= target)
                    .min_by_key(|(_, p)| (p.due, p.seq))
                    .map(|(i, _)| i);
                index.map(|i| {
                    let pending = clock.pending.swap_remove(i);
                    clock.now = clock.now.max(pending.due);
                    pending
                })
            };

            match next {
                Some(pending) => {
                    pending.handle.mark_fired();
                    pending.task.await;
                }
                None => break,
            }
        }

        let mut clock = lock(&self.clock);
        clock.now = clock.now.max(target);
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let handle = ScheduledTask::new();
        let mut clock = lock(&self.clock);
        clock.seq += 1;
        let pending = Pending {
            due: clock.now + delay,
            seq: clock.seq,
            handle: handle.clone(),
            task,
        };
        clock.pending.push(pending);
        handle
    }
}

// ---------------------------------------------------------------------------
// Debouncer
// ---------------------------------------------------------------------------

/// Per-key debounce: every call cancels the key's pending task and
/// schedules the new one after the full delay.
pub struct Debouncer<K> {
    scheduler: Arc<dyn Scheduler>,
    delay: Duration,
    pending: Mutex<HashMap<K, ScheduledTask>>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(scheduler: Arc<dyn Scheduler>, delay: Duration) -> Self {
        Self {
            scheduler,
            delay,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `task` for `key`, replacing whatever was pending for it.
    pub fn call(&self, key: K, task: Task) {
        let handle = self.scheduler.schedule(self.delay, task);
        let mut pending = lock(&self.pending);
        if let Some(previous) = pending.insert(key, handle) {
            previous.cancel();
        }
    }

    /// Cancel the pending task for `key`. Returns whether one was waiting.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.pending).remove(key) {
            Some(handle) => {
                let was_pending = handle.is_pending();
                handle.cancel();
                was_pending
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in lock(&self.pending).drain() {
            handle.cancel();
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.pending)
            .get(key)
            .is_some_and(ScheduledTask::is_pending)
    }
}
