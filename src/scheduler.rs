use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, trace, warn};

use crate::clock::{saturating_nanos, Clock, ManualClock};
use crate::error::{MetricsError, Result};

/// Periodic action; receives the scheduler's cancellation signal so long
/// reports can bail out between steps.
pub type ScheduledAction = Arc<dyn Fn(&CancellationSignal) + Send + Sync>;

/// Runs actions at a fixed interval until stopped.
pub trait Scheduler: Send + Sync {
    fn start(&self, interval: Duration, action: ScheduledAction) -> Result<()>;

    /// Stop all actions. An in-flight run finishes; no new run starts.
    /// Safe to call any number of times.
    fn stop(&self);
}

/// Cooperative cancellation flag shared with scheduled actions.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ─── Production scheduler ────────────────────────────────────────

/// Tokio-backed scheduler: one task per started action, ticking on a real
/// interval. Actions run on the blocking pool so a slow report never stalls
/// the runtime's worker threads.
pub struct ActionScheduler {
    signal: CancellationSignal,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ActionScheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            signal: CancellationSignal::new(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Stop, then wait for every task to wind down.
    pub async fn shutdown(&self) {
        self.stop();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            // JoinError here only means the runtime already aborted the task
            let _ = task.await;
        }
    }
}

impl Default for ActionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ActionScheduler {
    fn start(&self, interval: Duration, action: ScheduledAction) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| MetricsError::SchedulerRuntime)?;
        if interval.is_zero() {
            return Err(MetricsError::Config(
                "schedule interval must be greater than 0".into(),
            ));
        }
        if self.signal.is_cancelled() {
            warn!("scheduler already stopped, ignoring start");
            return Ok(());
        }

        let mut shutdown = self.shutdown.subscribe();
        let signal = self.signal.clone();

        let task = handle.spawn(async move {
            let first = tokio::time::Instant::now() + interval;
            let mut ticks = IntervalStream::new(tokio::time::interval_at(first, interval));

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    tick = ticks.next() => {
                        if tick.is_none() {
                            break;
                        }
                    }
                }
                // Checked at each interval boundary, never mid-run
                if signal.is_cancelled() {
                    break;
                }
                trace!("running scheduled action");
                let action = action.clone();
                let run_signal = signal.clone();
                if let Err(e) = tokio::task::spawn_blocking(move || action(&run_signal)).await {
                    warn!(error = %e, "scheduled action failed");
                }
            }
            debug!("scheduled action stopped");
        });

        self.tasks.lock().push(task);
        Ok(())
    }

    fn stop(&self) {
        self.signal.cancel();
        // No receivers left just means every task already exited
        let _ = self.shutdown.send(true);
    }
}

impl Drop for ActionScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Test scheduler ──────────────────────────────────────────────

/// Deterministic scheduler driven by a [`ManualClock`].
///
/// Nothing runs on its own: [`advance`](ManualScheduler::advance) moves the
/// clock forward and synchronously runs every action that falls due on the
/// way, in due-time order.
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    signal: CancellationSignal,
    tasks: Mutex<Vec<ManualTask>>,
}

struct ManualTask {
    interval: i64,
    next_due: i64,
    action: ScheduledAction,
}

impl ManualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            signal: CancellationSignal::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Advance the clock by `by`, catching up on every due action.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.nanoseconds().saturating_add(saturating_nanos(by));

        while let Some((due, action)) = self.next_due_before(target) {
            self.clock.set_nanoseconds(due);
            action(&self.signal);
        }
        self.clock.set_nanoseconds(target);
    }

    /// Pop the earliest action due at or before `target`, rescheduling it.
    /// An action whose next run lies past the end of the clock is dropped.
    fn next_due_before(&self, target: i64) -> Option<(i64, ScheduledAction)> {
        if self.signal.is_cancelled() {
            return None;
        }
        let mut tasks = self.tasks.lock();
        let (index, task) = tasks
            .iter_mut()
            .enumerate()
            .filter(|(_, t)| t.next_due <= target)
            .min_by_key(|(_, t)| t.next_due)?;
        let due = task.next_due;
        let action = task.action.clone();
        match due.checked_add(task.interval) {
            Some(next) => task.next_due = next,
            None => {
                tasks.remove(index);
            }
        }
        Some((due, action))
    }
}

impl Scheduler for ManualScheduler {
    fn start(&self, interval: Duration, action: ScheduledAction) -> Result<()> {
        if interval.is_zero() {
            return Err(MetricsError::Config(
                "schedule interval must be greater than 0".into(),
            ));
        }
        let interval = saturating_nanos(interval);
        let Some(next_due) = self.clock.nanoseconds().checked_add(interval) else {
            debug!(?interval, "action would never fall due, not scheduling it");
            return Ok(());
        };
        self.tasks.lock().push(ManualTask {
            interval,
            next_due,
            action,
        });
        Ok(())
    }

    fn stop(&self) {
        self.signal.cancel();
        self.tasks.lock().clear();
    }
}
