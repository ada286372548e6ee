use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::context::{MetricsContext, Shared};
use super::data::MetricsData;
use crate::clock::{Clock, SystemClock};
use crate::config::MetricsConfig;
use crate::error::Result;
use crate::scheduler::{CancellationSignal, ScheduledAction, Scheduler};

/// Owner of one metrics tree.
///
/// Created explicitly and torn down explicitly with
/// [`shutdown`](Metrics::shutdown) (or on drop); there is no global
/// instance.
pub struct Metrics {
    shared: Arc<Shared>,
    root: Arc<MetricsContext>,
    schedulers: Mutex<Vec<Arc<dyn Scheduler>>>,
    shut_down: AtomicBool,
}

impl Metrics {
    /// Validate `config` and build a tree on the real monotonic clock.
    pub fn new(config: MetricsConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: MetricsConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let label = config.default_context_label.clone();
        let shared = Arc::new(Shared { config, clock });
        info!(root = %label, "metrics tree initialised");
        Ok(Self {
            root: MetricsContext::root(label, shared.clone()),
            shared,
            schedulers: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.shared.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    pub fn root(&self) -> &Arc<MetricsContext> {
        &self.root
    }

    /// Shorthand for `root().context(path)`.
    pub fn context(&self, path: &str) -> Result<Arc<MetricsContext>> {
        self.root.context(path)
    }

    /// Snapshot of the whole tree.
    pub fn data(&self) -> MetricsData {
        self.root.data()
    }

    /// Hand the tree's data to `report` every `report_interval_secs`.
    ///
    /// The scheduler is stopped on shutdown.
    pub fn schedule_reports<F>(&self, scheduler: Arc<dyn Scheduler>, report: F) -> Result<()>
    where
        F: Fn(&MetricsData) + Send + Sync + 'static,
    {
        let root = self.root.clone();
        let action: ScheduledAction = Arc::new(move |signal: &CancellationSignal| {
            if signal.is_cancelled() || root.is_disposed() {
                return;
            }
            report(&root.data());
        });
        let interval = Duration::from_secs(self.shared.config.report_interval_secs);
        scheduler.start(interval, action)?;
        debug!(?interval, "scheduled metrics reports");
        self.schedulers.lock().push(scheduler);
        Ok(())
    }

    /// Stop every report schedule and dispose the tree. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for scheduler in std::mem::take(&mut *self.schedulers.lock()) {
            scheduler.stop();
        }
        self.root.dispose();
        info!("metrics tree shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for Metrics {
    fn drop(&mut self) {
        self.shutdown();
    }
}
