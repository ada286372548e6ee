use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::{Counter, Histogram, HistogramValue, Meter, MeterValue, TimeUnit};
use crate::clock::{saturating_nanos, Clock};
use crate::error::Result;
use crate::sampling::Reservoir;

/// Rate and duration distribution of a timed operation.
///
/// Durations are recorded in nanoseconds; each recording also marks the
/// meter once. `active_sessions` counts contexts opened but not yet closed.
pub struct Timer {
    clock: Arc<dyn Clock>,
    meter: Meter,
    histogram: Histogram,
    active_sessions: Counter,
}

/// Point-in-time value of a [`Timer`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerValue {
    pub rate: MeterValue,
    pub histogram: HistogramValue,
    pub active_sessions: i64,
    /// Unit of every duration in `histogram`
    pub duration_unit: TimeUnit,
}

impl TimerValue {
    pub fn scale(&self, rate_unit: TimeUnit, duration_unit: TimeUnit) -> TimerValue {
        TimerValue {
            rate: self.rate.scale(rate_unit),
            histogram: self.histogram.scale(self.duration_unit, duration_unit),
            active_sessions: self.active_sessions,
            duration_unit,
        }
    }
}

impl Timer {
    pub fn new(reservoir: impl Into<Reservoir>, clock: Arc<dyn Clock>) -> Self {
        Self {
            meter: Meter::new(clock.clone()),
            histogram: Histogram::new(reservoir),
            active_sessions: Counter::new(),
            clock,
        }
    }

    /// Open a timing scope. The duration is recorded when the returned
    /// context is stopped or dropped, whichever happens first.
    pub fn new_context(&self, user_value: Option<&str>) -> TimerContext<'_> {
        self.active_sessions.increment();
        TimerContext {
            timer: self,
            start: self.clock.nanoseconds(),
            user_value: user_value.map(String::from),
            finished: false,
        }
    }

    /// Run `action`, recording its duration even if it panics.
    pub fn time<F, R>(&self, action: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _context = self.new_context(None);
        action()
    }

    /// Await `future`, recording its duration even if it is dropped early.
    pub async fn time_future<F>(&self, future: F) -> F::Output
    where
        F: Future,
    {
        let _context = self.new_context(None);
        future.await
    }

    /// Record an externally measured duration of `amount` `unit`s.
    pub fn record(&self, amount: i64, unit: TimeUnit, user_value: Option<&str>) {
        self.record_nanos(unit.to_nanos(amount), user_value);
    }

    pub fn record_duration(&self, duration: Duration, user_value: Option<&str>) {
        self.record_nanos(saturating_nanos(duration), user_value);
    }

    fn record_nanos(&self, nanos: i64, user_value: Option<&str>) {
        if nanos < 0 {
            return;
        }
        self.histogram.update_with(nanos, user_value);
        self.meter.mark();
    }

    pub fn active_sessions(&self) -> i64 {
        self.active_sessions.count()
    }

    pub fn count(&self) -> i64 {
        self.histogram.count()
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Current value: rates per second, durations in nanoseconds.
    pub fn value(&self) -> TimerValue {
        TimerValue {
            rate: self.meter.value(),
            histogram: self.histogram.value(),
            active_sessions: self.active_sessions.count(),
            duration_unit: TimeUnit::Nanoseconds,
        }
    }

    pub fn merge(&self, other: &Timer) -> Result<()> {
        self.histogram.merge(&other.histogram)
    }

    /// Reset meter and histogram. Open contexts stay counted as active.
    pub fn reset(&self) {
        self.meter.reset();
        self.histogram.reset();
    }
}

// ─── Timing scope ────────────────────────────────────────────────

/// One in-flight timed operation.
///
/// Records exactly once: on the first [`stop`](TimerContext::stop) or on
/// drop, on every exit path including unwinding.
#[must_use = "the duration is recorded when the context is stopped or dropped"]
pub struct TimerContext<'a> {
    timer: &'a Timer,
    start: i64,
    user_value: Option<String>,
    finished: bool,
}

impl TimerContext<'_> {
    /// Time since the context was opened, without closing it.
    pub fn elapsed(&self) -> Duration {
        let nanos = self.timer.clock.nanoseconds() - self.start;
        Duration::from_nanos(nanos.max(0) as u64)
    }

    /// Attach a user value to the recording, e.g. the request id.
    pub fn track_user_value(&mut self, user_value: impl Into<String>) {
        self.user_value = Some(user_value.into());
    }

    /// Record the duration. Returns it the first time, `None` afterwards.
    pub fn stop(&mut self) -> Option<Duration> {
        if self.finished {
            return None;
        }
        self.finished = true;

        let elapsed = self.elapsed();
        self.timer
            .record_duration(elapsed, self.user_value.as_deref());
        self.timer.active_sessions.decrement();
        Some(elapsed)
    }
}

impl Drop for TimerContext<'_> {
    fn drop(&mut self) {
        self.stop();
    }
}
