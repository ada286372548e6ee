use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::metrics::TimeUnit;

/// Monotonic nanosecond time source.
///
/// Meters, timers and the decaying reservoir read time exclusively through
/// this trait so tests can drive them with a [`ManualClock`].
pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary, fixed origin. Never decreases.
    fn nanoseconds(&self) -> i64;

    /// Whole seconds since the same origin.
    fn seconds(&self) -> i64 {
        TimeUnit::Nanoseconds.convert(self.nanoseconds(), TimeUnit::Seconds)
    }

    /// Wall-clock timestamp used to stamp collected data.
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// `duration` in nanoseconds, saturating at `i64::MAX`.
pub(crate) fn saturating_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

// ─── Production clock ────────────────────────────────────────────

/// Real monotonic clock anchored at construction time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn nanoseconds(&self) -> i64 {
        saturating_nanos(self.anchor.elapsed())
    }
}

// ─── Test clock ──────────────────────────────────────────────────

/// Fully deterministic clock that only moves when told to.
///
/// Pair it with [`crate::scheduler::ManualScheduler`] to also run due
/// scheduled actions while advancing.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `amount` of `unit`.
    pub fn advance(&self, unit: TimeUnit, amount: i64) {
        self.add(unit.to_nanos(amount));
    }

    pub fn advance_by(&self, duration: Duration) {
        self.add(saturating_nanos(duration));
    }

    fn add(&self, nanos: i64) {
        // the closure never returns None, so the update always succeeds
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_add(nanos)));
    }

    /// Jump to an absolute reading. Ignored if it would move time backwards.
    pub fn set_nanoseconds(&self, nanos: i64) {
        self.nanos.fetch_max(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn nanoseconds(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }

    fn utc_now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_nanos(self.nanoseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_forward() {
        let clock = ManualClock::new();
        assert_eq!(clock.nanoseconds(), 0);

        clock.advance(TimeUnit::Seconds, 2);
        assert_eq!(clock.nanoseconds(), 2_000_000_000);
        assert_eq!(clock.seconds(), 2);

        clock.advance_by(Duration::from_millis(500));
        assert_eq!(clock.nanoseconds(), 2_500_000_000);

        clock.set_nanoseconds(1);
        assert_eq!(clock.nanoseconds(), 2_500_000_000);
    }

    #[test]
    fn huge_durations_saturate_instead_of_wrapping() {
        assert_eq!(saturating_nanos(Duration::MAX), i64::MAX);
        assert_eq!(saturating_nanos(Duration::from_nanos(42)), 42);

        let clock = ManualClock::new();
        clock.advance(TimeUnit::Seconds, 1);
        clock.advance_by(Duration::MAX);
        assert_eq!(clock.nanoseconds(), i64::MAX);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.nanoseconds();
        let b = clock.nanoseconds();
        assert!(b >= a);
    }
}
