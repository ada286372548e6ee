use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::ewma::{Ewma, TICK_INTERVAL_NANOS};
use super::TimeUnit;
use crate::clock::Clock;

/// Throughput metric: total marks, mean rate and 1/5/15-minute EWMA rates.
///
/// Rates are recomputed lazily. Every `mark` and every `value` read first
/// catches up on the ticks missed since the last one, so an idle meter
/// decays correctly without a background thread.
pub struct Meter {
    clock: Arc<dyn Clock>,
    count: AtomicI64,
    uncounted: AtomicI64,
    start_time: AtomicI64,
    last_tick: AtomicI64,
    rates: Mutex<Rates>,
    items: Mutex<HashMap<String, Arc<Meter>>>,
}

struct Rates {
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
}

impl Rates {
    fn new() -> Self {
        Self {
            m1: Ewma::one_minute(),
            m5: Ewma::five_minutes(),
            m15: Ewma::fifteen_minutes(),
        }
    }

    fn tick(&mut self, events: i64) {
        self.m1.tick(events);
        self.m5.tick(events);
        self.m15.tick(events);
    }
}

/// Point-in-time value of a [`Meter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterValue {
    pub count: i64,
    pub mean_rate: f64,
    pub one_minute_rate: f64,
    pub five_minute_rate: f64,
    pub fifteen_minute_rate: f64,
    /// Denominator of every rate above
    pub rate_unit: TimeUnit,
    pub items: Vec<MeterItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterItem {
    pub item: String,
    /// Share of the meter's total count, 0–100
    pub percent: f64,
    pub value: MeterValue,
}

impl MeterValue {
    /// Re-express every rate per `rate_unit` instead of per `self.rate_unit`.
    pub fn scale(&self, rate_unit: TimeUnit) -> MeterValue {
        if rate_unit == self.rate_unit {
            return self.clone();
        }
        let factor = rate_unit.scaling_factor_to(self.rate_unit);
        MeterValue {
            count: self.count,
            mean_rate: self.mean_rate * factor,
            one_minute_rate: self.one_minute_rate * factor,
            five_minute_rate: self.five_minute_rate * factor,
            fifteen_minute_rate: self.fifteen_minute_rate * factor,
            rate_unit,
            items: self
                .items
                .iter()
                .map(|i| MeterItem {
                    item: i.item.clone(),
                    percent: i.percent,
                    value: i.value.scale(rate_unit),
                })
                .collect(),
        }
    }
}

impl Meter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.nanoseconds();
        Self {
            clock,
            count: AtomicI64::new(0),
            uncounted: AtomicI64::new(0),
            start_time: AtomicI64::new(now),
            last_tick: AtomicI64::new(now),
            rates: Mutex::new(Rates::new()),
            items: Mutex::new(HashMap::new()),
        }
    }

    pub fn mark(&self) {
        self.mark_by(1);
    }

    pub fn mark_by(&self, n: i64) {
        self.tick_if_necessary();
        self.count.fetch_add(n, Ordering::Relaxed);
        self.uncounted.fetch_add(n, Ordering::Relaxed);
    }

    /// Mark `n` events and attribute them to `item`.
    pub fn mark_item(&self, item: &str, n: i64) {
        self.mark_by(n);
        let meter = self
            .items
            .lock()
            .entry(item.to_owned())
            .or_insert_with(|| Arc::new(Meter::new(self.clock.clone())))
            .clone();
        meter.mark_by(n);
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Current value with rates per second.
    pub fn value(&self) -> MeterValue {
        self.tick_if_necessary();

        let (m1, m5, m15) = {
            let rates = self.rates.lock();
            (rates.m1.rate(), rates.m5.rate(), rates.m15.rate())
        };
        let count = self.count();

        let items: Vec<(String, Arc<Meter>)> = self
            .items
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut items: Vec<MeterItem> = items
            .into_iter()
            .map(|(item, meter)| {
                let value = meter.value();
                MeterItem {
                    percent: if count != 0 {
                        value.count as f64 / count as f64 * 100.0
                    } else {
                        0.0
                    },
                    item,
                    value,
                }
            })
            .collect();
        items.sort_by(|a, b| b.value.count.cmp(&a.value.count).then_with(|| a.item.cmp(&b.item)));

        MeterValue {
            count,
            mean_rate: self.mean_rate(count),
            one_minute_rate: m1,
            five_minute_rate: m5,
            fifteen_minute_rate: m15,
            rate_unit: TimeUnit::Seconds,
            items,
        }
    }

    pub fn reset(&self) {
        let now = self.clock.nanoseconds();
        let mut rates = self.rates.lock();
        self.count.store(0, Ordering::Relaxed);
        self.uncounted.store(0, Ordering::Relaxed);
        self.start_time.store(now, Ordering::Relaxed);
        self.last_tick.store(now, Ordering::Relaxed);
        *rates = Rates::new();
        self.items.lock().clear();
    }

    fn mean_rate(&self, count: i64) -> f64 {
        let elapsed = self.clock.nanoseconds() - self.start_time.load(Ordering::Relaxed);
        if count == 0 || elapsed <= 0 {
            return 0.0;
        }
        count as f64 * TimeUnit::Seconds.nanos_per_unit() as f64 / elapsed as f64
    }

    /// Replay every tick missed since the last one.
    ///
    /// Only the first replayed tick sees the events marked in the meantime;
    /// the rest model the idle gap and just decay the averages.
    fn tick_if_necessary(&self) {
        let now = self.clock.nanoseconds();
        if now - self.last_tick.load(Ordering::Acquire) < TICK_INTERVAL_NANOS {
            return;
        }

        let mut rates = self.rates.lock();
        let last = self.last_tick.load(Ordering::Acquire);
        let required = (now - last) / TICK_INTERVAL_NANOS;
        if required <= 0 {
            // another thread caught up while we waited for the lock
            return;
        }
        self.last_tick
            .store(last + required * TICK_INTERVAL_NANOS, Ordering::Release);

        let uncounted = self.uncounted.swap(0, Ordering::Relaxed);
        rates.tick(uncounted);
        for _ in 1..required {
            rates.tick(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn meter() -> (Arc<ManualClock>, Meter) {
        let clock = Arc::new(ManualClock::new());
        let meter = Meter::new(clock.clone());
        (clock, meter)
    }

    #[test]
    fn mean_rate_is_count_over_elapsed() {
        let (clock, meter) = meter();
        meter.mark();
        clock.advance(TimeUnit::Seconds, 1);
        assert_eq!(meter.value().mean_rate, 1.0);

        clock.advance(TimeUnit::Seconds, 1);
        assert_eq!(meter.value().mean_rate, 0.5);
    }

    #[test]
    fn windowed_rates_after_catch_up() {
        let (clock, meter) = meter();
        meter.mark();
        clock.advance(TimeUnit::Seconds, 10);
        meter.mark_by(2);

        let value = meter.value();
        assert_eq!(value.count, 3);
        assert!((value.mean_rate - 0.3).abs() < 0.001);
        assert!((value.one_minute_rate - 0.1840).abs() < 0.001);
        assert!((value.five_minute_rate - 0.1966).abs() < 0.001);
        assert!((value.fifteen_minute_rate - 0.1988).abs() < 0.001);
    }

    #[test]
    fn rates_are_zero_before_first_tick() {
        let (clock, meter) = meter();
        meter.mark_by(10);
        clock.advance(TimeUnit::Seconds, 4);
        let value = meter.value();
        assert_eq!(value.one_minute_rate, 0.0);
        assert_eq!(value.count, 10);
    }

    #[test]
    fn idle_meter_decays() {
        let (clock, meter) = meter();
        meter.mark_by(60);
        clock.advance(TimeUnit::Seconds, 5);
        let busy = meter.value().one_minute_rate;
        clock.advance(TimeUnit::Minutes, 5);
        let idle = meter.value().one_minute_rate;
        assert!(busy > 0.0);
        assert!(idle < busy / 100.0);
    }

    #[test]
    fn scales_rates_to_other_units() {
        let (clock, meter) = meter();
        meter.mark_by(2);
        clock.advance(TimeUnit::Seconds, 1);
        let per_minute = meter.value().scale(TimeUnit::Minutes);
        assert_eq!(per_minute.rate_unit, TimeUnit::Minutes);
        assert!((per_minute.mean_rate - 120.0).abs() < 1e-9);
    }

    #[test]
    fn item_breakdown() {
        let (clock, meter) = meter();
        meter.mark_item("get", 3);
        meter.mark_item("put", 1);
        clock.advance(TimeUnit::Seconds, 1);

        let value = meter.value();
        assert_eq!(value.count, 4);
        assert_eq!(value.items.len(), 2);
        assert_eq!(value.items[0].item, "get");
        assert_eq!(value.items[0].percent, 75.0);
        assert_eq!(value.items[0].value.mean_rate, 3.0);
    }

    #[test]
    fn reset_restarts_the_meter() {
        let (clock, meter) = meter();
        meter.mark_by(5);
        clock.advance(TimeUnit::Seconds, 10);
        meter.reset();

        let value = meter.value();
        assert_eq!(value.count, 0);
        assert_eq!(value.mean_rate, 0.0);
        assert_eq!(value.one_minute_rate, 0.0);

        meter.mark();
        clock.advance(TimeUnit::Seconds, 1);
        assert_eq!(meter.value().mean_rate, 1.0);
    }

    #[test]
    fn concurrent_marks_survive_tick_catch_up() {
        let (clock, meter) = meter();
        std::thread::scope(|s| {
            for t in 0..8 {
                let meter = &meter;
                s.spawn(move || {
                    let item = if t % 2 == 0 { "even" } else { "odd" };
                    for _ in 0..10_000 {
                        meter.mark_item(item, 1);
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..200 {
                    clock.advance(TimeUnit::Seconds, 1);
                    let value = meter.value();
                    assert!(value.one_minute_rate >= 0.0);
                    assert!(value.mean_rate.is_finite());
                }
            });
        });

        let value = meter.value();
        assert_eq!(value.count, 80_000);
        let per_item: i64 = value.items.iter().map(|i| i.value.count).sum();
        assert_eq!(per_item, 80_000);
    }
}
