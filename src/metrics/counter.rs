use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Signed running total, updated with lock-free atomic adds.
///
/// Optionally breaks the total down per item (e.g. per status code); the
/// breakdown sits behind a mutex and is only touched by the `*_item` calls.
#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicI64,
    items: Mutex<HashMap<String, i64>>,
}

/// Point-in-time value of a [`Counter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterValue {
    pub count: i64,
    /// Per-item breakdown, largest first
    pub items: Vec<CounterItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterItem {
    pub item: String,
    pub count: i64,
    /// Share of the counter's total, 0–100
    pub percent: f64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.increment_by(1);
    }

    pub fn increment_by(&self, n: i64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        self.decrement_by(1);
    }

    pub fn decrement_by(&self, n: i64) {
        self.count.fetch_sub(n, Ordering::Relaxed);
    }

    /// Add `n` to the total and to `item`'s share of it.
    pub fn increment_item(&self, item: &str, n: i64) {
        self.increment_by(n);
        *self.items.lock().entry(item.to_owned()).or_default() += n;
    }

    pub fn decrement_item(&self, item: &str, n: i64) {
        self.decrement_by(n);
        *self.items.lock().entry(item.to_owned()).or_default() -= n;
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn value(&self) -> CounterValue {
        let items = self.items.lock().clone();
        let count = self.count();

        let mut items: Vec<CounterItem> = items
            .into_iter()
            .map(|(item, n)| CounterItem {
                percent: if count != 0 {
                    n as f64 / count as f64 * 100.0
                } else {
                    0.0
                },
                item,
                count: n,
            })
            .collect();
        items.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.item.cmp(&b.item)));

        CounterValue { count, items }
    }

    pub fn reset(&self) {
        self.items.lock().clear();
        self.count.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_increments_and_decrements() {
        let counter = Counter::new();
        counter.increment();
        counter.increment_by(10);
        counter.decrement_by(4);
        counter.decrement();
        assert_eq!(counter.count(), 6);

        counter.decrement_by(10);
        assert_eq!(counter.count(), -4);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let counter = Counter::new();
        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    for _ in 0..100_000 {
                        counter.increment();
                    }
                });
            }
        });
        assert_eq!(counter.count(), 1_600_000);
    }

    #[test]
    fn breaks_totals_down_per_item() {
        let counter = Counter::new();
        counter.increment_item("200", 3);
        counter.increment_item("500", 1);
        counter.decrement_item("200", 1);

        let value = counter.value();
        assert_eq!(value.count, 3);
        assert_eq!(value.items[0].item, "200");
        assert_eq!(value.items[0].count, 2);
        assert!((value.items[0].percent - 66.666).abs() < 0.01);
        assert_eq!(value.items[1].count, 1);
    }

    #[test]
    fn reset_zeroes_everything() {
        let counter = Counter::new();
        counter.increment_item("a", 5);
        counter.reset();
        assert_eq!(counter.value(), CounterValue { count: 0, items: Vec::new() });
    }
}
