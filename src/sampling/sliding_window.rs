use std::collections::VecDeque;

use parking_lot::Mutex;

use super::snapshot::{WeightedSample, WeightedSnapshot};

pub const DEFAULT_SIZE: usize = 1028;

/// The most recent `capacity` observations, oldest first.
pub struct SlidingWindowReservoir {
    capacity: usize,
    window: Mutex<Window>,
}

struct Window {
    count: u64,
    samples: VecDeque<WeightedSample>,
}

impl SlidingWindowReservoir {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            window: Mutex::new(Window {
                count: 0,
                samples: VecDeque::with_capacity(capacity + 1),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count(&self) -> u64 {
        self.window.lock().count
    }

    pub fn size(&self) -> usize {
        self.window.lock().samples.len()
    }

    pub fn update(&self, value: i64, user_value: Option<&str>) {
        let mut window = self.window.lock();
        window.count += 1;
        window.push(
            self.capacity,
            WeightedSample::unweighted(value, user_value.map(Into::into)),
        );
    }

    /// Retained values in insertion order.
    pub fn values(&self) -> Vec<i64> {
        self.window.lock().samples.iter().map(|s| s.value).collect()
    }

    pub fn snapshot(&self) -> WeightedSnapshot {
        let samples: Vec<WeightedSample> = self.window.lock().samples.iter().cloned().collect();
        WeightedSnapshot::new(samples)
    }

    /// Append `other`'s window after ours, keeping the last `capacity` values.
    pub fn merge(&self, other: &SlidingWindowReservoir) {
        if std::ptr::eq(self, other) {
            return;
        }
        let (incoming, incoming_count) = {
            let theirs = other.window.lock();
            (theirs.samples.clone(), theirs.count)
        };
        let mut window = self.window.lock();
        window.count += incoming_count;
        for sample in incoming {
            window.push(self.capacity, sample);
        }
    }

    pub fn reset(&self) {
        let mut window = self.window.lock();
        window.count = 0;
        window.samples.clear();
    }
}

impl Window {
    fn push(&mut self, capacity: usize, sample: WeightedSample) {
        self.samples.push_back(sample);
        if self.samples.len() > capacity {
            self.samples.pop_front();
        }
    }
}
