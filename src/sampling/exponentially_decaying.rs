use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::snapshot::{WeightedSample, WeightedSnapshot};
use crate::clock::Clock;
use crate::metrics::TimeUnit;

pub const DEFAULT_SIZE: usize = 1028;
pub const DEFAULT_ALPHA: f64 = 0.015;

/// Landmark is moved forward this often to keep priorities finite.
const RESCALE_THRESHOLD_NANOS: i64 = TimeUnit::Hours.nanos_per_unit();

/// Forward-decaying priority sample (Cormode et al.).
///
/// Newer observations get exponentially larger weights, so they are more
/// likely to be kept once the reservoir is full and count more heavily in
/// the resulting quantiles.
pub struct ExponentiallyDecayingReservoir {
    capacity: usize,
    alpha: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

struct State {
    samples: BTreeMap<Key, WeightedSample>,
    count: u64,
    next_seq: u64,
    landmark: i64,
    next_rescale: i64,
    rng: StdRng,
}

/// Map key: priority first, insertion sequence to keep equal priorities
/// apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    priority: Priority,
    seq: u64,
}

/// Sampling priority with a total order.
#[derive(Debug, Clone, Copy)]
struct Priority(f64);

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl ExponentiallyDecayingReservoir {
    pub fn new(capacity: usize, alpha: f64, clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(capacity, alpha, clock, StdRng::from_entropy())
    }

    pub fn with_seed(capacity: usize, alpha: f64, clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self::with_rng(capacity, alpha, clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, alpha: f64, clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        let now = clock.nanoseconds();
        Self {
            capacity: capacity.max(1),
            alpha,
            clock,
            state: Mutex::new(State {
                samples: BTreeMap::new(),
                count: 0,
                next_seq: 0,
                landmark: now,
                next_rescale: now + RESCALE_THRESHOLD_NANOS,
                rng,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Number of observations seen, retained or not.
    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    pub fn size(&self) -> usize {
        self.state.lock().samples.len()
    }

    pub fn update(&self, value: i64, user_value: Option<&str>) {
        let now = self.clock.nanoseconds();
        let mut state = self.state.lock();
        self.rescale_if_needed(&mut state, now);

        state.count += 1;
        let weight = self.forward_weight(now - state.landmark);
        // (0, 1] so the division below never blows up
        let u = 1.0 - state.rng.gen::<f64>();
        let priority = Priority(weight / u);
        let sample = WeightedSample::new(value, weight, user_value.map(Into::into));
        state.offer(self.capacity, priority, sample);
    }

    pub fn snapshot(&self) -> WeightedSnapshot {
        let now = self.clock.nanoseconds();
        let mut state = self.state.lock();
        self.rescale_if_needed(&mut state, now);
        WeightedSnapshot::new(state.samples.values().cloned().collect())
    }

    /// Fold `other`'s retained samples in, re-expressed against our landmark.
    pub fn merge(&self, other: &ExponentiallyDecayingReservoir) {
        if std::ptr::eq(self, other) {
            return;
        }
        let (incoming, incoming_count, other_landmark) = {
            let theirs = other.state.lock();
            let samples: Vec<(Priority, WeightedSample)> = theirs
                .samples
                .iter()
                .map(|(k, s)| (k.priority, s.clone()))
                .collect();
            (samples, theirs.count, theirs.landmark)
        };

        let now = self.clock.nanoseconds();
        let mut state = self.state.lock();
        self.rescale_if_needed(&mut state, now);

        let factor = self.forward_weight(other_landmark - state.landmark);
        state.count += incoming_count;
        for (priority, mut sample) in incoming {
            sample.weight *= factor;
            state.offer(self.capacity, Priority(priority.0 * factor), sample);
        }
    }

    pub fn reset(&self) {
        let now = self.clock.nanoseconds();
        let mut state = self.state.lock();
        state.samples.clear();
        state.count = 0;
        state.next_seq = 0;
        state.landmark = now;
        state.next_rescale = now + RESCALE_THRESHOLD_NANOS;
    }

    fn forward_weight(&self, elapsed_nanos: i64) -> f64 {
        let elapsed_secs = elapsed_nanos as f64 / TimeUnit::Seconds.nanos_per_unit() as f64;
        (self.alpha * elapsed_secs).exp()
    }

    /// Move the landmark to `now`, scaling every priority and weight down by
    /// the same factor so their relative order is unchanged.
    fn rescale_if_needed(&self, state: &mut State, now: i64) {
        if now < state.next_rescale {
            return;
        }
        let old_landmark = state.landmark;
        state.landmark = now;
        state.next_rescale = now + RESCALE_THRESHOLD_NANOS;

        let scale = self.forward_weight(old_landmark - now);
        let old = std::mem::take(&mut state.samples);
        for (key, mut sample) in old {
            sample.weight *= scale;
            // Fully decayed samples no longer contribute anything
            if sample.weight == 0.0 {
                continue;
            }
            let key = Key {
                priority: Priority(key.priority.0 * scale),
                seq: key.seq,
            };
            state.samples.insert(key, sample);
        }
        debug!(
            retained = state.samples.len(),
            scale, "rescaled exponentially decaying reservoir"
        );
    }

    #[cfg(test)]
    fn landmark(&self) -> i64 {
        self.state.lock().landmark
    }
}

impl State {
    fn offer(&mut self, capacity: usize, priority: Priority, sample: WeightedSample) {
        let key = Key {
            priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        if self.samples.len() < capacity {
            self.samples.insert(key, sample);
            return;
        }
        let Some((&lowest, _)) = self.samples.first_key_value() else {
            return;
        };
        if lowest.priority < priority {
            self.samples.remove(&lowest);
            self.samples.insert(key, sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sampling::Snapshot;

    fn reservoir(
        capacity: usize,
        alpha: f64,
    ) -> (Arc<ManualClock>, ExponentiallyDecayingReservoir) {
        let clock = Arc::new(ManualClock::new());
        let reservoir =
            ExponentiallyDecayingReservoir::with_seed(capacity, alpha, clock.clone(), 99);
        (clock, reservoir)
    }

    #[test]
    fn small_stream_is_kept_whole() {
        let (_, reservoir) = reservoir(100, DEFAULT_ALPHA);
        for i in 0..10 {
            reservoir.update(i, None);
        }
        assert_eq!(reservoir.size(), 10);
        assert_eq!(reservoir.snapshot().values(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn retained_set_is_bounded() {
        let (_, reservoir) = reservoir(100, 0.99);
        for i in 0..1_000 {
            reservoir.update(i, None);
        }
        assert_eq!(reservoir.size(), 100);
        assert_eq!(reservoir.count(), 1_000);
        assert!(reservoir
            .snapshot()
            .values()
            .iter()
            .all(|v| (0..1_000).contains(v)));
    }

    #[test]
    fn newer_values_dominate_after_time_passes() {
        let (clock, reservoir) = reservoir(10, DEFAULT_ALPHA);
        for _ in 0..100 {
            reservoir.update(1, None);
        }
        clock.advance(TimeUnit::Minutes, 30);
        for _ in 0..100 {
            reservoir.update(1_000, None);
        }
        let snapshot = reservoir.snapshot();
        // exp(0.015 * 1800) dwarfs any random priority of the old samples
        assert!(snapshot.values().iter().all(|&v| v == 1_000));
        assert_eq!(snapshot.median(), 1_000.0);
    }

    #[test]
    fn rescale_moves_the_landmark_and_keeps_samples() {
        let (clock, reservoir) = reservoir(10, DEFAULT_ALPHA);
        for i in 0..5 {
            reservoir.update(i, None);
        }
        clock.advance(TimeUnit::Hours, 2);
        reservoir.update(5, None);

        assert_eq!(reservoir.landmark(), TimeUnit::Hours.to_nanos(2));
        let snapshot = reservoir.snapshot();
        assert_eq!(snapshot.size(), 6);
        assert!(snapshot.mean().is_finite());
    }

    #[test]
    fn merge_keeps_capacity() {
        let (clock, left) = reservoir(5, DEFAULT_ALPHA);
        let right = ExponentiallyDecayingReservoir::with_seed(5, DEFAULT_ALPHA, clock.clone(), 3);
        for i in 0..5 {
            left.update(i, None);
            right.update(100 + i, None);
        }
        left.merge(&right);
        assert_eq!(left.size(), 5);
        assert_eq!(left.count(), 10);
    }

    #[test]
    fn reset_forgets_everything() {
        let (clock, reservoir) = reservoir(10, DEFAULT_ALPHA);
        reservoir.update(3, None);
        clock.advance(TimeUnit::Seconds, 10);
        reservoir.reset();
        assert_eq!(reservoir.size(), 0);
        assert_eq!(reservoir.count(), 0);
        assert_eq!(reservoir.landmark(), TimeUnit::Seconds.to_nanos(10));
    }

    #[test]
    fn equal_priorities_are_all_kept() {
        let mut state = State {
            samples: BTreeMap::new(),
            count: 0,
            next_seq: 0,
            landmark: 0,
            next_rescale: RESCALE_THRESHOLD_NANOS,
            rng: StdRng::seed_from_u64(1),
        };
        let sample = |v| WeightedSample::new(v, 1.0, None);

        state.offer(2, Priority(1.0), sample(1));
        state.offer(2, Priority(1.0), sample(2));
        assert_eq!(state.samples.len(), 2);

        // a tie with a retained non-minimum still outranks the minimum
        state.offer(3, Priority(5.0), sample(5));
        state.offer(3, Priority(5.0), sample(6));
        let values: Vec<i64> = state.samples.values().map(|s| s.value).collect();
        assert_eq!(values, vec![2, 5, 6]);

        // a tie with the minimum does not evict it
        state.offer(3, Priority(1.0), sample(7));
        let values: Vec<i64> = state.samples.values().map(|s| s.value).collect();
        assert_eq!(values, vec![2, 5, 6]);
    }
}
