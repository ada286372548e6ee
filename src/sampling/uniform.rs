use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::snapshot::{WeightedSample, WeightedSnapshot};

pub const DEFAULT_SIZE: usize = 1028;

/// Equal-probability sample of the whole stream (Vitter's Algorithm R).
///
/// After `n` updates each observation is retained with probability
/// `capacity / n`.
pub struct UniformReservoir {
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    count: u64,
    samples: Vec<WeightedSample>,
    rng: StdRng,
}

impl UniformReservoir {
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    /// Deterministic variant for reproducible sampling.
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, rng: StdRng) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                count: 0,
                samples: Vec::with_capacity(capacity),
                rng,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of observations seen, retained or not.
    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }

    pub fn size(&self) -> usize {
        self.inner.lock().samples.len()
    }

    pub fn update(&self, value: i64, user_value: Option<&str>) {
        self.inner
            .lock()
            .offer(self.capacity, WeightedSample::unweighted(value, user_value.map(Into::into)));
    }

    pub fn snapshot(&self) -> WeightedSnapshot {
        WeightedSnapshot::new(self.inner.lock().samples.clone())
    }

    /// Fold `other`'s stream into this one.
    ///
    /// Each retained sample stands for `count / len` observations of its
    /// stream, so slots are drawn from either side in proportion to the
    /// observations still represented there. The logical count grows by
    /// everything `other` has seen.
    pub fn merge(&self, other: &UniformReservoir) {
        if std::ptr::eq(self, other) {
            return;
        }
        let (mut theirs, their_count) = {
            let other = other.inner.lock();
            (other.samples.clone(), other.count)
        };
        if their_count == 0 {
            return;
        }

        let mut inner = self.inner.lock();
        let mut ours = std::mem::take(&mut inner.samples);
        ours.shuffle(&mut inner.rng);
        theirs.shuffle(&mut inner.rng);

        let our_weight = represented(inner.count, ours.len());
        let their_weight = represented(their_count, theirs.len());
        let target = self.capacity.min(ours.len() + theirs.len());

        let mut merged = Vec::with_capacity(target);
        while merged.len() < target {
            let our_mass = ours.len() as f64 * our_weight;
            let their_mass = theirs.len() as f64 * their_weight;
            let take_ours = match (ours.is_empty(), theirs.is_empty()) {
                (false, true) => true,
                (true, false) => false,
                _ => inner.rng.gen::<f64>() * (our_mass + their_mass) < our_mass,
            };
            let next = if take_ours { ours.pop() } else { theirs.pop() };
            merged.extend(next);
        }

        inner.samples = merged;
        inner.count += their_count;
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.count = 0;
        inner.samples.clear();
    }
}

/// Observations each retained sample stands for.
fn represented(count: u64, retained: usize) -> f64 {
    if retained == 0 {
        0.0
    } else {
        count as f64 / retained as f64
    }
}

impl Inner {
    fn offer(&mut self, capacity: usize, sample: WeightedSample) {
        self.count += 1;
        if self.samples.len() < capacity {
            self.samples.push(sample);
            return;
        }
        let r = self.rng.gen_range(0..self.count);
        if (r as usize) < capacity {
            self.samples[r as usize] = sample;
        }
    }
}
