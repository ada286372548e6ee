use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use super::TimeUnit;
use crate::error::Result;
use crate::sampling::{Reservoir, SamplingType, Snapshot};

/// Distribution of values, sampled through a [`Reservoir`].
///
/// `count`, `sum`, `min`, `max` and the last value cover the whole stream;
/// the quantiles only cover what the reservoir currently retains.
pub struct Histogram {
    reservoir: Reservoir,
    stream: Mutex<StreamStats>,
}

#[derive(Debug, Clone, Default)]
struct StreamStats {
    count: i64,
    sum: f64,
    last: Option<(i64, Option<String>)>,
    min: Option<(i64, Option<String>)>,
    max: Option<(i64, Option<String>)>,
}

/// Point-in-time value of a [`Histogram`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramValue {
    pub count: i64,
    pub sum: f64,
    pub last_value: f64,
    pub last_user_value: Option<String>,
    pub min: f64,
    pub min_user_value: Option<String>,
    pub max: f64,
    pub max_user_value: Option<String>,
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub p75: f64,
    pub p95: f64,
    pub p98: f64,
    pub p99: f64,
    pub p999: f64,
    /// Number of samples the quantiles were computed over
    pub sample_size: usize,
}

impl HistogramValue {
    fn from_parts(stream: &StreamStats, snapshot: &dyn Snapshot) -> Self {
        let (last_value, last_user_value) = split(&stream.last);
        let (min, min_user_value) = split(&stream.min);
        let (max, max_user_value) = split(&stream.max);
        Self {
            count: stream.count,
            sum: stream.sum,
            last_value,
            last_user_value,
            min,
            min_user_value,
            max,
            max_user_value,
            mean: snapshot.mean(),
            std_dev: snapshot.std_dev(),
            median: snapshot.median(),
            p75: snapshot.percentile_75(),
            p95: snapshot.percentile_95(),
            p98: snapshot.percentile_98(),
            p99: snapshot.percentile_99(),
            p999: snapshot.percentile_999(),
            sample_size: snapshot.size(),
        }
    }

    /// Re-express every magnitude recorded in `from` as `to`.
    pub fn scale(&self, from: TimeUnit, to: TimeUnit) -> HistogramValue {
        if from == to {
            return self.clone();
        }
        let factor = from.scaling_factor_to(to);
        HistogramValue {
            count: self.count,
            sum: self.sum * factor,
            last_value: self.last_value * factor,
            last_user_value: self.last_user_value.clone(),
            min: self.min * factor,
            min_user_value: self.min_user_value.clone(),
            max: self.max * factor,
            max_user_value: self.max_user_value.clone(),
            mean: self.mean * factor,
            std_dev: self.std_dev * factor,
            median: self.median * factor,
            p75: self.p75 * factor,
            p95: self.p95 * factor,
            p98: self.p98 * factor,
            p99: self.p99 * factor,
            p999: self.p999 * factor,
            sample_size: self.sample_size,
        }
    }
}

fn split(entry: &Option<(i64, Option<String>)>) -> (f64, Option<String>) {
    match entry {
        Some((value, user_value)) => (*value as f64, user_value.clone()),
        None => (0.0, None),
    }
}

impl Histogram {
    pub fn new(reservoir: impl Into<Reservoir>) -> Self {
        Self {
            reservoir: reservoir.into(),
            stream: Mutex::new(StreamStats::default()),
        }
    }

    pub fn sampling_type(&self) -> SamplingType {
        self.reservoir.sampling_type()
    }

    pub fn update(&self, value: i64) {
        self.update_with(value, None);
    }

    /// Record `value`, remembering `user_value` if it becomes min/max/last.
    pub fn update_with(&self, value: i64, user_value: Option<&str>) {
        // Stream stats stay locked across the reservoir update so a
        // concurrent `value()` sees both or neither.
        let mut stream = self.stream.lock();
        stream.count += 1;
        stream.sum += value as f64;
        let tagged = || Some((value, user_value.map(String::from)));
        if stream.min.as_ref().map_or(true, |(min, _)| value < *min) {
            stream.min = tagged();
        }
        if stream.max.as_ref().map_or(true, |(max, _)| value > *max) {
            stream.max = tagged();
        }
        stream.last = tagged();
        self.reservoir.update(value, user_value);
    }

    pub fn count(&self) -> i64 {
        self.stream.lock().count
    }

    /// Frozen statistics over the retained samples.
    pub fn snapshot(&self) -> Arc<dyn Snapshot> {
        self.reservoir.snapshot()
    }

    pub fn value(&self) -> HistogramValue {
        let stream = self.stream.lock();
        let snapshot = self.reservoir.snapshot();
        HistogramValue::from_parts(&stream, snapshot.as_ref())
    }

    /// Fold `other` into `self`. Both must use the same sampling policy.
    pub fn merge(&self, other: &Histogram) -> Result<()> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        let theirs = other.stream.lock().clone();

        let mut stream = self.stream.lock();
        self.reservoir.merge(&other.reservoir)?;
        stream.count += theirs.count;
        stream.sum += theirs.sum;
        if let Some((value, uv)) = theirs.min {
            if stream.min.as_ref().map_or(true, |(min, _)| value < *min) {
                stream.min = Some((value, uv));
            }
        }
        if let Some((value, uv)) = theirs.max {
            if stream.max.as_ref().map_or(true, |(max, _)| value > *max) {
                stream.max = Some((value, uv));
            }
        }
        if stream.last.is_none() {
            stream.last = theirs.last;
        }
        Ok(())
    }

    pub fn reset(&self) {
        let mut stream = self.stream.lock();
        *stream = StreamStats::default();
        self.reservoir.reset();
    }
}
