use hdrhistogram::Histogram;
use parking_lot::Mutex;

use super::snapshot::{check_quantile, Snapshot};
use crate::error::{MetricsError, Result};

/// Default precision: 3 significant figures.
pub const DEFAULT_SIGFIG: u8 = 3;

/// Log-linear bucketed histogram with O(1) updates.
///
/// Unlike the sampling reservoirs nothing is ever evicted; values are
/// quantised to `sigfig` significant figures instead. Negative values are
/// clamped to zero.
pub struct HdrReservoir {
    sigfig: u8,
    inner: Mutex<Inner>,
}

#[derive(Clone)]
struct Inner {
    histogram: Histogram<u64>,
    min: Option<(u64, Option<String>)>,
    max: Option<(u64, Option<String>)>,
}

impl HdrReservoir {
    pub fn new(sigfig: u8) -> Result<Self> {
        let histogram = Histogram::<u64>::new(sigfig)
            .map_err(|e| MetricsError::Config(format!("hdr histogram: {e:?}")))?;
        Ok(Self {
            sigfig,
            inner: Mutex::new(Inner {
                histogram,
                min: None,
                max: None,
            }),
        })
    }

    pub fn significant_figures(&self) -> u8 {
        self.sigfig
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().histogram.len()
    }

    pub fn update(&self, value: i64, user_value: Option<&str>) {
        let value = value.max(0) as u64;
        let mut inner = self.inner.lock();
        // Auto-resizing histogram: only fails on u64 overflow of counts
        if inner.histogram.record(value).is_err() {
            return;
        }
        if inner.min.as_ref().map_or(true, |(min, _)| value < *min) {
            inner.min = Some((value, user_value.map(Into::into)));
        }
        if inner.max.as_ref().map_or(true, |(max, _)| value > *max) {
            inner.max = Some((value, user_value.map(Into::into)));
        }
    }

    pub fn snapshot(&self) -> HdrSnapshot {
        let inner = self.inner.lock().clone();
        HdrSnapshot {
            histogram: inner.histogram,
            min_user_value: inner.min.and_then(|(_, uv)| uv),
            max_user_value: inner.max.and_then(|(_, uv)| uv),
        }
    }

    pub fn merge(&self, other: &HdrReservoir) {
        if std::ptr::eq(self, other) {
            return;
        }
        let theirs = other.inner.lock().clone();
        let mut inner = self.inner.lock();
        if inner.histogram.add(&theirs.histogram).is_err() {
            return;
        }
        if let Some((value, uv)) = theirs.min {
            if inner.min.as_ref().map_or(true, |(min, _)| value < *min) {
                inner.min = Some((value, uv));
            }
        }
        if let Some((value, uv)) = theirs.max {
            if inner.max.as_ref().map_or(true, |(max, _)| value > *max) {
                inner.max = Some((value, uv));
            }
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.histogram.reset();
        inner.min = None;
        inner.max = None;
    }
}

/// Frozen copy of an [`HdrReservoir`].
#[derive(Clone)]
pub struct HdrSnapshot {
    histogram: Histogram<u64>,
    min_user_value: Option<String>,
    max_user_value: Option<String>,
}

impl Snapshot for HdrSnapshot {
    fn size(&self) -> usize {
        self.histogram.len() as usize
    }

    fn value(&self, quantile: f64) -> Result<f64> {
        check_quantile(quantile)?;
        if self.histogram.len() == 0 {
            return Ok(0.0);
        }
        Ok(self.histogram.value_at_quantile(quantile) as f64)
    }

    fn min(&self) -> i64 {
        if self.histogram.len() == 0 {
            return 0;
        }
        self.histogram.min() as i64
    }

    fn max(&self) -> i64 {
        if self.histogram.len() == 0 {
            return 0;
        }
        self.histogram.max() as i64
    }

    fn mean(&self) -> f64 {
        if self.histogram.len() == 0 {
            return 0.0;
        }
        self.histogram.mean()
    }

    fn std_dev(&self) -> f64 {
        if self.histogram.len() <= 1 {
            return 0.0;
        }
        self.histogram.stdev()
    }

    fn min_user_value(&self) -> Option<&str> {
        self.min_user_value.as_deref()
    }

    fn max_user_value(&self) -> Option<&str> {
        self.max_user_value.as_deref()
    }

    /// One entry per populated bucket, not per observation.
    fn values(&self) -> Vec<i64> {
        self.histogram
            .iter_recorded()
            .map(|iv| iv.value_iterated_to() as i64)
            .collect()
    }
}
