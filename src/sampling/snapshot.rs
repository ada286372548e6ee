use std::cmp::Ordering;

use crate::error::{MetricsError, Result};

/// One retained observation.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSample {
    pub value: i64,
    pub weight: f64,
    pub user_value: Option<String>,
}

impl WeightedSample {
    pub fn new(value: i64, weight: f64, user_value: Option<String>) -> Self {
        Self {
            value,
            weight,
            user_value,
        }
    }

    /// A sample with unit weight, used by the unweighted reservoirs.
    pub fn unweighted(value: i64, user_value: Option<String>) -> Self {
        Self::new(value, 1.0, user_value)
    }
}

/// Immutable statistics over a reservoir's samples at one point in time.
pub trait Snapshot: Send + Sync {
    /// Number of samples the statistics were computed over.
    fn size(&self) -> usize;

    /// Value at `quantile`, which must be within `[0, 1]`.
    fn value(&self, quantile: f64) -> Result<f64>;

    fn min(&self) -> i64;
    fn max(&self) -> i64;
    fn mean(&self) -> f64;
    fn std_dev(&self) -> f64;

    fn min_user_value(&self) -> Option<&str>;
    fn max_user_value(&self) -> Option<&str>;

    /// Raw retained values, ascending.
    fn values(&self) -> Vec<i64>;

    fn median(&self) -> f64 {
        self.quantile_or_zero(0.5)
    }

    fn percentile_75(&self) -> f64 {
        self.quantile_or_zero(0.75)
    }

    fn percentile_95(&self) -> f64 {
        self.quantile_or_zero(0.95)
    }

    fn percentile_98(&self) -> f64 {
        self.quantile_or_zero(0.98)
    }

    fn percentile_99(&self) -> f64 {
        self.quantile_or_zero(0.99)
    }

    fn percentile_999(&self) -> f64 {
        self.quantile_or_zero(0.999)
    }

    #[doc(hidden)]
    fn quantile_or_zero(&self, quantile: f64) -> f64 {
        self.value(quantile).unwrap_or(0.0)
    }
}

pub(crate) fn check_quantile(quantile: f64) -> Result<()> {
    if quantile.is_nan() || !(0.0..=1.0).contains(&quantile) {
        return Err(MetricsError::InvalidQuantile(quantile));
    }
    Ok(())
}

// ─── WeightedSnapshot ────────────────────────────────────────────

/// Order statistics over a weighted sample set.
///
/// Samples are sorted ascending by value; weights are normalised against
/// their total and accumulated so quantile lookups are a binary search.
#[derive(Debug, Clone, Default)]
pub struct WeightedSnapshot {
    values: Vec<i64>,
    norm_weights: Vec<f64>,
    cumulative: Vec<f64>,
    min_user_value: Option<String>,
    max_user_value: Option<String>,
}

impl WeightedSnapshot {
    pub fn new(mut samples: Vec<WeightedSample>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        samples.sort_by(|a, b| a.value.cmp(&b.value));

        let total: f64 = samples.iter().map(|s| s.weight).sum();
        let len = samples.len();

        let mut values = Vec::with_capacity(len);
        let mut norm_weights = Vec::with_capacity(len);
        let mut cumulative = Vec::with_capacity(len);

        let mut running = 0.0;
        for sample in &samples {
            // A degenerate total falls back to equal weighting
            let w = if total > 0.0 && total.is_finite() {
                sample.weight / total
            } else {
                1.0 / len as f64
            };
            running += w;
            values.push(sample.value);
            norm_weights.push(w);
            cumulative.push(running);
        }

        let min_user_value = samples.first().and_then(|s| s.user_value.clone());
        let max_user_value = samples.last().and_then(|s| s.user_value.clone());

        Self {
            values,
            norm_weights,
            cumulative,
            min_user_value,
            max_user_value,
        }
    }

    /// Index of the first sample whose cumulative weight reaches `quantile`.
    fn index_of(&self, quantile: f64) -> usize {
        let idx = self.cumulative.partition_point(|&c| {
            c.partial_cmp(&quantile) == Some(Ordering::Less)
        });
        idx.min(self.values.len() - 1)
    }
}

impl Snapshot for WeightedSnapshot {
    fn size(&self) -> usize {
        self.values.len()
    }

    fn value(&self, quantile: f64) -> Result<f64> {
        check_quantile(quantile)?;
        if self.values.is_empty() {
            return Ok(0.0);
        }
        Ok(self.values[self.index_of(quantile)] as f64)
    }

    fn min(&self) -> i64 {
        self.values.first().copied().unwrap_or(0)
    }

    fn max(&self) -> i64 {
        self.values.last().copied().unwrap_or(0)
    }

    fn mean(&self) -> f64 {
        self.values
            .iter()
            .zip(&self.norm_weights)
            .map(|(&v, &w)| v as f64 * w)
            .sum()
    }

    fn std_dev(&self) -> f64 {
        if self.values.len() <= 1 {
            return 0.0;
        }
        let mean = self.mean();
        let variance: f64 = self
            .values
            .iter()
            .zip(&self.norm_weights)
            .map(|(&v, &w)| {
                let diff = v as f64 - mean;
                w * diff * diff
            })
            .sum();
        variance.sqrt()
    }

    fn min_user_value(&self) -> Option<&str> {
        self.min_user_value.as_deref()
    }

    fn max_user_value(&self) -> Option<&str> {
        self.max_user_value.as_deref()
    }

    fn values(&self) -> Vec<i64> {
        self.values.clone()
    }
}
