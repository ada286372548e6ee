use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::metrics::{CounterValue, HistogramValue, MeterValue, MetricTags, TimerValue, Unit};

/// One enumerated metric: its name, current value, unit and tags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValueEntry<T> {
    pub name: String,
    pub value: T,
    pub unit: Unit,
    pub tags: MetricTags,
}

/// Everything a context (and its children) held at collection time.
///
/// This is the read path reporters consume; serialise it with any serde
/// format.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsData {
    pub context: String,
    pub timestamp: DateTime<Utc>,
    pub gauges: Vec<MetricValueEntry<f64>>,
    pub counters: Vec<MetricValueEntry<CounterValue>>,
    pub meters: Vec<MetricValueEntry<MeterValue>>,
    pub histograms: Vec<MetricValueEntry<HistogramValue>>,
    pub timers: Vec<MetricValueEntry<TimerValue>>,
    pub children: Vec<MetricsData>,
}

impl MetricsData {
    /// Total number of metrics in this subtree.
    pub fn metric_count(&self) -> usize {
        self.gauges.len()
            + self.counters.len()
            + self.meters.len()
            + self.histograms.len()
            + self.timers.len()
            + self.children.iter().map(MetricsData::metric_count).sum::<usize>()
    }

    /// Find a descendant by dotted path relative to this context.
    pub fn child(&self, path: &str) -> Option<&MetricsData> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let child = self.children.iter().find(|c| c.context == head)?;
        match rest {
            Some(rest) => child.child(rest),
            None => Some(child),
        }
    }
}
