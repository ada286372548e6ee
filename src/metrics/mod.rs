pub mod counter;
pub mod ewma;
pub mod gauge;
pub mod histogram;
pub mod meter;
pub mod tags;
pub mod timer;
pub mod unit;

use std::fmt;

use serde::Serialize;

pub use counter::{Counter, CounterItem, CounterValue};
pub use gauge::Gauge;
pub use histogram::{Histogram, HistogramValue};
pub use meter::{Meter, MeterItem, MeterValue};
pub use tags::MetricTags;
pub use timer::{Timer, TimerContext, TimerValue};
pub use unit::{TimeUnit, Unit};

/// The five kinds of metric a context can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MetricType {
    Counter,
    Gauge,
    Meter,
    Histogram,
    Timer,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Meter => "meter",
            MetricType::Histogram => "histogram",
            MetricType::Timer => "timer",
        };
        f.write_str(name)
    }
}
