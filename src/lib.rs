//! In-process metrics instrumentation.
//!
//! Application code records counts, rates, distributions and durations
//! through cheap, thread-safe primitives; reporters read consistent,
//! immutable values back out of a tree of named contexts.
//!
//! ```
//! use metrics_observatory::{Metrics, MetricsConfig, SamplingType, TimeUnit, Unit};
//!
//! let metrics = Metrics::new(MetricsConfig::default()).unwrap();
//! let http = metrics.context("http").unwrap();
//!
//! let requests = http
//!     .timer("requests", Unit::requests(), SamplingType::Default,
//!            TimeUnit::Seconds, TimeUnit::Milliseconds)
//!     .unwrap();
//! requests.time(|| { /* handle the request */ });
//!
//! let data = metrics.data();
//! assert_eq!(data.child("http").unwrap().timers[0].value.histogram.count, 1);
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod sampling;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MetricsConfig;
pub use error::{MetricsError, Result};
pub use metrics::{
    Counter, CounterValue, Gauge, Histogram, HistogramValue, Meter, MeterValue, MetricTags,
    MetricType, TimeUnit, Timer, TimerContext, TimerValue, Unit,
};
pub use registry::{Metrics, MetricsContext, MetricValueEntry, MetricsData};
pub use sampling::{Reservoir, SamplingType, Snapshot, WeightedSnapshot};
pub use scheduler::{
    ActionScheduler, CancellationSignal, ManualScheduler, ScheduledAction, Scheduler,
};
