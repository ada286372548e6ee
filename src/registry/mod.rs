pub mod context;
pub mod data;
pub mod root;

pub use context::{MetricsContext, PATH_SEPARATOR};
pub use data::{MetricValueEntry, MetricsData};
pub use root::Metrics;
