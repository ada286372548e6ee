use thiserror::Error;

use crate::metrics::MetricType;
use crate::sampling::SamplingType;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Everything the metrics core can reject.
///
/// Registration and configuration problems fail fast here; gauge evaluation
/// failures never surface as errors (they degrade to NaN instead).
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The `Default` alias was used where a concrete policy is required.
    #[error("sampling type {0:?} is not concrete, pick a specific policy")]
    InvalidSamplingType(SamplingType),

    #[error("metric '{name}' is already a {existing}, cannot register it as a {requested}")]
    MetricTypeMismatch {
        name: String,
        existing: MetricType,
        requested: MetricType,
    },

    #[error("quantile must be within [0, 1], got {0}")]
    InvalidQuantile(f64),

    #[error("invalid context name '{0}'")]
    InvalidContextName(String),

    #[error("cannot merge a {right} reservoir into a {left} reservoir")]
    ReservoirMismatch {
        left: SamplingType,
        right: SamplingType,
    },

    #[error("context '{0}' has been disposed")]
    ContextDisposed(String),

    #[error("scheduler must be started from within a tokio runtime")]
    SchedulerRuntime,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("configuration parse error: {0}")]
    Json(#[from] serde_json::Error),
}
