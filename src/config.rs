use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MetricsError, Result};
use crate::sampling::{exponentially_decaying, high_dynamic_range, SamplingType};

/// Settings shared by every context under one [`crate::Metrics`] root.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use metrics_observatory::MetricsConfig;
///
/// let config = MetricsConfig::from_json(r#"{ "reservoir_size": 256 }"#).unwrap();
/// assert_eq!(config.reservoir_size, 256);
/// assert_eq!(config.default_context_label, "Application");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Name given to the root context
    #[serde(default = "default_context_label")]
    pub default_context_label: String,

    /// Concrete policy the `SamplingType::Default` alias resolves to
    #[serde(default = "default_sampling_type")]
    pub default_sampling_type: SamplingType,

    /// Capacity of uniform, sliding-window and decaying reservoirs
    #[serde(default = "default_reservoir_size")]
    pub reservoir_size: usize,

    /// Decay factor (alpha) of the exponentially decaying reservoir
    #[serde(default = "default_decay_factor")]
    pub exponential_decay_factor: f64,

    /// Precision of high-dynamic-range histograms
    #[serde(default = "default_sigfig")]
    pub hdr_significant_figures: u8,

    /// How often scheduled reports run
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// A disabled root hands out working but unregistered metrics
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_context_label() -> String {
    "Application".into()
}
fn default_sampling_type() -> SamplingType {
    SamplingType::ExponentiallyDecaying
}
fn default_reservoir_size() -> usize {
    exponentially_decaying::DEFAULT_SIZE
}
fn default_decay_factor() -> f64 {
    exponentially_decaying::DEFAULT_ALPHA
}
fn default_sigfig() -> u8 {
    high_dynamic_range::DEFAULT_SIGFIG
}
fn default_report_interval() -> u64 {
    5
}
fn default_enabled() -> bool {
    true
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            default_context_label: default_context_label(),
            default_sampling_type: default_sampling_type(),
            reservoir_size: default_reservoir_size(),
            exponential_decay_factor: default_decay_factor(),
            hdr_significant_figures: default_sigfig(),
            report_interval_secs: default_report_interval(),
            enabled: default_enabled(),
        }
    }
}

impl MetricsConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MetricsConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break reservoirs or the scheduler.
    pub fn validate(&self) -> Result<()> {
        if !self.default_sampling_type.is_concrete() {
            warn!("default sampling type must be concrete");
            return Err(MetricsError::InvalidSamplingType(self.default_sampling_type));
        }
        if self.reservoir_size == 0 {
            return Err(MetricsError::Config(
                "reservoir_size must be greater than 0".into(),
            ));
        }
        if !self.exponential_decay_factor.is_finite() || self.exponential_decay_factor <= 0.0 {
            return Err(MetricsError::Config(
                "exponential_decay_factor must be a positive number".into(),
            ));
        }
        if !(1..=5).contains(&self.hdr_significant_figures) {
            return Err(MetricsError::Config(
                "hdr_significant_figures must be between 1 and 5".into(),
            ));
        }
        if self.report_interval_secs == 0 {
            return Err(MetricsError::Config(
                "report_interval_secs must be greater than 0".into(),
            ));
        }
        if self.default_context_label.is_empty() || self.default_context_label.contains('.') {
            return Err(MetricsError::InvalidContextName(
                self.default_context_label.clone(),
            ));
        }
        Ok(())
    }

    pub fn with_default_sampling_type(mut self, sampling: SamplingType) -> Result<Self> {
        if !sampling.is_concrete() {
            warn!("refusing to set the default alias as the default sampling type");
            return Err(MetricsError::InvalidSamplingType(sampling));
        }
        self.default_sampling_type = sampling;
        Ok(self)
    }

    pub fn with_reservoir_size(mut self, size: usize) -> Self {
        self.reservoir_size = size;
        self
    }

    pub fn with_decay_factor(mut self, alpha: f64) -> Self {
        self.exponential_decay_factor = alpha;
        self
    }

    pub fn with_context_label(mut self, label: impl Into<String>) -> Self {
        self.default_context_label = label.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_forward_decay_constants() {
        let config = MetricsConfig::default();
        assert_eq!(config.reservoir_size, 1028);
        assert_eq!(config.exponential_decay_factor, 0.015);
        assert_eq!(config.default_sampling_type, SamplingType::ExponentiallyDecaying);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(MetricsConfig::from_json("{}").unwrap(), MetricsConfig::default());
    }

    #[test]
    fn default_alias_cannot_be_the_default() {
        assert!(matches!(
            MetricsConfig::default().with_default_sampling_type(SamplingType::Default),
            Err(MetricsError::InvalidSamplingType(SamplingType::Default))
        ));
        assert!(matches!(
            MetricsConfig::from_json(r#"{ "default_sampling_type": "Default" }"#),
            Err(MetricsError::InvalidSamplingType(_))
        ));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(MetricsConfig::default().with_reservoir_size(0).validate().is_err());
        assert!(MetricsConfig::default().with_decay_factor(-1.0).validate().is_err());
        assert!(MetricsConfig::default().with_decay_factor(f64::NAN).validate().is_err());
        assert!(MetricsConfig::default().with_context_label("a.b").validate().is_err());
        assert!(matches!(
            MetricsConfig::from_json("not json"),
            Err(MetricsError::Json(_))
        ));
    }
}
