pub mod exponentially_decaying;
pub mod high_dynamic_range;
pub mod sliding_window;
pub mod snapshot;
pub mod uniform;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use exponentially_decaying::ExponentiallyDecayingReservoir;
pub use high_dynamic_range::{HdrReservoir, HdrSnapshot};
pub use sliding_window::SlidingWindowReservoir;
pub use snapshot::{Snapshot, WeightedSample, WeightedSnapshot};
pub use uniform::UniformReservoir;

use crate::clock::Clock;
use crate::config::MetricsConfig;
use crate::error::{MetricsError, Result};

/// Sampling policy picked once when a histogram is built.
///
/// `Default` is an alias resolved through [`MetricsConfig`] to one of the
/// four concrete policies; it can never itself be the configured default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SamplingType {
    #[default]
    Default,
    Uniform,
    SlidingWindow,
    ExponentiallyDecaying,
    HighDynamicRange,
}

impl SamplingType {
    pub fn is_concrete(self) -> bool {
        self != SamplingType::Default
    }

    /// Replace the `Default` alias with the configured concrete policy.
    pub fn resolve(self, config: &MetricsConfig) -> Result<SamplingType> {
        let resolved = match self {
            SamplingType::Default => config.default_sampling_type,
            concrete => concrete,
        };
        if !resolved.is_concrete() {
            return Err(MetricsError::InvalidSamplingType(resolved));
        }
        Ok(resolved)
    }
}

impl fmt::Display for SamplingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SamplingType::Default => "default",
            SamplingType::Uniform => "uniform",
            SamplingType::SlidingWindow => "sliding window",
            SamplingType::ExponentiallyDecaying => "exponentially decaying",
            SamplingType::HighDynamicRange => "high dynamic range",
        };
        f.write_str(name)
    }
}

// ─── Reservoir ───────────────────────────────────────────────────

/// Bounded sample of an unbounded stream, one of four policies.
///
/// Every variant serialises its own mutation and snapshot reads behind a
/// single mutex, so a snapshot never observes a half-applied update.
pub enum Reservoir {
    Uniform(UniformReservoir),
    SlidingWindow(SlidingWindowReservoir),
    ExponentiallyDecaying(ExponentiallyDecayingReservoir),
    HighDynamicRange(HdrReservoir),
}

impl Reservoir {
    /// Build the reservoir for `sampling`, resolving `Default` via `config`.
    pub fn build(
        sampling: SamplingType,
        config: &MetricsConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let reservoir = match sampling.resolve(config)? {
            SamplingType::Uniform => {
                Reservoir::Uniform(UniformReservoir::new(config.reservoir_size))
            }
            SamplingType::SlidingWindow => {
                Reservoir::SlidingWindow(SlidingWindowReservoir::new(config.reservoir_size))
            }
            SamplingType::ExponentiallyDecaying => {
                Reservoir::ExponentiallyDecaying(ExponentiallyDecayingReservoir::new(
                    config.reservoir_size,
                    config.exponential_decay_factor,
                    clock,
                ))
            }
            SamplingType::HighDynamicRange => {
                Reservoir::HighDynamicRange(HdrReservoir::new(config.hdr_significant_figures)?)
            }
            SamplingType::Default => {
                return Err(MetricsError::InvalidSamplingType(SamplingType::Default))
            }
        };
        Ok(reservoir)
    }

    pub fn sampling_type(&self) -> SamplingType {
        match self {
            Reservoir::Uniform(_) => SamplingType::Uniform,
            Reservoir::SlidingWindow(_) => SamplingType::SlidingWindow,
            Reservoir::ExponentiallyDecaying(_) => SamplingType::ExponentiallyDecaying,
            Reservoir::HighDynamicRange(_) => SamplingType::HighDynamicRange,
        }
    }

    pub fn update(&self, value: i64, user_value: Option<&str>) {
        match self {
            Reservoir::Uniform(r) => r.update(value, user_value),
            Reservoir::SlidingWindow(r) => r.update(value, user_value),
            Reservoir::ExponentiallyDecaying(r) => r.update(value, user_value),
            Reservoir::HighDynamicRange(r) => r.update(value, user_value),
        }
    }

    /// Copy of the current samples; later updates are never visible in it.
    pub fn snapshot(&self) -> Arc<dyn Snapshot> {
        match self {
            Reservoir::Uniform(r) => Arc::new(r.snapshot()),
            Reservoir::SlidingWindow(r) => Arc::new(r.snapshot()),
            Reservoir::ExponentiallyDecaying(r) => Arc::new(r.snapshot()),
            Reservoir::HighDynamicRange(r) => Arc::new(r.snapshot()),
        }
    }

    /// Combine `other` into `self`. Both must use the same policy.
    pub fn merge(&self, other: &Reservoir) -> Result<()> {
        match (self, other) {
            (Reservoir::Uniform(a), Reservoir::Uniform(b)) => a.merge(b),
            (Reservoir::SlidingWindow(a), Reservoir::SlidingWindow(b)) => a.merge(b),
            (Reservoir::ExponentiallyDecaying(a), Reservoir::ExponentiallyDecaying(b)) => {
                a.merge(b)
            }
            (Reservoir::HighDynamicRange(a), Reservoir::HighDynamicRange(b)) => a.merge(b),
            _ => {
                return Err(MetricsError::ReservoirMismatch {
                    left: self.sampling_type(),
                    right: other.sampling_type(),
                })
            }
        }
        Ok(())
    }

    pub fn reset(&self) {
        match self {
            Reservoir::Uniform(r) => r.reset(),
            Reservoir::SlidingWindow(r) => r.reset(),
            Reservoir::ExponentiallyDecaying(r) => r.reset(),
            Reservoir::HighDynamicRange(r) => r.reset(),
        }
    }
}

impl From<UniformReservoir> for Reservoir {
    fn from(r: UniformReservoir) -> Self {
        Reservoir::Uniform(r)
    }
}

impl From<SlidingWindowReservoir> for Reservoir {
    fn from(r: SlidingWindowReservoir) -> Self {
        Reservoir::SlidingWindow(r)
    }
}

impl From<ExponentiallyDecayingReservoir> for Reservoir {
    fn from(r: ExponentiallyDecayingReservoir) -> Self {
        Reservoir::ExponentiallyDecaying(r)
    }
}

impl From<HdrReservoir> for Reservoir {
    fn from(r: HdrReservoir) -> Self {
        Reservoir::HighDynamicRange(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new())
    }

    #[test]
    fn default_alias_resolves_through_config() {
        let config = MetricsConfig::default();
        let reservoir = Reservoir::build(SamplingType::Default, &config, clock()).unwrap();
        assert_eq!(reservoir.sampling_type(), config.default_sampling_type);

        let config = MetricsConfig::default()
            .with_default_sampling_type(SamplingType::SlidingWindow)
            .unwrap();
        let reservoir = Reservoir::build(SamplingType::Default, &config, clock()).unwrap();
        assert_eq!(reservoir.sampling_type(), SamplingType::SlidingWindow);
    }

    #[test]
    fn unresolvable_default_is_rejected() {
        let config = MetricsConfig {
            default_sampling_type: SamplingType::Default,
            ..MetricsConfig::default()
        };
        assert!(matches!(
            Reservoir::build(SamplingType::Default, &config, clock()),
            Err(MetricsError::InvalidSamplingType(SamplingType::Default))
        ));
    }

    #[test]
    fn builds_each_concrete_policy() {
        let config = MetricsConfig::default();
        for sampling in [
            SamplingType::Uniform,
            SamplingType::SlidingWindow,
            SamplingType::ExponentiallyDecaying,
            SamplingType::HighDynamicRange,
        ] {
            let reservoir = Reservoir::build(sampling, &config, clock()).unwrap();
            assert_eq!(reservoir.sampling_type(), sampling);
            reservoir.update(42, Some("answer"));
            let snapshot = reservoir.snapshot();
            assert_eq!(snapshot.size(), 1);
            assert_eq!(snapshot.max(), 42);
        }
    }

    #[test]
    fn merge_across_policies_fails() {
        let config = MetricsConfig::default();
        let uniform = Reservoir::build(SamplingType::Uniform, &config, clock()).unwrap();
        let window = Reservoir::build(SamplingType::SlidingWindow, &config, clock()).unwrap();
        assert!(matches!(
            uniform.merge(&window),
            Err(MetricsError::ReservoirMismatch { .. })
        ));
    }
}
