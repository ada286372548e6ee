use std::fmt;

use serde::{Deserialize, Serialize};

/// Free-form label describing what a metric counts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Unit(String);

impl Unit {
    pub fn custom(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn none() -> Self {
        Self::custom("")
    }

    pub fn requests() -> Self {
        Self::custom("Requests")
    }

    pub fn calls() -> Self {
        Self::custom("Calls")
    }

    pub fn items() -> Self {
        Self::custom("Items")
    }

    pub fn errors() -> Self {
        Self::custom("Errors")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Unit {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Unit {
    fn from(name: &str) -> Self {
        Self::custom(name)
    }
}

/// Time granularity used for durations and rate denominators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Length of one unit in nanoseconds.
    pub const fn nanos_per_unit(self) -> i64 {
        match self {
            Self::Nanoseconds => 1,
            Self::Microseconds => 1_000,
            Self::Milliseconds => 1_000_000,
            Self::Seconds => 1_000_000_000,
            Self::Minutes => 60 * 1_000_000_000,
            Self::Hours => 3_600 * 1_000_000_000,
            Self::Days => 86_400 * 1_000_000_000,
        }
    }

    pub fn to_nanos(self, value: i64) -> i64 {
        value.saturating_mul(self.nanos_per_unit())
    }

    /// Convert a whole `value` of `self` into `to`, truncating.
    pub fn convert(self, value: i64, to: TimeUnit) -> i64 {
        let from = self.nanos_per_unit();
        let target = to.nanos_per_unit();
        if from >= target {
            value.saturating_mul(from / target)
        } else {
            value / (target / from)
        }
    }

    /// Multiplier turning a quantity measured in `self` into `other`.
    ///
    /// `TimeUnit::Seconds.scaling_factor_to(TimeUnit::Minutes) == 1/60`.
    pub fn scaling_factor_to(self, other: TimeUnit) -> f64 {
        self.nanos_per_unit() as f64 / other.nanos_per_unit() as f64
    }

    pub const fn abbreviation(self) -> &'static str {
        match self {
            Self::Nanoseconds => "ns",
            Self::Microseconds => "us",
            Self::Milliseconds => "ms",
            Self::Seconds => "s",
            Self::Minutes => "min",
            Self::Hours => "h",
            Self::Days => "d",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_between_units() {
        assert_eq!(TimeUnit::Seconds.convert(3, TimeUnit::Milliseconds), 3_000);
        assert_eq!(TimeUnit::Milliseconds.convert(2_500, TimeUnit::Seconds), 2);
        assert_eq!(TimeUnit::Minutes.to_nanos(1), 60_000_000_000);
        assert_eq!(TimeUnit::Days.convert(1, TimeUnit::Hours), 24);
    }

    #[test]
    fn scaling_factor_between_rate_units() {
        let per_minute = 1.0 / TimeUnit::Seconds.scaling_factor_to(TimeUnit::Minutes);
        assert!((per_minute - 60.0).abs() < 1e-9);
        assert!(
            (TimeUnit::Nanoseconds.scaling_factor_to(TimeUnit::Milliseconds) - 1e-6).abs() < 1e-15
        );
    }
}
