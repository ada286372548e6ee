use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::debug;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type Provider = dyn Fn() -> Result<f64, BoxError> + Send + Sync;

/// Value computed on demand by a user-supplied function.
///
/// A provider that fails, by returning `Err` or by panicking, reads as NaN.
/// A broken gauge must never take a reporting pass down with it.
#[derive(Clone)]
pub struct Gauge {
    provider: Arc<Provider>,
}

impl Gauge {
    pub fn new<F>(provider: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self {
            provider: Arc::new(move || Ok(provider())),
        }
    }

    /// Gauge whose provider can report failure.
    pub fn try_new<F, E>(provider: F) -> Self
    where
        F: Fn() -> Result<f64, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            provider: Arc::new(move || provider().map_err(Into::into)),
        }
    }

    /// Gauge fixed at `value`.
    pub fn constant(value: f64) -> Self {
        Self::new(move || value)
    }

    /// Gauge over another gauge's current value.
    ///
    /// `source` is evaluated with the usual NaN policy first, then
    /// `transform` is applied under the same policy.
    pub fn derived<F>(source: &Gauge, transform: F) -> Self
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        let source = source.clone();
        Self::new(move || transform(source.value()))
    }

    /// `numerator / denominator`, NaN when the denominator is zero.
    pub fn ratio<N, D>(numerator: N, denominator: D) -> Self
    where
        N: Fn() -> f64 + Send + Sync + 'static,
        D: Fn() -> f64 + Send + Sync + 'static,
    {
        Self::new(move || {
            let d = denominator();
            if d == 0.0 {
                f64::NAN
            } else {
                numerator() / d
            }
        })
    }

    pub fn value(&self) -> f64 {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.provider)())) {
            Ok(Ok(value)) => value,
            Ok(Err(error)) => {
                debug!(%error, "gauge provider failed");
                f64::NAN
            }
            Err(_) => {
                debug!("gauge provider panicked");
                f64::NAN
            }
        }
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge").finish_non_exhaustive()
    }
}
