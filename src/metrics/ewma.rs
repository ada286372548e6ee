use crate::metrics::TimeUnit;

/// Interval between rate recomputations.
pub const TICK_INTERVAL_SECS: i64 = 5;
pub const TICK_INTERVAL_NANOS: i64 = TICK_INTERVAL_SECS * TimeUnit::Seconds.nanos_per_unit();

const ONE_MINUTE_SECS: f64 = 60.0;
const FIVE_MINUTES_SECS: f64 = 300.0;
const FIFTEEN_MINUTES_SECS: f64 = 900.0;

/// Exponentially-weighted moving average of a per-second rate.
///
/// Fed once per tick with the number of events seen during that tick.
#[derive(Debug, Clone)]
pub struct Ewma {
    alpha: f64,
    rate: f64,
    initialized: bool,
}

impl Ewma {
    /// EWMA that decays over `window_secs`, ticked every [`TICK_INTERVAL_SECS`].
    pub fn with_window(window_secs: f64) -> Self {
        Self::new(1.0 - (-(TICK_INTERVAL_SECS as f64) / window_secs).exp())
    }

    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            rate: 0.0,
            initialized: false,
        }
    }

    pub fn one_minute() -> Self {
        Self::with_window(ONE_MINUTE_SECS)
    }

    pub fn five_minutes() -> Self {
        Self::with_window(FIVE_MINUTES_SECS)
    }

    pub fn fifteen_minutes() -> Self {
        Self::with_window(FIFTEEN_MINUTES_SECS)
    }

    /// Fold one tick's worth of events into the average.
    ///
    /// The first tick seeds the average with the observed rate.
    pub fn tick(&mut self, events: i64) {
        let instant_rate = events as f64 / TICK_INTERVAL_SECS as f64;
        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }
    }

    /// Events per second; zero before the first tick.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn reset(&mut self) {
        self.rate = 0.0;
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elapse_minute(ewma: &mut Ewma) {
        for _ in 0..12 {
            ewma.tick(0);
        }
    }

    #[test]
    fn one_minute_rate_decays() {
        let mut ewma = Ewma::one_minute();
        ewma.tick(3);
        assert!((ewma.rate() - 0.6).abs() < 1e-6);

        elapse_minute(&mut ewma);
        assert!((ewma.rate() - 0.220_727_66).abs() < 1e-6);

        elapse_minute(&mut ewma);
        assert!((ewma.rate() - 0.081_201_17).abs() < 1e-6);
    }

    #[test]
    fn five_minute_rate_decays_slower() {
        let mut ewma = Ewma::five_minutes();
        ewma.tick(3);
        elapse_minute(&mut ewma);
        assert!((ewma.rate() - 0.491_238_45).abs() < 1e-6);
    }

    #[test]
    fn reset_clears_state() {
        let mut ewma = Ewma::fifteen_minutes();
        ewma.tick(10);
        ewma.reset();
        assert_eq!(ewma.rate(), 0.0);
        ewma.tick(5);
        assert!((ewma.rate() - 1.0).abs() < 1e-9);
    }
}
