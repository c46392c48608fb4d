//! Tick scheduling.
//!
//! The wait before the next maintenance tick is one smooth, monotone
//! function of the time since the last stimulus:
//!
//! ```text
//! interval = min_interval * (1 + since / knee) ^ exponent
//! ```
//!
//! It has no upper bound and no discrete modes. Before any stimulus has
//! arrived the engine counts from startup.

use std::time::Duration;

use crate::config::SchedulerConfig;

/// Computes the wait between maintenance ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct TickScheduler {
    min_interval: f64,
    knee: f64,
    exponent: f64,
}

impl TickScheduler {
    /// Build a scheduler from configuration.
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            min_interval: ms_to_secs(config.min_interval_ms),
            knee: ms_to_secs(config.knee_ms).max(f64::MIN_POSITIVE),
            exponent: config.growth_exponent,
        }
    }

    /// Interval in seconds after `since_stimulus` seconds of quiet.
    pub fn interval_secs(&self, since_stimulus: f64) -> f64 {
        let since = if since_stimulus.is_finite() {
            since_stimulus.max(0.0)
        } else {
            0.0
        };
        self.min_interval * (1.0 + since / self.knee).powf(self.exponent)
    }

    /// The same interval as a [`Duration`].
    pub fn next_interval(&self, since_stimulus: f64) -> Duration {
        let secs = self.interval_secs(since_stimulus);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

fn ms_to_secs(ms: u64) -> f64 {
    Duration::from_millis(ms).as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> TickScheduler {
        TickScheduler::new(&SchedulerConfig::default())
    }

    #[test]
    fn starts_at_min_interval() {
        let s = scheduler();
        assert!((s.interval_secs(0.0) - 0.1).abs() < 1e-12);
        assert_eq!(s.next_interval(0.0), Duration::from_millis(100));
    }

    #[test]
    fn matches_closed_form_at_knee() {
        let s = scheduler();
        let expected = 0.1 * 2.0_f64.powf(0.75);
        assert!((s.interval_secs(1.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn strictly_increasing_without_bound() {
        let s = scheduler();
        let mut previous = 0.0;
        for step in 0..200 {
            let since = f64::from(step) * 30.0;
            let interval = s.interval_secs(since);
            assert!(interval > previous);
            previous = interval;
        }
        assert!(s.interval_secs(1e9) > 1_000.0);
    }

    #[test]
    fn bad_inputs_fall_back_to_min() {
        let s = scheduler();
        assert!((s.interval_secs(-5.0) - 0.1).abs() < 1e-12);
        assert!((s.interval_secs(f64::NAN) - 0.1).abs() < 1e-12);
    }
}
