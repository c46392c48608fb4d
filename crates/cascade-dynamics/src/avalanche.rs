//! Avalanche statistics.
//!
//! A cascade is a run of consecutive ticks on which at least one node
//! channel crossed its activation threshold; its size is the total number
//! of crossings in the run. Near criticality cascade sizes follow a power
//! law `P(s) ~ s^-tau` with `tau` around 1.5. The exponent is fitted with
//! the discrete maximum-likelihood approximation
//!
//! ```text
//! tau = 1 + n / sum(ln(s_i / (s_min - 0.5)))
//! ```
//!
//! and reported as the negative slope `-tau`.

use std::collections::VecDeque;

use crate::math::{count_f64, mean};

/// Most recent cascade sizes kept for fitting.
const MAX_SAMPLES: usize = 512;

/// Tracks cascades across ticks and fits their size exponent.
#[derive(Debug, Clone, Default)]
pub struct AvalancheTracker {
    current: u64,
    current_ticks: u64,
    sizes: VecDeque<u64>,
    durations: VecDeque<u64>,
}

impl AvalancheTracker {
    /// Create an empty tracker.
    pub const fn new() -> Self {
        Self {
            current: 0,
            current_ticks: 0,
            sizes: VecDeque::new(),
            durations: VecDeque::new(),
        }
    }

    /// Feed the number of threshold crossings observed this tick. Returns
    /// the size of a cascade that ended on this tick, if any.
    pub fn observe(&mut self, crossings: u64) -> Option<u64> {
        if crossings > 0 {
            self.current = self.current.saturating_add(crossings);
            self.current_ticks = self.current_ticks.saturating_add(1);
            return None;
        }
        if self.current == 0 {
            return None;
        }
        let size = std::mem::take(&mut self.current);
        let duration = std::mem::take(&mut self.current_ticks);
        self.sizes.push_back(size);
        self.durations.push_back(duration);
        while self.sizes.len() > MAX_SAMPLES {
            self.sizes.pop_front();
            self.durations.pop_front();
        }
        Some(size)
    }

    /// Number of completed cascades on record.
    pub fn completed(&self) -> usize {
        self.sizes.len()
    }

    /// Mean cascade size in crossings.
    pub fn mean_size(&self) -> f64 {
        mean_of(&self.sizes)
    }

    /// Mean cascade duration in ticks.
    pub fn mean_duration(&self) -> f64 {
        mean_of(&self.durations)
    }

    /// Fitted exponent `-tau`, once at least `min_cascades` are on record.
    pub fn exponent(&self, min_cascades: usize) -> Option<f64> {
        if self.sizes.len() < min_cascades.max(1) {
            return None;
        }
        let s_min = self.sizes.iter().copied().min()?;
        let floor = u32::try_from(s_min).map_or(f64::from(u32::MAX), f64::from) - 0.5;
        let log_sum: f64 = self
            .sizes
            .iter()
            .map(|&s| (u32::try_from(s).map_or(f64::from(u32::MAX), f64::from) / floor).ln())
            .sum();
        if log_sum <= 0.0 {
            return None;
        }
        let tau = 1.0 + count_f64(self.sizes.len()) / log_sum;
        Some(-tau)
    }

    /// Whether a fitted exponent lies inside `band` (inclusive).
    pub fn in_band(exponent: f64, band: (f64, f64)) -> bool {
        exponent >= band.0 && exponent <= band.1
    }
}

fn mean_of(samples: &VecDeque<u64>) -> f64 {
    let values: Vec<f64> = samples
        .iter()
        .map(|&s| u32::try_from(s).map_or(f64::from(u32::MAX), f64::from))
        .collect();
    mean(&values)
}
