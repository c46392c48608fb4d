//! Engine clock and time tracking.
//!
//! The clock is the single source of truth for temporal state in the
//! engine. It counts ticks, accumulates simulated seconds from each tick's
//! `dt`, and remembers when the last stimulus arrived so the scheduler can
//! derive the next wait.
//!
//! All tick arithmetic is checked; a counter overflow is an error rather
//! than a silent wrap.

/// Errors that can occur during clock operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// A time step was negative or not finite.
    #[error("invalid time step: {dt}")]
    InvalidDt {
        /// The rejected step in seconds.
        dt: f64,
    },
}

/// Tick counter plus simulated time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineClock {
    /// Ticks completed.
    tick: u64,
    /// Simulated seconds elapsed.
    sim_time: f64,
    /// Simulated time of the most recent stimulus.
    last_stimulus: Option<f64>,
}

impl EngineClock {
    /// Create a clock at tick 0 and time 0.
    pub const fn new() -> Self {
        Self {
            tick: 0,
            sim_time: 0.0,
            last_stimulus: None,
        }
    }

    /// Create a clock from explicit parameters (state restoration).
    pub const fn from_parts(tick: u64, sim_time: f64) -> Self {
        Self {
            tick,
            sim_time,
            last_stimulus: None,
        }
    }

    /// Check that a time step is finite and non-negative.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidDt`] otherwise.
    pub fn validate_dt(dt: f64) -> Result<f64, ClockError> {
        if dt.is_finite() && dt >= 0.0 {
            Ok(dt)
        } else {
            Err(ClockError::InvalidDt { dt })
        }
    }

    /// Advance by one tick of `dt` seconds. Returns the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidDt`] for a bad step (the clock is left
    /// untouched) or [`ClockError::TickOverflow`] if the counter would
    /// exceed `u64::MAX`.
    pub fn advance(&mut self, dt: f64) -> Result<u64, ClockError> {
        let dt = Self::validate_dt(dt)?;
        self.tick = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        self.sim_time += dt;
        Ok(self.tick)
    }

    /// Record that a stimulus arrived now.
    pub const fn mark_stimulus(&mut self) {
        self.last_stimulus = Some(self.sim_time);
    }

    /// Simulated seconds since the last stimulus, if there was one.
    pub fn since_stimulus(&self) -> Option<f64> {
        self.last_stimulus
            .map(|at| (self.sim_time - at).max(0.0))
    }

    /// Ticks completed.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Simulated seconds elapsed.
    pub const fn sim_time(&self) -> f64 {
        self.sim_time
    }
}
