//! Error types for the `cascade-dynamics` crate.
//!
//! The mechanisms themselves never fail at steady state: irregular input is
//! reported through the [`AnomalyLog`](crate::anomaly::AnomalyLog). The only
//! hard error is a parameter set that cannot describe a working engine.

/// A configuration value outside its admissible range.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    /// A value must be finite and strictly positive.
    #[error("{name} must be finite and positive, got {value}")]
    NotPositive {
        /// Parameter name as it appears in the config file.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// A value must lie inside a closed interval.
    #[error("{name} must lie in [{min}, {max}], got {value}")]
    OutOfRange {
        /// Parameter name as it appears in the config file.
        name: &'static str,
        /// The rejected value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// A lower bound exceeds its upper bound.
    #[error("{name}: lower bound {min} exceeds upper bound {max}")]
    InvertedBounds {
        /// Parameter name as it appears in the config file.
        name: &'static str,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// A count or size must be non-zero.
    #[error("{name} must be at least 1")]
    Zero {
        /// Parameter name as it appears in the config file.
        name: &'static str,
    },
}
