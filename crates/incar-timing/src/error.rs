//! Error types for timing profiles.

use incar_telemetry::ErrorCategory;
use thiserror::Error;

/// Invalid timing parameters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimingError {
    /// A range has `min > max`.
    #[error("Invalid range for {field}: {min}..{max}")]
    InvalidRange {
        /// Offending field.
        field: &'static str,
        /// Lower bound.
        min: u64,
        /// Upper bound.
        max: u64,
    },

    /// A duration is below the allowed floor.
    #[error("{field} of {value}ms is below the {floor}ms minimum")]
    BelowMinimum {
        /// Offending field.
        field: &'static str,
        /// Provided value.
        value: u64,
        /// Allowed floor.
        floor: u64,
    },

    /// A duration can exceed the allowed ceiling.
    #[error("{field} can reach {value}ms, above the {ceiling}ms maximum")]
    AboveMaximum {
        /// Offending field.
        field: &'static str,
        /// Longest value the field can produce.
        value: u64,
        /// Allowed ceiling.
        ceiling: u64,
    },

    /// Calibration search bounds are unusable.
    #[error("Invalid timing calibration: {0}")]
    InvalidCalibration(String),

    /// Acceleration factor outside `(0, 1]`.
    #[error("Acceleration factor {0} must be in (0, 1]")]
    InvalidAcceleration(String),
}

impl TimingError {
    /// Timing errors are contract violations and are rejected before use.
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Contract
    }

    /// Never recoverable by retrying with the same input.
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

/// Result alias for timing operations.
pub type TimingResult<T> = std::result::Result<T, TimingError>;
