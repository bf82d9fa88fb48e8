//! Error types for telemetry polling and catalog lookups.

use thiserror::Error;

/// Classification shared by every incar error type.
///
/// Mirrors the recovery strategy: transient errors are retried locally,
/// data errors fall back to defaults, liveness errors are handled by the
/// supervisor, and contract errors are rejected at a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Environment temporarily unavailable (simulator not running, control absent).
    Transient,
    /// Persisted or reported data is unusable.
    Data,
    /// A loop stopped making progress.
    Liveness,
    /// A caller violated an API contract.
    Contract,
}

/// Errors produced by the telemetry layer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TelemetryError {
    /// The simulator is not running or the driver is not in a car.
    #[error("Telemetry unavailable: {reason}")]
    TelemetryUnavailable {
        /// Why the read failed.
        reason: String,
    },

    /// A control id is not present in the latest scan.
    #[error("Unknown control: {0}")]
    UnknownControl(String),

    /// A read did not complete within the poll budget.
    #[error("Telemetry read timed out after {timeout_ms}ms")]
    Timeout {
        /// Budget that was exceeded.
        timeout_ms: u64,
    },

    /// The source returned data that could not be decoded.
    #[error("Invalid telemetry data: {0}")]
    InvalidData(String),
}

impl TelemetryError {
    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::TelemetryUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an unknown-control error.
    pub fn unknown_control(control_id: impl Into<String>) -> Self {
        Self::UnknownControl(control_id.into())
    }

    /// Every telemetry error is recoverable by waiting for the next poll.
    pub fn is_recoverable(&self) -> bool {
        true
    }

    /// Taxonomy bucket for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TelemetryUnavailable { .. } | Self::UnknownControl(_) | Self::Timeout { .. } => {
                ErrorCategory::Transient
            }
            Self::InvalidData(_) => ErrorCategory::Data,
        }
    }
}

/// Why a control descriptor cannot be actuated.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DescriptorError {
    #[error("control id is empty")]
    EmptyId,

    #[error("{control_id}: bounds are not finite")]
    NonFiniteBounds { control_id: String },

    #[error("{control_id}: min {min} exceeds max {max}")]
    InvertedBounds {
        control_id: String,
        min: f64,
        max: f64,
    },

    #[error("{control_id}: step size {step} is not positive")]
    NonPositiveStep { control_id: String, step: f64 },

    #[error("{control_id}: current value is not finite")]
    NonFiniteValue { control_id: String },
}

impl DescriptorError {
    /// Id of the offending control, if it had one.
    pub fn control_id(&self) -> Option<&str> {
        match self {
            Self::EmptyId => None,
            Self::NonFiniteBounds { control_id }
            | Self::InvertedBounds { control_id, .. }
            | Self::NonPositiveStep { control_id, .. }
            | Self::NonFiniteValue { control_id } => Some(control_id),
        }
    }
}

/// Unusable staleness thresholds.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum StalenessConfigError {
    #[error("stale_after_misses must be greater than 0")]
    ZeroStaleThreshold,

    #[error("disconnect_after_misses ({disconnect}) must be >= stale_after_misses ({stale})")]
    DisconnectBeforeStale { stale: u32, disconnect: u32 },
}

/// Result alias for telemetry operations.
pub type TelemetryResult<T> = std::result::Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_control_is_transient() {
        let err = TelemetryError::unknown_control("dcABS");
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(err.to_string().contains("dcABS"));
    }

    #[test]
    fn descriptor_errors_name_the_control() {
        let err = DescriptorError::NonPositiveStep {
            control_id: "dcABS".to_string(),
            step: 0.0,
        };
        assert_eq!(err.control_id(), Some("dcABS"));
        assert_eq!(err.to_string(), "dcABS: step size 0 is not positive");
        assert_eq!(DescriptorError::EmptyId.control_id(), None);
    }

    #[test]
    fn invalid_data_is_a_data_error() {
        let err = TelemetryError::InvalidData("bad json".to_string());
        assert_eq!(err.category(), ErrorCategory::Data);
        assert!(err.is_recoverable());
    }
}
