//! Error types for the watchdog supervisor.

use incar_telemetry::ErrorCategory;
use thiserror::Error;

/// Errors that can occur during watchdog operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchdogError {
    /// No loop with this name is supervised.
    #[error("Loop not registered: {0}")]
    UnknownLoop(String),

    /// A loop with this name is already supervised.
    #[error("Loop '{0}' is already registered")]
    AlreadyRegistered(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The loop could not recreate its execution context.
    #[error("Restart of '{name}' failed: {reason}")]
    RestartFailed {
        /// The loop that failed to restart.
        name: String,
        /// What the loop reported.
        reason: String,
    },
}

impl WatchdogError {
    /// Create an unknown loop error.
    #[must_use]
    pub fn unknown_loop(name: impl Into<String>) -> Self {
        Self::UnknownLoop(name.into())
    }

    /// Create an already registered error.
    #[must_use]
    pub fn already_registered(name: impl Into<String>) -> Self {
        Self::AlreadyRegistered(name.into())
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Create a restart failed error.
    #[must_use]
    pub fn restart_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RestartFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Where this error sits in the engine's error taxonomy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RestartFailed { .. } => ErrorCategory::Liveness,
            Self::UnknownLoop(_) | Self::AlreadyRegistered(_) | Self::InvalidConfiguration(_) => {
                ErrorCategory::Contract
            }
        }
    }

    /// A failed restart is retried on the next check; wiring mistakes are not.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RestartFailed { .. })
    }
}

/// A specialized `Result` type for watchdog operations.
pub type WatchdogResult<T> = std::result::Result<T, WatchdogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WatchdogError::restart_failed("actuation", "thread spawn refused");
        assert!(err.to_string().contains("actuation"));
        assert!(err.to_string().contains("thread spawn refused"));
    }

    #[test]
    fn test_error_classification() {
        let err = WatchdogError::restart_failed("telemetry", "no runtime");
        assert_eq!(err.category(), ErrorCategory::Liveness);
        assert!(err.is_recoverable());

        let err = WatchdogError::already_registered("telemetry");
        assert_eq!(err.category(), ErrorCategory::Contract);
        assert!(!err.is_recoverable());
    }
}
