//! Error types for actuation requests.

use incar_telemetry::{ErrorCategory, LinkState, TelemetryError};
use thiserror::Error;

use crate::burst::Direction;

/// Errors produced when an actuation request cannot be carried out.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActuationError {
    /// The control cannot move further in the requested direction. No pulse
    /// was emitted.
    #[error("Control {control_id} is at its bound ({value}); cannot {direction}")]
    ControlAtBound {
        control_id: String,
        direction: Direction,
        value: f64,
    },

    /// The telemetry link is down; new requests are refused.
    #[error("Controls unavailable: telemetry link is {state}")]
    ControlsUnavailable { state: LinkState },

    /// The control is not exposed by the current car.
    #[error("Unknown control: {0}")]
    UnknownControl(String),

    /// A preset or combo target lies outside the control's live range.
    #[error("Target {value} for {control_id} outside [{min}, {max}]")]
    TargetOutOfRange {
        control_id: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// The dispatcher thread is not running.
    #[error("Actuation dispatcher is not running")]
    DispatcherStopped,

    /// The engine is in config mode; presses, presets and combos are refused.
    #[error("Actuation paused")]
    Paused,

    /// The dispatch queue is full; the request was dropped.
    #[error("Actuation queue full")]
    QueueFull,

    /// The dispatcher thread could not be created.
    #[error("Failed to spawn dispatcher thread: {0}")]
    ThreadSpawn(String),

    /// The pulse sink rejected a pulse.
    #[error("Pulse sink failed: {0}")]
    Sink(String),

    /// Configuration rejected at startup.
    #[error("Invalid actuation configuration: {0}")]
    InvalidConfig(String),
}

impl ActuationError {
    /// Create a controls-unavailable error.
    pub fn unavailable(state: LinkState) -> Self {
        Self::ControlsUnavailable { state }
    }

    /// Whether the engine continues normally after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidConfig(_))
    }

    /// Taxonomy bucket for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ControlAtBound { .. }
            | Self::ControlsUnavailable { .. }
            | Self::UnknownControl(_)
            | Self::Paused
            | Self::QueueFull
            | Self::Sink(_) => ErrorCategory::Transient,
            Self::TargetOutOfRange { .. } => ErrorCategory::Data,
            Self::DispatcherStopped | Self::ThreadSpawn(_) => ErrorCategory::Liveness,
            Self::InvalidConfig(_) => ErrorCategory::Contract,
        }
    }
}

impl From<TelemetryError> for ActuationError {
    fn from(err: TelemetryError) -> Self {
        match err {
            TelemetryError::UnknownControl(id) => Self::UnknownControl(id),
            TelemetryError::TelemetryUnavailable { .. }
            | TelemetryError::Timeout { .. }
            | TelemetryError::InvalidData(_) => Self::unavailable(LinkState::Stale),
        }
    }
}

/// Result alias for actuation operations.
pub type ActuationResult<T> = std::result::Result<T, ActuationError>;
