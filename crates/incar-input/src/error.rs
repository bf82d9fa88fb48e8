//! Error types for input normalization and routing.

use thiserror::Error;

/// Errors produced by the input layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InputError {
    /// Identifier text could not be normalized.
    #[error("Invalid input identifier '{0}'")]
    InvalidIdentifier(String),

    /// One identifier is bound to two different actions.
    #[error("Input {input} is bound to both {first} and {second}")]
    Conflict {
        /// Canonical identifier.
        input: String,
        /// Existing action.
        first: String,
        /// Rejected action.
        second: String,
    },

    /// A command line from a text source could not be understood.
    #[error("Unrecognized input command: {0}")]
    UnknownCommand(String),

    /// The input queue had no room for a release. The input is still
    /// considered down; send the release again.
    #[error("Input queue full; release of {0} not delivered")]
    QueueFull(String),

    /// The engine side of the input channel is gone.
    #[error("Input channel closed")]
    ChannelClosed,
}

impl InputError {
    pub fn invalid(raw: impl Into<String>) -> Self {
        Self::InvalidIdentifier(raw.into())
    }

    /// Malformed identifiers and unknown commands are dropped and input
    /// continues; a closed channel means the engine is shutting down.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ChannelClosed)
    }
}

/// Result alias for input operations.
pub type InputResult<T> = std::result::Result<T, InputError>;
