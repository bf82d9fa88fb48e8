//! Error types for profile repository operations

use incar_telemetry::ErrorCategory;
use incar_timing::TimingError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during binding store operations
#[derive(Error, Debug)]
pub enum ProfileStoreError {
    /// File system failure, with context
    #[error(transparent)]
    Storage(#[from] anyhow::Error),

    /// A stored record could not be decoded or does not match its key
    #[error("Profile corrupt at {path}: {reason}")]
    ProfileCorrupt {
        /// The offending file
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// Profile rejected before persistence
    #[error("Profile validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Profile could not be encoded
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ProfileStoreError {
    /// Create a corrupt-profile error
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ProfileCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Storage(_) => true,
            Self::ProfileCorrupt { .. } => true,
            Self::Validation(_) => false,
            Self::JsonError(_) => false,
        }
    }

    /// Taxonomy bucket for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Storage(_) => ErrorCategory::Transient,
            Self::ProfileCorrupt { .. } => ErrorCategory::Data,
            Self::Validation(_) | Self::JsonError(_) => ErrorCategory::Contract,
        }
    }
}

/// Validation-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Car or track name is empty after sanitization
    #[error("Profile has no car/track identity")]
    MissingIdentity,

    /// A binding is stored under a different key than its control id
    #[error("Binding stored under '{key}' refers to control '{control_id}'")]
    KeyMismatch {
        /// Map key
        key: String,
        /// Binding's control id
        control_id: String,
    },

    /// More presets than a binding allows
    #[error("Control '{control_id}' has {count} presets; at most {max} are allowed")]
    TooManyPresets {
        /// The control
        control_id: String,
        /// Presets supplied
        count: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Value is NaN or infinite
    #[error("{context}: value for '{control_id}' is not a finite number")]
    NonFiniteValue {
        /// Where the value appears
        context: String,
        /// The control
        control_id: String,
    },

    /// Value outside the control's reported bounds
    #[error("{context}: value {value} for '{control_id}' is out of range [{min}, {max}]")]
    ValueOutOfRange {
        /// Where the value appears
        context: String,
        /// The control
        control_id: String,
        /// The invalid value
        value: f64,
        /// Minimum allowed value
        min: f64,
        /// Maximum allowed value
        max: f64,
    },

    /// One input bound to two different actions
    #[error("Input {input} is bound to both {first} and {second}")]
    InputConflict {
        /// Canonical input id
        input: String,
        /// First action
        first: String,
        /// Second action
        second: String,
    },

    /// Combo without a name
    #[error("Combo name must not be empty")]
    EmptyComboName,

    /// Two combos share a name
    #[error("Duplicate combo name: {0}")]
    DuplicateCombo(String),

    /// Combo without steps
    #[error("Combo '{0}' has no steps")]
    EmptyCombo(String),

    /// Voice phrase is blank
    #[error("{0}: voice phrase is empty")]
    EmptyVoicePhrase(String),

    /// Timing parameters rejected
    #[error("{context}: {source}")]
    InvalidTiming {
        /// Profile timing or a control's override
        context: String,
        /// Underlying timing error
        source: TimingError,
    },
}

impl ValidationError {
    /// Create an out of range error
    pub fn out_of_range(
        context: impl Into<String>,
        control_id: impl Into<String>,
        value: f64,
        min: f64,
        max: f64,
    ) -> Self {
        Self::ValueOutOfRange {
            context: context.into(),
            control_id: control_id.into(),
            value,
            min,
            max,
        }
    }
}

/// Result type for repository operations
pub type ProfileStoreResult<T> = std::result::Result<T, ProfileStoreError>;
