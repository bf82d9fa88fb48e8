//! Typed commands accepted by the engine and their replies.

use incar_actuation::{ActuationError, CalibrationReport, ComboReport};
use incar_profile_repository::{
    Binding, ComboDefinition, HudLayout, Profile, ProfileStoreError,
};
use incar_timing::{TimingError, TimingSelection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::oneshot;

/// Whether inputs drive the car.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// Inputs are routed and actuation runs.
    #[default]
    Running,
    /// Bindings are being edited. Presses are ignored and running holds,
    /// bursts and combos are stopped.
    Config,
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Config => f.write_str("config"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Insert or replace the binding for its control.
    Bind { binding: Binding },
    Unbind { control_id: String },
    /// Insert or replace a combo by name.
    SetCombo { combo: ComboDefinition },
    RemoveCombo { name: String },
    SetTiming { selection: TimingSelection },
    SetHudLayout { layout: HudLayout },
    /// Persist the active profile under the current session.
    Save,
    /// Run a combo of the active profile; replies when it finishes.
    ExecuteCombo { name: String },
    /// Switch between running and config mode.
    SetMode { mode: EngineMode },
    /// Search for the shortest pulse the simulator registers on a control;
    /// replies when the search ends.
    CalibrateTiming { control_id: String },
    /// Copy of the active profile, if any.
    CurrentProfile,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Done,
    Saved { path: PathBuf },
    ComboFinished(ComboReport),
    Calibrated(CalibrationReport),
    Mode(EngineMode),
    Profile(Option<Box<Profile>>),
}

/// Why a command was refused.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No session has been seen yet, so there is no profile to edit.
    #[error("No active session")]
    NoSession,

    #[error("Unknown combo: {0}")]
    UnknownCombo(String),

    #[error(transparent)]
    Store(#[from] ProfileStoreError),

    #[error(transparent)]
    Actuation(#[from] ActuationError),

    #[error(transparent)]
    Timing(#[from] TimingError),

    /// The engine loop has exited.
    #[error("Engine stopped")]
    Stopped,
}

pub type CommandResult = Result<CommandReply, CommandError>;

/// A command travelling to the engine loop with its reply slot.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) command: EngineCommand,
    pub(crate) reply: oneshot::Sender<CommandResult>,
}
