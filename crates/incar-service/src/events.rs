//! Typed events the engine publishes to the HUD, GUI and other observers.

use crate::commands::EngineMode;
use incar_actuation::{ActuationError, BurstOutcome, CalibrationReport, ComboReport};
use incar_profile_repository::ProfileKey;
use incar_telemetry::{LinkState, SessionIdentity, SessionState};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;

/// Capacity of the event bus. Slow subscribers see `Lagged` and skip ahead.
pub const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ValueChanged {
        control_id: String,
        previous: f64,
        current: f64,
    },
    CatalogRefreshed {
        generation: u64,
        available: usize,
        appeared: Vec<String>,
        vanished: Vec<String>,
    },
    SessionChanged {
        previous: Option<SessionIdentity>,
        current: SessionIdentity,
    },
    SessionStateChanged {
        session: SessionIdentity,
        previous: SessionState,
    },
    /// A profile became active. `from_disk` is false for a fresh default.
    ProfileLoaded {
        key: ProfileKey,
        from_disk: bool,
        bindings: usize,
        combos: usize,
    },
    ProfileSaved {
        key: ProfileKey,
        path: PathBuf,
        /// Controls saved without bounds checks (absent from the catalog).
        unchecked_controls: Vec<String>,
    },
    /// The stored record was unreadable; defaults are active instead.
    ProfileCorrupt {
        key: ProfileKey,
        path: PathBuf,
        reason: String,
    },
    LinkStatus {
        previous: LinkState,
        current: LinkState,
    },
    ActuationRejected {
        control_id: String,
        error: ActuationError,
    },
    /// A binding refers to a control the current car does not expose.
    BindingSkipped { control_id: String },
    BurstFinished(BurstOutcome),
    /// A float preset target was moved onto the control's step grid.
    TargetAligned {
        control_id: String,
        requested: f64,
        target: f64,
    },
    ModeChanged {
        previous: EngineMode,
        current: EngineMode,
    },
    CalibrationFinished(CalibrationReport),
    ComboProgress {
        name: String,
        completed: usize,
        total: usize,
        control_id: String,
    },
    ComboFinished(ComboReport),
    WatchdogRestart {
        loop_name: String,
        stalled_for: Duration,
        restarts_in_window: usize,
    },
    /// Loop restarts recur; the engine keeps running but needs attention.
    DegradedMode {
        loop_name: String,
        restarts_in_window: usize,
        window: Duration,
    },
    Warning { message: String },
}

impl EngineEvent {
    /// Short stable name, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValueChanged { .. } => "value_changed",
            Self::CatalogRefreshed { .. } => "catalog_refreshed",
            Self::SessionChanged { .. } => "session_changed",
            Self::SessionStateChanged { .. } => "session_state_changed",
            Self::ProfileLoaded { .. } => "profile_loaded",
            Self::ProfileSaved { .. } => "profile_saved",
            Self::ProfileCorrupt { .. } => "profile_corrupt",
            Self::LinkStatus { .. } => "link_status",
            Self::ActuationRejected { .. } => "actuation_rejected",
            Self::BindingSkipped { .. } => "binding_skipped",
            Self::BurstFinished(_) => "burst_finished",
            Self::TargetAligned { .. } => "target_aligned",
            Self::ModeChanged { .. } => "mode_changed",
            Self::CalibrationFinished(_) => "calibration_finished",
            Self::ComboProgress { .. } => "combo_progress",
            Self::ComboFinished(_) => "combo_finished",
            Self::WatchdogRestart { .. } => "watchdog_restart",
            Self::DegradedMode { .. } => "degraded_mode",
            Self::Warning { .. } => "warning",
        }
    }
}

/// Publishing side of the event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every current subscriber. No subscribers is not an error.
    pub fn publish(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("engine event dropped: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}
