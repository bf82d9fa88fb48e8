//! Pulse actuation for incar.
//!
//! Turns bound inputs into paced increase/decrease pulses:
//!
//! - **Hold-repeat**: one pulse on press, repeats after the initial delay
//!   until release or the control reaches a bound ([`hold`])
//! - **Preset bursts**: a pre-computed pulse count toward a target value,
//!   stopped early once telemetry reports the target ([`burst`])
//! - **Combos**: several bursts planned from one catalog snapshot and
//!   dispatched in order ([`combo`])
//! - **Timing calibration**: single pulses of growing length until the
//!   simulator registers them ([`calibration`])
//!
//! All pulses are emitted from a dedicated dispatcher thread ([`dispatcher`])
//! so input, telemetry and disk latency cannot disturb pulse cadence. The
//! [`ActuationEngine`] handle is what the rest of the system talks to.
//!
//! # Example
//!
//! ```no_run
//! use incar_actuation::prelude::*;
//! use incar_telemetry::ControlCatalog;
//! use incar_timing::TimingPreset;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), ActuationError> {
//! let catalog = Arc::new(ControlCatalog::new());
//! let engine = ActuationEngine::new(
//!     ActuationConfig::default(),
//!     Arc::clone(&catalog),
//!     shared_sink(RecordingSink::new()),
//! )?;
//! engine.start(None)?;
//! let ticket = engine.activate_preset("dcBrakeBias", 54.0, TimingPreset::Casual.profile())?;
//! let outcome = ticket.wait().await;
//! println!("{} pulses, {}", outcome.dispatched, outcome.halt);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(clippy::unwrap_used)]
#![deny(static_mut_refs)]
#![deny(unused_must_use)]

pub mod burst;
pub mod calibration;
pub mod combo;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod hold;
pub mod sink;
pub mod timing_table;

pub mod prelude;

pub use burst::{
    ALIGN_NOTICE_EPSILON, BurstHalt, BurstOutcome, BurstPlan, COUNT_EPSILON, Direction,
    burst_can_step, can_step,
};
pub use calibration::{
    CalibrationReport, CandidateResult, FLOAT_CHANGE_EPSILON, TimingCalibrator, value_changed,
};
pub use combo::{
    ComboExecutor, ComboInterruption, ComboProgress, ComboReport, DispatchedStep, SkippedStep,
};
pub use dispatcher::IDLE_TICK;
pub use engine::{
    ActuationConfig, ActuationEngine, ActuationNotice, ActuationNoticeReceiver,
    ActuationNoticeSender, BurstTicket, DEFAULT_BURST_TIMEOUT_MS, DEFAULT_DISPATCH_QUEUE,
    MAX_FLOAT_PRESS_EXTRA_MS, notice_channel,
};
pub use error::{ActuationError, ActuationResult};
pub use hold::{HoldEnd, HoldMachine, HoldState, HoldStep};
pub use sink::{Pulse, PulseSink, RecordedPulse, RecordingSink, SharedSink, shared_sink};
pub use timing_table::TimingTable;
