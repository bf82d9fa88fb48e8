//! Prelude module for convenient imports

pub use crate::burst::{BurstHalt, BurstOutcome, Direction};
pub use crate::calibration::{CalibrationReport, TimingCalibrator};
pub use crate::combo::{ComboExecutor, ComboInterruption, ComboReport};
pub use crate::engine::{ActuationConfig, ActuationEngine, ActuationNotice, BurstTicket};
pub use crate::error::{ActuationError, ActuationResult};
pub use crate::sink::{PulseSink, RecordingSink, shared_sink};
pub use crate::timing_table::TimingTable;
