//! Prelude for incar-timing.

pub use crate::error::{TimingError, TimingResult};
pub use crate::calibration::CalibrationConfig;
pub use crate::profile::{
    CustomTiming, MsRange, PulseTiming, TimingPreset, TimingProfile, TimingSelection,
};
