//! Pulse timing profiles for incar.
//!
//! A [`TimingSelection`] is what gets persisted: either one of the immutable
//! [`TimingPreset`]s or a [`CustomTiming`] owned by a profile. Resolving a
//! selection yields a [`TimingProfile`], which the actuation dispatcher
//! samples once per pulse.
//!
//! | Preset | Press | Gap | Hold delay |
//! |--------|-------|-----|------------|
//! | Aggressive | 10 ms | 10 ms | 250 ms |
//! | Casual | 80 ms | 100 ms | 400 ms |
//! | Relaxed | 150 ms | 200 ms | 500 ms |

#![deny(unsafe_op_in_unsafe_fn)]
#![deny(clippy::unwrap_used)]
#![deny(static_mut_refs)]

pub mod calibration;
pub mod error;
pub mod profile;

pub mod prelude;

pub use calibration::CalibrationConfig;
pub use error::{TimingError, TimingResult};
pub use profile::{
    CustomTiming, DEFAULT_FLOAT_PRESS_EXTRA_MS, MAX_INTERVAL_MS, MAX_PRESS_MS, MIN_CUSTOM_MS,
    MsRange, PulseTiming, RepeatAcceleration, TimingPreset, TimingProfile, TimingSelection,
};
