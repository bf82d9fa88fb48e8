//! Search bounds for measuring the shortest pulse the simulator registers.
//!
//! Some simulators drop presses shorter than a frame or two. Calibration fires
//! single pulses with press and gap both set to a candidate duration, from
//! `start_ms` upwards, and reports the first duration whose pulses are seen
//! in telemetry `confirmations` times in a row. The search itself needs a
//! live simulator and lives with the actuation engine; this is its schedule.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{TimingError, TimingResult};
use crate::profile::{MAX_PRESS_MS, TimingProfile};

/// Calibration schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// First duration tried.
    pub start_ms: u64,
    /// Last duration tried.
    pub max_ms: u64,
    /// Increment between candidates.
    pub step_ms: u64,
    /// Wait after each pulse before reading telemetry.
    pub settle_ms: u64,
    /// Consecutive registered pulses needed to accept a duration.
    pub confirmations: u32,
    /// Pulses spent moving the control back after each candidate.
    pub restore_attempts: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            start_ms: 1,
            max_ms: 120,
            step_ms: 1,
            settle_ms: 50,
            confirmations: 2,
            restore_attempts: 5,
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> TimingResult<()> {
        if self.start_ms == 0 || self.step_ms == 0 {
            return Err(TimingError::InvalidCalibration(
                "start_ms and step_ms must be positive".to_string(),
            ));
        }
        if self.start_ms > self.max_ms {
            return Err(TimingError::InvalidCalibration(format!(
                "start_ms {} exceeds max_ms {}",
                self.start_ms, self.max_ms
            )));
        }
        if self.max_ms > MAX_PRESS_MS {
            return Err(TimingError::AboveMaximum {
                field: "calibration.max_ms",
                value: self.max_ms,
                ceiling: MAX_PRESS_MS,
            });
        }
        if self.confirmations == 0 {
            return Err(TimingError::InvalidCalibration(
                "confirmations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Candidate durations in the order they are tried.
    pub fn candidates(&self) -> impl Iterator<Item = u64> {
        let step = usize::try_from(self.step_ms.max(1)).unwrap_or(usize::MAX);
        (self.start_ms.max(1)..=self.max_ms).step_by(step)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Timing of one test pulse.
    pub fn timing(candidate_ms: u64) -> TimingProfile {
        TimingProfile::fixed(candidate_ms, candidate_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_walks_one_to_one_twenty() {
        let config = CalibrationConfig::default();
        assert!(config.validate().is_ok());
        let candidates: Vec<u64> = config.candidates().collect();
        assert_eq!(candidates.len(), 120);
        assert_eq!(candidates.first(), Some(&1));
        assert_eq!(candidates.last(), Some(&120));
    }

    #[test]
    fn coarse_steps_skip_ahead() {
        let config = CalibrationConfig {
            start_ms: 10,
            max_ms: 40,
            step_ms: 15,
            ..CalibrationConfig::default()
        };
        assert_eq!(config.candidates().collect::<Vec<_>>(), vec![10, 25, 40]);
    }

    #[test]
    fn unusable_bounds_are_rejected() {
        let inverted = CalibrationConfig {
            start_ms: 50,
            max_ms: 10,
            ..CalibrationConfig::default()
        };
        assert!(matches!(inverted.validate(), Err(TimingError::InvalidCalibration(_))));
        let too_long = CalibrationConfig {
            max_ms: MAX_PRESS_MS + 1,
            ..CalibrationConfig::default()
        };
        assert!(matches!(too_long.validate(), Err(TimingError::AboveMaximum { .. })));
        let unconfirmed = CalibrationConfig {
            confirmations: 0,
            ..CalibrationConfig::default()
        };
        assert!(unconfirmed.validate().is_err());
    }

    #[test]
    fn test_pulses_use_the_candidate_for_press_and_gap() {
        let timing = CalibrationConfig::timing(7).nominal(0);
        assert_eq!(timing.press, Duration::from_millis(7));
        assert_eq!(timing.gap, Duration::from_millis(7));
    }
}
