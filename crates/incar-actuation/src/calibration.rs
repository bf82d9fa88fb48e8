//! Finding the shortest pulse the simulator registers.
//!
//! Single pulses are sent with press and gap both set to a candidate
//! duration. A candidate is accepted once `confirmations` pulses in a row
//! move the control's telemetry value. After each candidate the control is
//! stepped back toward where it started, which is best effort: the
//! simulator may have ignored some of those pulses too.

use incar_telemetry::{ControlDescriptor, ValueKind};
use incar_timing::CalibrationConfig;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::burst::{BurstHalt, BurstPlan, Direction, can_step};
use crate::engine::ActuationEngine;
use crate::error::{ActuationError, ActuationResult};

/// Float values that moved less than this are treated as unchanged.
pub const FLOAT_CHANGE_EPSILON: f64 = 5e-4;

/// One candidate duration and how many of its pulses registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateResult {
    pub ms: u64,
    pub registered: u32,
}

/// Result of a calibration run.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    pub control_id: String,
    pub direction: Direction,
    /// Shortest duration that registered every time, if any did.
    pub suggested_ms: Option<u64>,
    pub tried: Vec<CandidateResult>,
    /// Value before the first pulse and after the last restore pulse.
    pub baseline: f64,
    pub final_value: f64,
    /// Set when a pulse was cut short; the run stops there.
    pub aborted: Option<BurstHalt>,
}

impl CalibrationReport {
    /// Whether the control ended where it started.
    pub fn restored(&self, descriptor: &ControlDescriptor) -> bool {
        !value_changed(descriptor.value_kind, self.baseline, self.final_value)
    }
}

/// Whether telemetry moved from `before` to `after`.
pub fn value_changed(kind: ValueKind, before: f64, after: f64) -> bool {
    match kind {
        ValueKind::Float => (after - before).abs() >= FLOAT_CHANGE_EPSILON,
        ValueKind::Integer => (after.round() - before.round()).abs() >= 0.5,
    }
}

/// Runs calibration passes through an actuation engine.
#[derive(Debug, Clone)]
pub struct TimingCalibrator {
    engine: Arc<ActuationEngine>,
    config: CalibrationConfig,
}

impl TimingCalibrator {
    /// # Errors
    ///
    /// `InvalidConfig` when the schedule is unusable.
    pub fn new(engine: Arc<ActuationEngine>, config: CalibrationConfig) -> ActuationResult<Self> {
        config
            .validate()
            .map_err(|e| ActuationError::InvalidConfig(e.to_string()))?;
        Ok(Self { engine, config })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Search for the shortest registered pulse on `control_id`.
    ///
    /// Pulses go up unless the control sits at its maximum.
    ///
    /// # Errors
    ///
    /// `UnknownControl`, `ControlsUnavailable`, `Paused` or `QueueFull` from
    /// the engine; `ControlAtBound` when the control cannot move at all.
    pub async fn run(&self, control_id: &str) -> ActuationResult<CalibrationReport> {
        let start = self.engine.catalog().lookup(control_id)?;
        let baseline = start.current_value;
        let direction = if can_step(&start, baseline, Direction::Increase) {
            Direction::Increase
        } else if can_step(&start, baseline, Direction::Decrease) {
            Direction::Decrease
        } else {
            return Err(ActuationError::ControlAtBound {
                control_id: control_id.to_string(),
                direction: Direction::Increase,
                value: baseline,
            });
        };

        info!(control_id, %direction, baseline, "Timing calibration started");
        let mut report = CalibrationReport {
            control_id: control_id.to_string(),
            direction,
            suggested_ms: None,
            tried: Vec::new(),
            baseline,
            final_value: baseline,
            aborted: None,
        };

        for ms in self.config.candidates() {
            let registered = self.confirm(control_id, direction, ms, &mut report).await?;
            report.tried.push(CandidateResult { ms, registered });
            if report.aborted.is_none() {
                self.restore(control_id, baseline, ms, &mut report).await?;
            }
            if report.aborted.is_some() {
                break;
            }
            if registered >= self.config.confirmations {
                report.suggested_ms = Some(ms);
                break;
            }
            debug!(control_id, ms, registered, "Candidate not registered reliably");
        }

        report.final_value = self.engine.catalog().lookup(control_id)?.current_value;
        match report.suggested_ms {
            Some(ms) => info!(control_id, ms, "Timing calibration found a working pulse"),
            None => warn!(
                control_id,
                tried = report.tried.len(),
                aborted = ?report.aborted,
                "Timing calibration found no working pulse"
            ),
        }
        Ok(report)
    }

    /// Pulse until a pulse goes unregistered or enough have registered.
    async fn confirm(
        &self,
        control_id: &str,
        direction: Direction,
        ms: u64,
        report: &mut CalibrationReport,
    ) -> ActuationResult<u32> {
        let mut registered = 0;
        while registered < self.config.confirmations {
            let before = self.engine.catalog().lookup(control_id)?;
            if !can_step(&before, before.current_value, direction) {
                debug!(control_id, ms, "Control reached its bound during calibration");
                break;
            }
            if !self.pulse(&before, direction, ms, report).await? {
                break;
            }
            let after = self.engine.catalog().lookup(control_id)?;
            if !value_changed(after.value_kind, before.current_value, after.current_value) {
                break;
            }
            registered = registered.saturating_add(1);
        }
        Ok(registered)
    }

    /// Step back toward `baseline` with pulses of the same length.
    async fn restore(
        &self,
        control_id: &str,
        baseline: f64,
        ms: u64,
        report: &mut CalibrationReport,
    ) -> ActuationResult<()> {
        for _ in 0..self.config.restore_attempts {
            let current = self.engine.catalog().lookup(control_id)?;
            if !value_changed(current.value_kind, baseline, current.current_value) {
                break;
            }
            let toward = if current.current_value > baseline {
                Direction::Decrease
            } else {
                Direction::Increase
            };
            if !can_step(&current, current.current_value, toward)
                || !self.pulse(&current, toward, ms, report).await?
            {
                break;
            }
        }
        Ok(())
    }

    /// Send one pulse and let telemetry settle. Returns `false` when the
    /// pulse was cut short.
    async fn pulse(
        &self,
        descriptor: &ControlDescriptor,
        direction: Direction,
        ms: u64,
        report: &mut CalibrationReport,
    ) -> ActuationResult<bool> {
        let plan = BurstPlan::single_step(descriptor, descriptor.current_value, direction);
        let outcome = self
            .engine
            .start_exact(plan, CalibrationConfig::timing(ms))?
            .wait()
            .await;
        match &outcome.halt {
            BurstHalt::Cancelled | BurstHalt::Unavailable | BurstHalt::DispatcherStopped => {
                warn!(control_id = %descriptor.id, halt = %outcome.halt, "Calibration pulse cut short");
                report.aborted = Some(outcome.halt.clone());
                return Ok(false);
            }
            BurstHalt::SinkFailed(reason) => return Err(ActuationError::Sink(reason.clone())),
            _ => {}
        }
        tokio::time::sleep(self.config.settle()).await;
        Ok(true)
    }
}
