//! Pulse direction, burst planning and bound checks.
//!
//! All arithmetic here is feed-forward: a pulse is assumed to move the
//! control by exactly one step, but nothing is trusted until telemetry
//! reports it.

use incar_telemetry::{ControlDescriptor, ValueKind};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ActuationError, ActuationResult};

/// Slack subtracted before rounding a pulse count up, so that a delta that
/// is an exact multiple of the step does not gain a pulse from float noise.
pub const COUNT_EPSILON: f64 = 1e-9;

/// A float target moved by at least this much to reach the step grid is
/// reported to the user.
pub const ALIGN_NOTICE_EPSILON: f64 = 5e-4;

/// Which of the control's two bound inputs a pulse presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    /// +1.0 for increase, -1.0 for decrease.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Increase => 1.0,
            Direction::Decrease => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Increase => Direction::Decrease,
            Direction::Decrease => Direction::Increase,
        }
    }

    /// Whether `a` is further than `b` along this direction.
    pub fn is_beyond(self, a: f64, b: f64) -> bool {
        match self {
            Direction::Increase => a > b,
            Direction::Decrease => a < b,
        }
    }

    /// The further of two values along this direction.
    pub fn furthest(self, a: f64, b: f64) -> f64 {
        if self.is_beyond(a, b) { a } else { b }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Increase => write!(f, "increase"),
            Direction::Decrease => write!(f, "decrease"),
        }
    }
}

/// Whether one more pulse from `value` keeps the control in range.
pub fn can_step(descriptor: &ControlDescriptor, value: f64, direction: Direction) -> bool {
    descriptor.contains(value + direction.sign() * descriptor.step_size)
}

/// Whether the next pulse of a burst may be sent from `value`.
///
/// Same as [`can_step`], except that a burst aimed at the bound itself may
/// send the pulse that carries it past the bound: the simulator stops the
/// control at the bound, which is the target.
pub fn burst_can_step(descriptor: &ControlDescriptor, value: f64, plan: &BurstPlan) -> bool {
    if can_step(descriptor, value, plan.direction) {
        return true;
    }
    let bound = match plan.direction {
        Direction::Increase => descriptor.max_value,
        Direction::Decrease => descriptor.min_value,
    };
    descriptor.same_value(plan.target_value, bound)
        && !descriptor.same_value(value, bound)
        && plan.direction.is_beyond(bound, value)
}

/// Reject a pulse that would leave the control's range.
pub fn ensure_can_step(
    descriptor: &ControlDescriptor,
    value: f64,
    direction: Direction,
) -> ActuationResult<()> {
    if can_step(descriptor, value, direction) {
        Ok(())
    } else {
        Err(ActuationError::ControlAtBound {
            control_id: descriptor.id.clone(),
            direction,
            value,
        })
    }
}

/// Number of whole steps covering `delta`, rounded up.
#[expect(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    reason = "range is checked against 0 and u32::MAX before the cast"
)]
fn steps_for(delta: f64, step: f64) -> u32 {
    let steps = (delta.abs() / step - COUNT_EPSILON).ceil();
    if steps <= 0.0 {
        0
    } else if steps >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        steps as u32
    }
}

/// Pre-computed pulse sequence moving a control to a target value.
#[derive(Debug, Clone, PartialEq)]
pub struct BurstPlan {
    pub control_id: String,
    pub direction: Direction,
    pub pulses: u32,
    pub start_value: f64,
    /// Where the burst is headed; for float controls this is the requested
    /// value moved onto the step grid.
    pub target_value: f64,
    /// What the preset asked for.
    pub requested_value: f64,
}

impl BurstPlan {
    /// Plan a burst from the descriptor's current value to `target`.
    ///
    /// Float targets are aligned to the nearest value reachable in whole
    /// steps from the current value; see [`BurstPlan::is_aligned`]. When the
    /// aligned value would fall outside the range the requested bound is
    /// kept, since the simulator stops there.
    ///
    /// # Errors
    ///
    /// `TargetOutOfRange` when `target` is not finite or lies outside the
    /// control's range. Targets are never clamped.
    pub fn compute(descriptor: &ControlDescriptor, target: f64) -> ActuationResult<Self> {
        if !target.is_finite() || !descriptor.contains(target) {
            return Err(ActuationError::TargetOutOfRange {
                control_id: descriptor.id.clone(),
                value: target,
                min: descriptor.min_value,
                max: descriptor.max_value,
            });
        }
        if !(descriptor.step_size.is_finite() && descriptor.step_size > 0.0) {
            return Err(ActuationError::InvalidConfig(format!(
                "control {} reports step {}",
                descriptor.id, descriptor.step_size
            )));
        }

        let start = descriptor.current_value;
        let requested = target;
        let target = match descriptor.value_kind {
            ValueKind::Float => {
                let aligned =
                    start + ((target - start) / descriptor.step_size).round() * descriptor.step_size;
                if descriptor.contains(aligned) { aligned } else { target }
            }
            ValueKind::Integer => target,
        };
        let delta = target - start;
        let direction = if delta < 0.0 {
            Direction::Decrease
        } else {
            Direction::Increase
        };
        let pulses = if descriptor.same_value(start, target) {
            0
        } else {
            steps_for(delta, descriptor.step_size)
        };

        Ok(Self {
            control_id: descriptor.id.clone(),
            direction,
            pulses,
            start_value: start,
            target_value: target,
            requested_value: requested,
        })
    }

    /// One pulse from `value` in `direction`, with no alignment.
    pub fn single_step(descriptor: &ControlDescriptor, value: f64, direction: Direction) -> Self {
        let target = value + direction.sign() * descriptor.step_size;
        Self {
            control_id: descriptor.id.clone(),
            direction,
            pulses: 1,
            start_value: value,
            target_value: target,
            requested_value: target,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pulses == 0
    }

    /// Whether the target was moved noticeably to reach the step grid.
    pub fn is_aligned(&self) -> bool {
        (self.target_value - self.requested_value).abs() >= ALIGN_NOTICE_EPSILON
    }
}

/// Why a burst stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum BurstHalt {
    /// Every planned pulse was sent.
    Completed,
    /// Telemetry reported the target before the plan ran out.
    TargetReached,
    /// Telemetry reported a value past the target. Not corrected.
    Overshoot { observed: f64 },
    /// The next pulse would have left the control's range.
    AtBound,
    /// The burst ran past its time budget.
    TimedOut,
    /// Superseded by a newer request or an explicit cancel.
    Cancelled,
    /// The telemetry link went down mid-burst.
    Unavailable,
    /// The dispatcher was stopped or restarted.
    DispatcherStopped,
    /// The pulse sink failed.
    SinkFailed(String),
}

impl BurstHalt {
    /// Whether the control ended where the plan intended, as far as is known.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            BurstHalt::Completed | BurstHalt::TargetReached | BurstHalt::Overshoot { .. }
        )
    }
}

impl fmt::Display for BurstHalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BurstHalt::Completed => write!(f, "completed"),
            BurstHalt::TargetReached => write!(f, "target reached"),
            BurstHalt::Overshoot { observed } => write!(f, "overshoot to {observed}"),
            BurstHalt::AtBound => write!(f, "at bound"),
            BurstHalt::TimedOut => write!(f, "timed out"),
            BurstHalt::Cancelled => write!(f, "cancelled"),
            BurstHalt::Unavailable => write!(f, "controls unavailable"),
            BurstHalt::DispatcherStopped => write!(f, "dispatcher stopped"),
            BurstHalt::SinkFailed(reason) => write!(f, "sink failed: {reason}"),
        }
    }
}

/// Final report of one burst.
#[derive(Debug, Clone, PartialEq)]
pub struct BurstOutcome {
    pub control_id: String,
    pub direction: Direction,
    pub planned: u32,
    pub dispatched: u32,
    pub halt: BurstHalt,
}

impl BurstOutcome {
    /// Outcome of a plan that needed no pulses.
    pub fn already_there(plan: &BurstPlan) -> Self {
        Self {
            control_id: plan.control_id.clone(),
            direction: plan.direction,
            planned: 0,
            dispatched: 0,
            halt: BurstHalt::Completed,
        }
    }

    pub fn fully_dispatched(&self) -> bool {
        self.dispatched >= self.planned
    }
}

/// Compare live telemetry with the burst target.
///
/// Returns the halt reason once the target is reached or passed.
pub fn progress_halt(plan: &BurstPlan, live: &ControlDescriptor) -> Option<BurstHalt> {
    let observed = live.current_value;
    if live.same_value(observed, plan.target_value) {
        Some(BurstHalt::TargetReached)
    } else if plan.direction.is_beyond(observed, plan.target_value) {
        Some(BurstHalt::Overshoot { observed })
    } else {
        None
    }
}
