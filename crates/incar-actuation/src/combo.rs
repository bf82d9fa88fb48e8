//! Combo execution.
//!
//! A combo's bursts are all planned from one catalog snapshot taken when the
//! combo starts. Steps are then dispatched in order, each as an ordinary
//! burst. The plans only hold for the car they were made on, so a link
//! loss, a dispatcher restart, a cancel, a pause or a session change
//! interrupts the combo and the remaining steps are discarded. Pulses already sent stay
//! sent.

use incar_profile_repository::ComboDefinition;
use incar_telemetry::{CatalogSnapshot, ControlDescriptor};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::burst::{BurstHalt, BurstOutcome, BurstPlan};
use crate::engine::ActuationEngine;
use crate::error::{ActuationError, ActuationResult};
use crate::timing_table::TimingTable;

/// A step that was sent to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedStep {
    pub index: usize,
    pub control_id: String,
    pub target_value: f64,
    pub outcome: BurstOutcome,
}

/// A step that could not be resolved and was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedStep {
    pub index: usize,
    pub control_id: String,
    pub reason: ActuationError,
}

/// Why a combo stopped before its last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComboInterruption {
    /// The telemetry link went down.
    LinkLost,
    /// The dispatcher was stopped or replaced by a restart.
    DispatcherStopped,
    /// Everything was cancelled, or a newer request took over a step's
    /// control.
    Cancelled,
    /// A different car or track is loaded; the planned steps no longer apply.
    SessionChanged,
    /// The engine left running mode.
    Paused,
}

impl fmt::Display for ComboInterruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkLost => write!(f, "telemetry link lost"),
            Self::DispatcherStopped => write!(f, "dispatcher stopped"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::SessionChanged => write!(f, "session changed"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

impl ComboInterruption {
    fn from_halt(halt: &BurstHalt) -> Option<Self> {
        match halt {
            BurstHalt::Unavailable => Some(Self::LinkLost),
            BurstHalt::DispatcherStopped => Some(Self::DispatcherStopped),
            BurstHalt::Cancelled => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// What a combo actually did.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComboReport {
    pub name: String,
    /// Catalog generation the bursts were planned from.
    pub snapshot_generation: u64,
    pub dispatched: Vec<DispatchedStep>,
    pub skipped: Vec<SkippedStep>,
    /// Control ids of steps dropped after the interruption.
    pub discarded: Vec<String>,
    pub interrupted: Option<ComboInterruption>,
}

impl ComboReport {
    /// Whether the combo stopped before its last resolvable step.
    pub fn is_partial(&self) -> bool {
        self.interrupted.is_some()
    }

    pub fn pulses(&self) -> u32 {
        self.dispatched
            .iter()
            .map(|s| s.outcome.dispatched)
            .fold(0, u32::saturating_add)
    }
}

/// Progress callback payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ComboProgress {
    pub name: String,
    /// Steps finished so far (dispatched or skipped).
    pub completed: usize,
    pub total: usize,
    pub control_id: String,
}

struct ResolvedStep {
    index: usize,
    target_value: f64,
    descriptor: ControlDescriptor,
    plan: BurstPlan,
}

/// Runs combos against an actuation engine.
#[derive(Debug, Clone)]
pub struct ComboExecutor {
    engine: Arc<ActuationEngine>,
}

impl ComboExecutor {
    pub fn new(engine: Arc<ActuationEngine>) -> Self {
        Self { engine }
    }

    /// Execute `combo`.
    ///
    /// Unknown controls and out-of-range targets are skipped. The report
    /// lists what was dispatched, skipped and discarded.
    ///
    /// # Errors
    ///
    /// `ControlsUnavailable` if the link is already down when the combo
    /// starts, `Paused` in config mode; nothing is dispatched.
    pub async fn execute(
        &self,
        combo: &ComboDefinition,
        timings: &TimingTable,
        mut on_progress: impl FnMut(&ComboProgress) + Send,
    ) -> ActuationResult<ComboReport> {
        if self.engine.is_paused() {
            return Err(ActuationError::Paused);
        }
        let catalog = self.engine.catalog();
        let link = catalog.link_state();
        if !link.accepts_actuation() {
            return Err(ActuationError::unavailable(link));
        }

        let snapshot = catalog.snapshot();
        let total = combo.steps.len();
        let mut report = ComboReport {
            name: combo.name.clone(),
            snapshot_generation: snapshot.generation(),
            ..ComboReport::default()
        };

        let mut resolved = Vec::with_capacity(total);
        for (index, step) in combo.steps.iter().enumerate() {
            let planned = snapshot
                .lookup(&step.control_id)
                .map_err(ActuationError::from)
                .and_then(|d| BurstPlan::compute(d, step.target_value).map(|plan| (d.clone(), plan)));
            match planned {
                Ok((descriptor, plan)) => resolved.push(ResolvedStep {
                    index,
                    target_value: step.target_value,
                    descriptor,
                    plan,
                }),
                Err(reason) => {
                    warn!(combo = %combo.name, control_id = %step.control_id, %reason, "Combo step skipped");
                    report.skipped.push(SkippedStep {
                        index,
                        control_id: step.control_id.clone(),
                        reason,
                    });
                }
            }
        }
        let mut completed = report.skipped.len();
        let cancellations = self.engine.cancellations();

        let mut steps = resolved.into_iter();
        for step in steps.by_ref() {
            let control_id = step.plan.control_id.clone();
            if let Some(reason) = self.interruption_before_step(&snapshot, cancellations) {
                report.interrupted = Some(reason);
                report.discarded.push(control_id);
                break;
            }

            let ticket = match self.engine.start_planned(
                &step.descriptor,
                step.plan,
                timings.for_control(&control_id),
            ) {
                Ok(ticket) => ticket,
                Err(ActuationError::ControlsUnavailable { .. }) => {
                    report.interrupted = Some(ComboInterruption::LinkLost);
                    report.discarded.push(control_id);
                    break;
                }
                Err(ActuationError::DispatcherStopped) => {
                    report.interrupted = Some(ComboInterruption::DispatcherStopped);
                    report.discarded.push(control_id);
                    break;
                }
                Err(ActuationError::Paused) => {
                    report.interrupted = Some(ComboInterruption::Paused);
                    report.discarded.push(control_id);
                    break;
                }
                Err(reason) => {
                    warn!(combo = %combo.name, control_id = %control_id, %reason, "Combo step not dispatched");
                    report.skipped.push(SkippedStep {
                        index: step.index,
                        control_id: control_id.clone(),
                        reason,
                    });
                    completed = completed.saturating_add(1);
                    continue;
                }
            };

            let outcome = ticket.wait().await;
            let interrupted = ComboInterruption::from_halt(&outcome.halt).map(|reason| {
                if reason == ComboInterruption::Cancelled && self.engine.is_paused() {
                    ComboInterruption::Paused
                } else {
                    reason
                }
            });
            report.dispatched.push(DispatchedStep {
                index: step.index,
                control_id: control_id.clone(),
                target_value: step.target_value,
                outcome,
            });
            completed = completed.saturating_add(1);
            on_progress(&ComboProgress {
                name: combo.name.clone(),
                completed,
                total,
                control_id,
            });
            if interrupted.is_some() {
                report.interrupted = interrupted;
                break;
            }
        }
        report
            .discarded
            .extend(steps.map(|step| step.plan.control_id));

        if report.is_partial() {
            warn!(
                combo = %combo.name,
                dispatched = report.dispatched.len(),
                discarded = report.discarded.len(),
                reason = %report.interrupted.map_or_else(String::new, |r| r.to_string()),
                "Combo interrupted; applied steps are not rolled back"
            );
        } else {
            info!(
                combo = %combo.name,
                dispatched = report.dispatched.len(),
                skipped = report.skipped.len(),
                pulses = report.pulses(),
                "Combo finished"
            );
        }
        Ok(report)
    }

    fn interruption_before_step(
        &self,
        snapshot: &CatalogSnapshot,
        cancellations: u64,
    ) -> Option<ComboInterruption> {
        if self.engine.is_paused() {
            return Some(ComboInterruption::Paused);
        }
        let catalog = self.engine.catalog();
        if !catalog.link_state().accepts_actuation() {
            return Some(ComboInterruption::LinkLost);
        }
        if self.engine.cancellations() != cancellations {
            return Some(ComboInterruption::Cancelled);
        }
        let live = catalog.snapshot();
        let same_car = match (snapshot.session(), live.session()) {
            (Some(planned), Some(current)) => planned.same_pairing(current),
            (None, None) => true,
            _ => false,
        };
        (!same_car).then_some(ComboInterruption::SessionChanged)
    }
}
