//! The dispatcher thread.
//!
//! Every pulse is emitted here, on a dedicated OS thread fed by a bounded
//! crossbeam channel. Pacing is deadline based: each hold or burst carries
//! the instant its next pulse is due, and the loop sleeps in
//! `recv_timeout` until the earliest deadline or the next command.
//! Nothing on this thread touches the disk or awaits a future.

use crossbeam::channel::{Receiver, RecvTimeoutError};
use incar_input::InputId;
use incar_telemetry::{BeatFn, ControlCatalog};
use incar_timing::TimingProfile;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::burst::{BurstHalt, BurstOutcome, BurstPlan, Direction, burst_can_step, progress_halt};
use crate::engine::{ActuationNotice, ActuationNoticeSender};
use crate::error::ActuationError;
use crate::hold::{HoldEnd, HoldMachine, HoldStep};
use crate::sink::{Pulse, SharedSink};

/// Longest the loop sleeps without a command or a due pulse. Bounds the
/// heartbeat period and the reaction time to a link loss.
pub const IDLE_TICK: Duration = Duration::from_millis(50);

/// Requests accepted by the dispatcher thread.
#[derive(Debug)]
pub(crate) enum DispatchCommand {
    Press {
        control_id: String,
        input: InputId,
        direction: Direction,
        timing: TimingProfile,
    },
    Release {
        control_id: String,
        input: InputId,
    },
    Burst {
        plan: BurstPlan,
        timing: TimingProfile,
        done: oneshot::Sender<BurstOutcome>,
    },
    CancelAll,
    Shutdown,
}

impl DispatchCommand {
    /// Commands that only end work. They may use the queue headroom that
    /// new presses and bursts cannot.
    pub(crate) fn is_terminating(&self) -> bool {
        matches!(self, Self::Release { .. } | Self::CancelAll | Self::Shutdown)
    }
}

type HoldKey = (String, InputId);

#[derive(Debug)]
struct BurstRun {
    plan: BurstPlan,
    timing: TimingProfile,
    sent: u32,
    started: Instant,
    next_due: Instant,
    done: Option<oneshot::Sender<BurstOutcome>>,
}

enum Slot {
    Hold(HoldKey),
    Burst(String),
}

/// Everything the dispatcher thread owns. Recreated on restart; the catalog
/// and sink are shared with the previous generation.
pub(crate) struct Dispatcher {
    generation: u64,
    current_generation: Arc<AtomicU64>,
    catalog: Arc<ControlCatalog>,
    sink: SharedSink,
    commands: Receiver<DispatchCommand>,
    notices: Option<ActuationNoticeSender>,
    beat: Option<BeatFn>,
    burst_timeout: Duration,
    pulses_emitted: Arc<AtomicU64>,
    paused: Arc<AtomicBool>,
    rng: StdRng,
    holds: HashMap<HoldKey, HoldMachine>,
    bursts: HashMap<String, BurstRun>,
}

impl Dispatcher {
    #[expect(
        clippy::too_many_arguments,
        reason = "every argument is state shared with the engine handle"
    )]
    pub(crate) fn new(
        generation: u64,
        current_generation: Arc<AtomicU64>,
        catalog: Arc<ControlCatalog>,
        sink: SharedSink,
        commands: Receiver<DispatchCommand>,
        notices: Option<ActuationNoticeSender>,
        beat: Option<BeatFn>,
        burst_timeout: Duration,
        pulses_emitted: Arc<AtomicU64>,
        paused: Arc<AtomicBool>,
        rng: StdRng,
    ) -> Self {
        Self {
            generation,
            current_generation,
            catalog,
            sink,
            commands,
            notices,
            beat,
            burst_timeout,
            pulses_emitted,
            paused,
            rng,
            holds: HashMap::new(),
            bursts: HashMap::new(),
        }
    }

    /// Thread body. Returns when shut down, superseded by a newer
    /// generation, or when every command sender is gone.
    pub(crate) fn run(mut self) {
        info!(generation = self.generation, "Actuation dispatcher started");
        self.notify(ActuationNotice::DispatcherStarted {
            generation: self.generation,
        });

        'outer: loop {
            if self.current_generation.load(Ordering::Acquire) != self.generation {
                debug!(generation = self.generation, "Dispatcher superseded");
                break;
            }
            if let Some(beat) = &self.beat {
                beat();
            }

            let link = self.catalog.link_state();
            if !link.accepts_actuation() && self.has_work() {
                warn!(%link, "Telemetry link lost; cancelling holds and bursts");
                self.end_all(&HoldEnd::Unavailable, &BurstHalt::Unavailable);
            }

            let now = Instant::now();
            let wait = self
                .next_due()
                .map_or(IDLE_TICK, |due| due.saturating_duration_since(now).min(IDLE_TICK));

            match self.commands.recv_timeout(wait) {
                Ok(command) => {
                    if !self.handle(command) {
                        break;
                    }
                    while let Ok(command) = self.commands.try_recv() {
                        if !self.handle(command) {
                            break 'outer;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            self.fire_due();
        }

        self.end_all(&HoldEnd::DispatcherStopped, &BurstHalt::DispatcherStopped);
        self.notify(ActuationNotice::DispatcherStopped {
            generation: self.generation,
        });
        info!(generation = self.generation, "Actuation dispatcher stopped");
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn has_work(&self) -> bool {
        !self.holds.is_empty() || !self.bursts.is_empty()
    }

    fn next_due(&self) -> Option<Instant> {
        let holds = self.holds.values().filter_map(HoldMachine::due);
        let bursts = self.bursts.values().map(|b| b.next_due);
        holds.chain(bursts).min()
    }

    fn notify(&self, notice: ActuationNotice) {
        if let Some(tx) = &self.notices
            && tx.send(notice).is_err()
        {
            trace!("Actuation notice dropped; no listener");
        }
    }

    /// Returns `false` when the loop should exit.
    fn handle(&mut self, command: DispatchCommand) -> bool {
        match command {
            DispatchCommand::Press { control_id, .. } if self.is_paused() => {
                debug!(control_id = %control_id, "Paused; queued press dropped");
                self.notify(ActuationNotice::Rejected {
                    control_id,
                    error: ActuationError::Paused,
                });
            }
            DispatchCommand::Press {
                control_id,
                input,
                direction,
                timing,
            } => self.start_hold(control_id, input, direction, timing),
            DispatchCommand::Release { control_id, input } => {
                if let Some(mut hold) = self.holds.remove(&(control_id, input)) {
                    let end = hold.release();
                    self.hold_ended(&hold, end);
                }
            }
            DispatchCommand::Burst { plan, timing, done } if self.is_paused() => {
                debug!(control_id = %plan.control_id, "Paused; queued burst dropped");
                let now = Instant::now();
                let run = BurstRun {
                    plan,
                    timing,
                    sent: 0,
                    started: now,
                    next_due: now,
                    done: Some(done),
                };
                self.burst_finished(run, BurstHalt::Cancelled);
            }
            DispatchCommand::Burst { plan, timing, done } => self.start_burst(plan, timing, done),
            DispatchCommand::CancelAll => {
                self.end_all(&HoldEnd::Cancelled, &BurstHalt::Cancelled);
            }
            DispatchCommand::Shutdown => return false,
        }
        true
    }

    fn start_hold(
        &mut self,
        control_id: String,
        input: InputId,
        direction: Direction,
        timing: TimingProfile,
    ) {
        let key = (control_id, input);
        if self.holds.contains_key(&key) {
            trace!(control_id = %key.0, input = %key.1, "Hold already active");
            return;
        }
        let link = self.catalog.link_state();
        if !link.accepts_actuation() {
            self.notify(ActuationNotice::Rejected {
                control_id: key.0,
                error: ActuationError::unavailable(link),
            });
            return;
        }
        let live = match self.catalog.lookup(&key.0) {
            Ok(live) => live,
            Err(e) => {
                self.notify(ActuationNotice::Rejected {
                    control_id: key.0,
                    error: e.into(),
                });
                return;
            }
        };

        let mut hold = HoldMachine::new(key.0.clone(), key.1.clone(), direction, timing);
        let step = hold.press(&live, Instant::now(), &mut self.rng);
        match step {
            HoldStep::Pulse(pulse) => {
                if let Err(reason) = self.emit(&key.0, direction, pulse.press) {
                    let end = HoldEnd::SinkFailed(reason);
                    self.hold_ended(&hold, end);
                    return;
                }
                debug!(control_id = %key.0, input = %key.1, %direction, "Hold started");
                self.holds.insert(key, hold);
            }
            HoldStep::Finished(HoldEnd::AtBound) => {
                debug!(control_id = %key.0, %direction, value = live.current_value, "Control at bound; press ignored");
                self.notify(ActuationNotice::Rejected {
                    control_id: key.0.clone(),
                    error: ActuationError::ControlAtBound {
                        control_id: key.0,
                        direction,
                        value: live.current_value,
                    },
                });
            }
            HoldStep::Finished(end) => self.hold_ended(&hold, end),
            HoldStep::Wait => {}
        }
    }

    fn start_burst(
        &mut self,
        plan: BurstPlan,
        timing: TimingProfile,
        done: oneshot::Sender<BurstOutcome>,
    ) {
        let control_id = plan.control_id.clone();
        if let Some(previous) = self.bursts.remove(&control_id) {
            debug!(control_id = %control_id, "Burst superseded");
            self.burst_finished(previous, BurstHalt::Cancelled);
        }
        let superseded: Vec<HoldKey> = self
            .holds
            .keys()
            .filter(|(id, _)| *id == control_id)
            .cloned()
            .collect();
        for key in superseded {
            if let Some(mut hold) = self.holds.remove(&key) {
                if let HoldStep::Finished(end) = hold.finish(HoldEnd::Cancelled) {
                    self.hold_ended(&hold, end);
                }
            }
        }

        debug!(
            control_id = %control_id,
            direction = %plan.direction,
            pulses = plan.pulses,
            from = plan.start_value,
            to = plan.target_value,
            "Burst queued"
        );
        let now = Instant::now();
        self.bursts.insert(
            control_id,
            BurstRun {
                plan,
                timing,
                sent: 0,
                started: now,
                next_due: now,
                done: Some(done),
            },
        );
    }

    fn next_ready(&self, now: Instant) -> Option<Slot> {
        let hold = self
            .holds
            .iter()
            .filter_map(|(key, hold)| hold.due().map(|due| (due, key)))
            .filter(|(due, _)| *due <= now)
            .min_by_key(|(due, _)| *due);
        let burst = self
            .bursts
            .iter()
            .filter(|(_, run)| run.next_due <= now)
            .min_by_key(|(_, run)| run.next_due);

        match (hold, burst) {
            (Some((hold_due, key)), Some((_, run))) if hold_due < run.next_due => {
                Some(Slot::Hold(key.clone()))
            }
            (_, Some((id, _))) => Some(Slot::Burst(id.clone())),
            (Some((_, key)), None) => Some(Slot::Hold(key.clone())),
            (None, None) => None,
        }
    }

    fn fire_due(&mut self) {
        while let Some(slot) = self.next_ready(Instant::now()) {
            match slot {
                Slot::Hold(key) => self.fire_hold(key),
                Slot::Burst(id) => self.fire_burst(&id),
            }
        }
    }

    fn fire_hold(&mut self, key: HoldKey) {
        let Some(mut hold) = self.holds.remove(&key) else {
            return;
        };
        let live = match self.catalog.lookup(&key.0) {
            Ok(live) => live,
            Err(_) => {
                if let HoldStep::Finished(end) = hold.finish(HoldEnd::UnknownControl) {
                    self.hold_ended(&hold, end);
                }
                return;
            }
        };

        match hold.tick(&live, Instant::now(), &mut self.rng) {
            HoldStep::Pulse(pulse) => match self.emit(&key.0, hold.direction(), pulse.press) {
                Ok(()) => {
                    self.holds.insert(key, hold);
                }
                Err(reason) => self.hold_ended(&hold, HoldEnd::SinkFailed(reason)),
            },
            HoldStep::Wait => {
                self.holds.insert(key, hold);
            }
            HoldStep::Finished(end) => self.hold_ended(&hold, end),
        }
    }

    fn fire_burst(&mut self, control_id: &str) {
        let Some(mut run) = self.bursts.remove(control_id) else {
            return;
        };
        let now = Instant::now();

        if run.sent >= run.plan.pulses {
            self.burst_finished(run, BurstHalt::Completed);
            return;
        }
        if now.saturating_duration_since(run.started) > self.burst_timeout {
            warn!(
                control_id,
                sent = run.sent,
                planned = run.plan.pulses,
                "Burst timed out"
            );
            self.burst_finished(run, BurstHalt::TimedOut);
            return;
        }
        let live = match self.catalog.lookup(control_id) {
            Ok(live) => live,
            Err(_) => {
                warn!(control_id, "Control vanished mid-burst");
                self.burst_finished(run, BurstHalt::Unavailable);
                return;
            }
        };
        if let Some(halt) = progress_halt(&run.plan, &live) {
            if let BurstHalt::Overshoot { observed } = halt {
                warn!(
                    control_id,
                    target = run.plan.target_value,
                    observed,
                    "Burst overshot target; not correcting"
                );
            }
            self.burst_finished(run, halt);
            return;
        }

        let direction = run.plan.direction;
        let projected = run.plan.start_value
            + direction.sign() * live.step_size * f64::from(run.sent);
        if !burst_can_step(&live, direction.furthest(projected, live.current_value), &run.plan) {
            self.burst_finished(run, BurstHalt::AtBound);
            return;
        }

        let pulse = run.timing.sample(&mut self.rng, 0);
        if let Err(reason) = self.emit(control_id, direction, pulse.press) {
            self.burst_finished(run, BurstHalt::SinkFailed(reason));
            return;
        }
        run.sent = run.sent.saturating_add(1);
        run.next_due = now + pulse.period();
        self.bursts.insert(control_id.to_string(), run);
    }

    fn emit(&mut self, control_id: &str, direction: Direction, press: Duration) -> Result<(), String> {
        let pulse = Pulse {
            control_id: control_id.to_string(),
            direction,
            press,
        };
        let result = self.sink.lock().emit(&pulse);
        if let Some(beat) = &self.beat {
            beat();
        }
        match &result {
            Ok(()) => {
                self.pulses_emitted.fetch_add(1, Ordering::Relaxed);
                trace!(control_id, %direction, press_ms = press.as_millis(), "Pulse");
            }
            Err(reason) => warn!(control_id, %direction, %reason, "Pulse sink failed"),
        }
        result
    }

    fn hold_ended(&self, hold: &HoldMachine, end: HoldEnd) {
        debug!(
            control_id = hold.control_id(),
            input = %hold.input(),
            pulses = hold.pulses(),
            %end,
            "Hold ended"
        );
        self.notify(ActuationNotice::HoldEnded {
            control_id: hold.control_id().to_string(),
            input: hold.input().clone(),
            pulses: hold.pulses(),
            end,
        });
    }

    fn burst_finished(&self, mut run: BurstRun, halt: BurstHalt) {
        let outcome = BurstOutcome {
            control_id: run.plan.control_id.clone(),
            direction: run.plan.direction,
            planned: run.plan.pulses,
            dispatched: run.sent,
            halt,
        };
        debug!(
            control_id = %outcome.control_id,
            planned = outcome.planned,
            dispatched = outcome.dispatched,
            halt = %outcome.halt,
            "Burst finished"
        );
        if let Some(done) = run.done.take()
            && done.send(outcome.clone()).is_err()
        {
            trace!(control_id = %outcome.control_id, "Burst waiter gone");
        }
        self.notify(ActuationNotice::BurstFinished(outcome));
    }

    fn end_all(&mut self, hold_end: &HoldEnd, burst_halt: &BurstHalt) {
        let holds: Vec<HoldMachine> = self.holds.drain().map(|(_, hold)| hold).collect();
        for mut hold in holds {
            if let HoldStep::Finished(end) = hold.finish(hold_end.clone()) {
                self.hold_ended(&hold, end);
            }
        }
        let bursts: Vec<BurstRun> = self.bursts.drain().map(|(_, run)| run).collect();
        for run in bursts {
            self.burst_finished(run, burst_halt.clone());
        }
    }
}
