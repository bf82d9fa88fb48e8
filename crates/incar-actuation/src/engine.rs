//! Actuation engine handle.
//!
//! The handle validates requests against the live catalog on the caller's
//! thread, then hands them to the dispatcher thread. It can be shared behind
//! an `Arc`; every method takes `&self`.

use crossbeam::channel::{SendTimeoutError, Sender, TrySendError};
use incar_input::InputId;
use incar_telemetry::{BeatFn, ControlCatalog, ControlDescriptor};
use incar_timing::{DEFAULT_FLOAT_PRESS_EXTRA_MS, MAX_PRESS_MS, TimingProfile};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::burst::{BurstHalt, BurstOutcome, BurstPlan, Direction, ensure_can_step};
use crate::dispatcher::{DispatchCommand, Dispatcher, IDLE_TICK};
use crate::error::{ActuationError, ActuationResult};
use crate::hold::HoldEnd;
use crate::sink::SharedSink;

/// Default burst budget.
pub const DEFAULT_BURST_TIMEOUT_MS: u64 = 8_000;

/// Upper bound on the extra press time for float controls.
pub const MAX_FLOAT_PRESS_EXTRA_MS: u64 = 200;

/// Default dispatch queue depth.
pub const DEFAULT_DISPATCH_QUEUE: usize = 256;

/// How long a release or cancel waits for queue space before giving up.
/// The dispatcher drains its queue every loop turn.
const TERMINATING_SEND_TIMEOUT: Duration = IDLE_TICK.saturating_mul(4);

/// Actuation engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuationConfig {
    /// Extra press time for float-valued controls.
    pub float_press_extra_ms: u64,
    /// A preset burst is abandoned after this long.
    pub burst_timeout_ms: u64,
    /// Dispatch queue depth for presses and bursts; requests beyond it are
    /// dropped. Releases and cancels get the same amount again as headroom
    /// and are never dropped for lack of space.
    pub queue_capacity: usize,
    /// Seed for timing jitter. Unseeded uses OS entropy.
    pub rng_seed: Option<u64>,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            float_press_extra_ms: DEFAULT_FLOAT_PRESS_EXTRA_MS,
            burst_timeout_ms: DEFAULT_BURST_TIMEOUT_MS,
            queue_capacity: DEFAULT_DISPATCH_QUEUE,
            rng_seed: None,
        }
    }
}

impl ActuationConfig {
    pub fn validate(&self) -> ActuationResult<()> {
        if self.burst_timeout_ms == 0 {
            return Err(ActuationError::InvalidConfig(
                "burst_timeout_ms must be positive".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ActuationError::InvalidConfig(
                "queue_capacity must be positive".to_string(),
            ));
        }
        if self.float_press_extra_ms > MAX_FLOAT_PRESS_EXTRA_MS {
            return Err(ActuationError::InvalidConfig(format!(
                "float_press_extra_ms {} exceeds {MAX_FLOAT_PRESS_EXTRA_MS}",
                self.float_press_extra_ms
            )));
        }
        Ok(())
    }

    pub fn burst_timeout(&self) -> Duration {
        Duration::from_millis(self.burst_timeout_ms)
    }

    /// Longest single press any accepted timing can produce. The dispatcher
    /// thread is busy for this long inside one sink call.
    pub fn longest_press(&self) -> Duration {
        Duration::from_millis(MAX_PRESS_MS.saturating_add(self.float_press_extra_ms))
    }
}

/// Things the dispatcher reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum ActuationNotice {
    /// A request reached the dispatcher but could not be started.
    Rejected {
        control_id: String,
        error: ActuationError,
    },
    HoldEnded {
        control_id: String,
        input: InputId,
        pulses: u32,
        end: HoldEnd,
    },
    BurstFinished(BurstOutcome),
    /// A float preset target was moved onto the control's step grid.
    TargetAligned {
        control_id: String,
        requested: f64,
        target: f64,
    },
    DispatcherStarted {
        generation: u64,
    },
    DispatcherStopped {
        generation: u64,
    },
}

pub type ActuationNoticeSender = mpsc::UnboundedSender<ActuationNotice>;
pub type ActuationNoticeReceiver = mpsc::UnboundedReceiver<ActuationNotice>;

/// Create a notice channel.
pub fn notice_channel() -> (ActuationNoticeSender, ActuationNoticeReceiver) {
    mpsc::unbounded_channel()
}

/// Pending result of a preset or combo burst.
#[derive(Debug)]
pub struct BurstTicket {
    control_id: String,
    direction: Direction,
    planned: u32,
    rx: oneshot::Receiver<BurstOutcome>,
}

impl BurstTicket {
    fn resolved(outcome: BurstOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let ticket = Self {
            control_id: outcome.control_id.clone(),
            direction: outcome.direction,
            planned: outcome.planned,
            rx,
        };
        if tx.send(outcome).is_err() {
            debug!("Resolved ticket receiver dropped");
        }
        ticket
    }

    pub fn control_id(&self) -> &str {
        &self.control_id
    }

    /// Pulses the burst was planned with.
    pub fn planned(&self) -> u32 {
        self.planned
    }

    /// Wait for the burst to finish.
    pub async fn wait(self) -> BurstOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => BurstOutcome {
                control_id: self.control_id,
                direction: self.direction,
                planned: self.planned,
                dispatched: 0,
                halt: BurstHalt::DispatcherStopped,
            },
        }
    }
}

#[derive(Default)]
struct DispatcherSlot {
    command_tx: Option<Sender<DispatchCommand>>,
    thread: Option<JoinHandle<()>>,
    beat: Option<BeatFn>,
}

/// Front end of the actuation engine.
pub struct ActuationEngine {
    config: ActuationConfig,
    catalog: Arc<ControlCatalog>,
    sink: SharedSink,
    notices: Option<ActuationNoticeSender>,
    slot: Mutex<DispatcherSlot>,
    generation: Arc<AtomicU64>,
    pulses_emitted: Arc<AtomicU64>,
    cancellations: AtomicU64,
    paused: Arc<AtomicBool>,
}

impl std::fmt::Debug for ActuationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuationEngine")
            .field("config", &self.config)
            .field("generation", &self.generation())
            .field("running", &self.is_running())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

impl ActuationEngine {
    /// Create an engine. The dispatcher is not started.
    pub fn new(
        config: ActuationConfig,
        catalog: Arc<ControlCatalog>,
        sink: SharedSink,
    ) -> ActuationResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog,
            sink,
            notices: None,
            slot: Mutex::new(DispatcherSlot::default()),
            generation: Arc::new(AtomicU64::new(0)),
            pulses_emitted: Arc::new(AtomicU64::new(0)),
            cancellations: AtomicU64::new(0),
            paused: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Report holds, bursts and rejections on `notices`.
    pub fn with_notices(mut self, notices: ActuationNoticeSender) -> Self {
        self.notices = Some(notices);
        self
    }

    pub fn config(&self) -> &ActuationConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ControlCatalog> {
        &self.catalog
    }

    /// Current dispatcher generation; bumps on every restart.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn pulses_emitted(&self) -> u64 {
        self.pulses_emitted.load(Ordering::Relaxed)
    }

    /// Number of `cancel_all` calls so far. A combo compares it between
    /// steps to notice a cancel that landed while no burst was running.
    pub fn cancellations(&self) -> u64 {
        self.cancellations.load(Ordering::Acquire)
    }

    /// Whether new presses, presets and combos are refused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause or resume actuation. Pausing ends every hold and burst;
    /// releases keep flowing so the input state stays consistent.
    pub fn set_paused(&self, paused: bool) -> ActuationResult<()> {
        if self.paused.swap(paused, Ordering::AcqRel) == paused {
            return Ok(());
        }
        if paused {
            info!("Actuation paused");
            self.cancel_all()
        } else {
            info!("Actuation resumed");
            Ok(())
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot
            .lock()
            .thread
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Start the dispatcher thread. `beat` is called on every loop turn and
    /// after every pulse.
    pub fn start(&self, beat: Option<BeatFn>) -> ActuationResult<()> {
        let mut slot = self.slot.lock();
        if slot.thread.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        slot.beat = beat;
        self.spawn_locked(&mut slot)
    }

    /// Replace the dispatcher thread with a fresh one.
    ///
    /// The old thread exits at its next loop turn and ends its holds and
    /// bursts. If it is wedged it is abandoned. Returns the new generation.
    pub fn restart(&self) -> ActuationResult<u64> {
        let mut slot = self.slot.lock();
        slot.command_tx = None;
        if let Some(old) = slot.thread.take() {
            debug!(finished = old.is_finished(), "Detaching previous dispatcher thread");
        }
        self.spawn_locked(&mut slot)?;
        let generation = self.generation();
        warn!(generation, "Actuation dispatcher restarted");
        Ok(generation)
    }

    fn spawn_locked(&self, slot: &mut DispatcherSlot) -> ActuationResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        let (command_tx, command_rx) =
            crossbeam::channel::bounded(self.config.queue_capacity.saturating_mul(2));
        let rng = match self.config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(generation)),
            None => StdRng::from_os_rng(),
        };

        let dispatcher = Dispatcher::new(
            generation,
            Arc::clone(&self.generation),
            Arc::clone(&self.catalog),
            Arc::clone(&self.sink),
            command_rx,
            self.notices.clone(),
            slot.beat.clone(),
            self.config.burst_timeout(),
            Arc::clone(&self.pulses_emitted),
            Arc::clone(&self.paused),
            rng,
        );

        let thread = thread::Builder::new()
            .name(format!("incar-dispatch-{generation}"))
            .spawn(move || dispatcher.run())
            .map_err(|e| ActuationError::ThreadSpawn(e.to_string()))?;

        slot.command_tx = Some(command_tx);
        slot.thread = Some(thread);
        Ok(())
    }

    /// Stop the dispatcher and wait for its thread.
    pub fn stop(&self) {
        let (command_tx, thread) = {
            let mut slot = self.slot.lock();
            (slot.command_tx.take(), slot.thread.take())
        };
        if let Some(tx) = command_tx
            && tx.try_send(DispatchCommand::Shutdown).is_err()
        {
            debug!("Dispatcher already gone or queue full; dropping sender");
        }
        if let Some(thread) = thread {
            match thread.join() {
                Ok(()) => info!("Actuation dispatcher joined"),
                Err(_) => error!("Actuation dispatcher thread panicked"),
            }
        }
    }

    fn send(&self, command: DispatchCommand) -> ActuationResult<()> {
        let tx = self
            .slot
            .lock()
            .command_tx
            .clone()
            .ok_or(ActuationError::DispatcherStopped)?;

        if command.is_terminating() {
            return match tx.send_timeout(command, TERMINATING_SEND_TIMEOUT) {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => {
                    error!(
                        queued = tx.len(),
                        "Dispatcher not draining its queue; release or cancel not delivered"
                    );
                    Err(ActuationError::QueueFull)
                }
                Err(SendTimeoutError::Disconnected(_)) => Err(ActuationError::DispatcherStopped),
            };
        }

        if tx.len() >= self.config.queue_capacity {
            warn!(queued = tx.len(), "Actuation queue full; request dropped");
            return Err(ActuationError::QueueFull);
        }
        match tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Actuation queue full; request dropped");
                Err(ActuationError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(ActuationError::DispatcherStopped),
        }
    }

    fn notify(&self, notice: ActuationNotice) {
        if let Some(tx) = &self.notices
            && tx.send(notice).is_err()
        {
            debug!("Actuation notice dropped; no listener");
        }
    }

    fn ensure_link(&self) -> ActuationResult<()> {
        let link = self.catalog.link_state();
        if link.accepts_actuation() {
            Ok(())
        } else {
            Err(ActuationError::unavailable(link))
        }
    }

    /// Link up and not paused.
    fn ensure_active(&self) -> ActuationResult<()> {
        if self.is_paused() {
            return Err(ActuationError::Paused);
        }
        self.ensure_link()
    }

    /// Input went down on an increase or decrease binding.
    ///
    /// # Errors
    ///
    /// `ControlAtBound` when the first pulse would leave the range (nothing
    /// is sent), `ControlsUnavailable` while disconnected, `UnknownControl`
    /// when the current car does not expose the control, `Paused` in config
    /// mode.
    pub fn press(
        &self,
        control_id: &str,
        direction: Direction,
        input: InputId,
        timing: TimingProfile,
    ) -> ActuationResult<()> {
        self.ensure_active()?;
        let live = self.catalog.lookup(control_id)?;
        ensure_can_step(&live, live.current_value, direction)?;
        self.send(DispatchCommand::Press {
            control_id: control_id.to_string(),
            input,
            direction,
            timing: self.timing_for(&live, timing),
        })
    }

    /// Input went up. Pending repeats for this pair stop.
    pub fn release(&self, control_id: &str, input: InputId) -> ActuationResult<()> {
        self.send(DispatchCommand::Release {
            control_id: control_id.to_string(),
            input,
        })
    }

    /// Move a control to `target` with a burst computed from its live value.
    ///
    /// # Errors
    ///
    /// `TargetOutOfRange` for a target outside the control's live range; the
    /// preset is not applied.
    pub fn activate_preset(
        &self,
        control_id: &str,
        target: f64,
        timing: TimingProfile,
    ) -> ActuationResult<BurstTicket> {
        self.ensure_active()?;
        let live = self.catalog.lookup(control_id)?;
        let plan = BurstPlan::compute(&live, target).inspect_err(|e| {
            warn!(control_id, target, error = %e, "Preset rejected");
        })?;
        self.start_planned(&live, plan, timing)
    }

    /// Dispatch a burst planned by the caller, e.g. from a combo's snapshot.
    pub fn start_planned(
        &self,
        descriptor: &ControlDescriptor,
        plan: BurstPlan,
        timing: TimingProfile,
    ) -> ActuationResult<BurstTicket> {
        self.ensure_active()?;
        if plan.is_aligned() {
            info!(
                control_id = %plan.control_id,
                requested = plan.requested_value,
                target = plan.target_value,
                "Preset target aligned to the step grid"
            );
            self.notify(ActuationNotice::TargetAligned {
                control_id: plan.control_id.clone(),
                requested: plan.requested_value,
                target: plan.target_value,
            });
        }
        self.dispatch_plan(plan, self.timing_for(descriptor, timing))
    }

    /// Dispatch a burst with `timing` exactly as given, without the float
    /// press extension. Used to measure what the simulator registers.
    pub(crate) fn start_exact(
        &self,
        plan: BurstPlan,
        timing: TimingProfile,
    ) -> ActuationResult<BurstTicket> {
        self.ensure_active()?;
        self.dispatch_plan(plan, timing)
    }

    fn dispatch_plan(&self, plan: BurstPlan, timing: TimingProfile) -> ActuationResult<BurstTicket> {
        if plan.is_empty() {
            debug!(control_id = %plan.control_id, "Already at target");
            return Ok(BurstTicket::resolved(BurstOutcome::already_there(&plan)));
        }

        let (done, rx) = oneshot::channel();
        let ticket = BurstTicket {
            control_id: plan.control_id.clone(),
            direction: plan.direction,
            planned: plan.pulses,
            rx,
        };
        self.send(DispatchCommand::Burst { plan, timing, done })?;
        Ok(ticket)
    }

    /// Stop every hold and burst. Running combos stop at their next step.
    pub fn cancel_all(&self) -> ActuationResult<()> {
        self.cancellations.fetch_add(1, Ordering::AcqRel);
        self.send(DispatchCommand::CancelAll)
    }

    fn timing_for(&self, descriptor: &ControlDescriptor, timing: TimingProfile) -> TimingProfile {
        if descriptor.has_precision_mismatch() {
            debug!(control_id = %descriptor.id, "Value kind disagrees with step; using reported kind");
        }
        timing.for_value_kind(descriptor.value_kind, self.config.float_press_extra_ms)
    }
}

impl Drop for ActuationEngine {
    fn drop(&mut self) {
        if self.is_running() {
            debug!("Actuation engine dropped while running; stopping");
            self.stop();
        }
    }
}
