//! Engine runtime: wires telemetry, input, actuation and supervision
//! together around a single core loop.
//!
//! The core loop owns the active session, profile, routing table and timing
//! table. Everything else is shared through `Arc`s: the control catalog is
//! written by the telemetry reader and read by the actuation engine, and the
//! binding store is only touched from the core loop and combo tasks.
//!
//! ```text
//! TelemetryReader ──events──┐
//! InputHub ────────inputs───┤
//! ActuationEngine ─notices──┼──▶ core loop ──▶ EventBus ──▶ subscribers
//! EngineHandle ───commands──┘
//! ```

use crate::commands::{
    CommandError, CommandReply, CommandResult, EngineCommand, EngineMode, Envelope,
};
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::supervised::{DispatchLoop, TelemetryLoop};
use anyhow::{Context, Result};
use incar_actuation::{
    ActuationEngine, ActuationError, ActuationNotice, ActuationNoticeReceiver, ComboExecutor,
    Direction, SharedSink, TimingCalibrator, TimingTable, notice_channel,
};
use incar_input::{BindingMap, InputEvent, InputPhase, InputReceiver, InputSource};
use incar_profile_repository::{
    BindingStore, BoundAction, Profile, ProfileKey, ProfileStoreError, routing_table,
};
use incar_telemetry::{
    ControlCatalog, SessionIdentity, TelemetryEvent, TelemetryReader, TelemetrySource,
};
use incar_watchdog::{SupervisedLoop, Watchdog, WatchdogEvent};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Depth of the command queue between handles and the core loop.
const COMMAND_QUEUE: usize = 64;

/// An engine that has not been started yet.
///
/// Subscribe before [`Engine::start`] to observe the first session.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    store: Arc<BindingStore>,
    bus: EventBus,
}

impl Engine {
    pub fn new(config: EngineConfig, store: Arc<BindingStore>) -> Self {
        Self {
            config,
            store,
            bus: EventBus::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    /// Start the telemetry reader, the actuation dispatcher, the watchdog and
    /// the core loop. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, outside a runtime, or when the
    /// dispatcher thread cannot be spawned.
    pub fn start(
        self,
        source: Arc<dyn TelemetrySource>,
        sink: SharedSink,
        inputs: InputReceiver,
    ) -> Result<EngineHandle> {
        let Self { config, store, bus } = self;
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .context("Engine must be started inside a tokio runtime")?;

        let catalog = Arc::new(ControlCatalog::new());
        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel();
        let reader = TelemetryReader::new(
            source,
            Arc::clone(&catalog),
            telemetry_tx,
            config.telemetry.reader_config(),
        );

        let (notice_tx, notice_rx) = notice_channel();
        let actuation = Arc::new(
            ActuationEngine::new(config.actuation.engine.clone(), Arc::clone(&catalog), sink)
                .context("Invalid actuation configuration")?
                .with_notices(notice_tx),
        );

        let watchdog = Arc::new(Watchdog::new(config.watchdog.clone())?);
        let watchdog_bus = bus.clone();
        watchdog.on_event(move |event| publish_watchdog_event(&watchdog_bus, event));

        let telemetry = Arc::new(TelemetryLoop::new(
            reader,
            config.telemetry.loop_interval(),
            runtime,
        ));
        let telemetry_beat =
            watchdog.register(Arc::clone(&telemetry) as Arc<dyn SupervisedLoop>)?;
        let dispatch_beat = watchdog.register(Arc::new(DispatchLoop::new(Arc::clone(&actuation))))?;

        actuation.start(Some(dispatch_beat))?;
        telemetry.start(telemetry_beat);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watchdog_task = Arc::clone(&watchdog).spawn(shutdown_rx);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let core = Core {
            voice_enabled: config.input.voice_enabled,
            config,
            bus: bus.clone(),
            store,
            catalog: Arc::clone(&catalog),
            actuation,
            telemetry,
            shutdown: shutdown_tx,
            mode: EngineMode::Running,
            session: None,
            profile: None,
            routes: BindingMap::new(),
            timings: TimingTable::default(),
        };
        let core_task = tokio::spawn(core.run(telemetry_rx, inputs, notice_rx, command_rx));
        info!("Engine started");

        Ok(EngineHandle {
            commands: command_tx,
            bus,
            catalog,
            watchdog,
            core: Some(core_task),
            watchdog_task: Some(watchdog_task),
        })
    }
}

fn publish_watchdog_event(bus: &EventBus, event: &WatchdogEvent) {
    match event {
        WatchdogEvent::Restarted {
            loop_name,
            stalled_for,
            restarts_in_window,
        } => bus.publish(EngineEvent::WatchdogRestart {
            loop_name: loop_name.clone(),
            stalled_for: *stalled_for,
            restarts_in_window: *restarts_in_window,
        }),
        WatchdogEvent::Degraded {
            loop_name,
            restarts_in_window,
            window,
        } => bus.publish(EngineEvent::DegradedMode {
            loop_name: loop_name.clone(),
            restarts_in_window: *restarts_in_window,
            window: *window,
        }),
        WatchdogEvent::RestartFailed { loop_name, reason } => bus.publish(EngineEvent::Warning {
            message: format!("{loop_name} could not be restarted: {reason}"),
        }),
        WatchdogEvent::Recovered { loop_name } => {
            info!(loop_name = %loop_name, "Loop left degraded mode");
        }
    }
}

/// Control surface of a running engine.
#[derive(Debug)]
pub struct EngineHandle {
    commands: mpsc::Sender<Envelope>,
    bus: EventBus,
    catalog: Arc<ControlCatalog>,
    watchdog: Arc<Watchdog>,
    core: Option<JoinHandle<()>>,
    watchdog_task: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Send a command and wait for its reply.
    pub async fn send(&self, command: EngineCommand) -> CommandResult {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Envelope { command, reply })
            .await
            .map_err(|_closed| CommandError::Stopped)?;
        rx.await.map_err(|_dropped| CommandError::Stopped)?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    pub fn catalog(&self) -> &Arc<ControlCatalog> {
        &self.catalog
    }

    pub fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }

    /// Stop every loop and wait for them.
    ///
    /// # Errors
    ///
    /// Reports a core loop or watchdog task that panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        match self.send(EngineCommand::Shutdown).await {
            Ok(_) | Err(CommandError::Stopped) => {}
            Err(e) => warn!(error = %e, "Shutdown command refused"),
        }
        if let Some(core) = self.core.take() {
            core.await.context("Engine core loop panicked")?;
        }
        if let Some(watchdog) = self.watchdog_task.take() {
            watchdog.await.context("Watchdog task panicked")?;
        }
        info!("Engine stopped");
        Ok(())
    }
}

struct Core {
    config: EngineConfig,
    voice_enabled: bool,
    bus: EventBus,
    store: Arc<BindingStore>,
    catalog: Arc<ControlCatalog>,
    actuation: Arc<ActuationEngine>,
    telemetry: Arc<TelemetryLoop>,
    shutdown: watch::Sender<bool>,
    mode: EngineMode,
    session: Option<SessionIdentity>,
    profile: Option<Profile>,
    routes: BindingMap<BoundAction>,
    timings: TimingTable,
}

impl Core {
    async fn run(
        mut self,
        mut telemetry: mpsc::UnboundedReceiver<TelemetryEvent>,
        mut inputs: InputReceiver,
        mut notices: ActuationNoticeReceiver,
        mut commands: mpsc::Receiver<Envelope>,
    ) {
        let mut inputs_open = true;
        loop {
            tokio::select! {
                Some(event) = telemetry.recv() => self.on_telemetry(event).await,
                input = inputs.recv(), if inputs_open => match input {
                    Some(event) => self.on_input(&event),
                    None => {
                        debug!("All input sources closed");
                        inputs_open = false;
                    }
                },
                Some(notice) = notices.recv() => self.on_notice(notice),
                envelope = commands.recv() => match envelope {
                    Some(envelope) => {
                        if self.on_command(envelope).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!("Every engine handle dropped");
                        break;
                    }
                },
            }
        }
        self.stop().await;
    }

    async fn stop(self) {
        self.telemetry.stop();
        if self.shutdown.send(true).is_err() {
            debug!("Watchdog already stopped");
        }
        let actuation = Arc::clone(&self.actuation);
        if let Err(e) = tokio::task::spawn_blocking(move || actuation.stop()).await {
            error!(error = %e, "Stopping the dispatcher failed");
        }
    }

    async fn on_telemetry(&mut self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::SessionChanged { previous, current } => {
                info!(session = %current, "Session changed");
                self.bus.publish(EngineEvent::SessionChanged {
                    previous,
                    current: current.clone(),
                });
                if let Err(e) = self.actuation.cancel_all() {
                    debug!(error = %e, "Nothing to cancel on session change");
                }
                self.activate_session(current).await;
            }
            TelemetryEvent::SessionStateChanged { session, previous } => {
                if let Some(active) = self.session.as_mut() {
                    active.session_state = session.session_state;
                }
                self.bus
                    .publish(EngineEvent::SessionStateChanged { session, previous });
            }
            TelemetryEvent::ValueChanged {
                control_id,
                previous,
                current,
            } => self.bus.publish(EngineEvent::ValueChanged {
                control_id,
                previous,
                current,
            }),
            TelemetryEvent::CatalogRefreshed {
                generation,
                available,
                appeared,
                vanished,
            } => self.bus.publish(EngineEvent::CatalogRefreshed {
                generation,
                available,
                appeared,
                vanished,
            }),
            TelemetryEvent::LinkChanged(transition) => self.bus.publish(EngineEvent::LinkStatus {
                previous: transition.previous,
                current: transition.current,
            }),
        }
    }

    /// Load the profile stored for `session`, or a fresh default.
    async fn activate_session(&mut self, session: SessionIdentity) {
        let key = ProfileKey::from(&session);
        let (profile, from_disk) = match self.store.match_session(&session).await {
            Ok(Some(profile)) => (profile, true),
            Ok(None) => {
                debug!(profile = %key, "No stored profile; starting from defaults");
                (self.default_profile(&key), false)
            }
            Err(ProfileStoreError::ProfileCorrupt { path, reason }) => {
                warn!(profile = %key, path = ?path, %reason, "Stored profile unreadable; using defaults");
                self.bus.publish(EngineEvent::ProfileCorrupt {
                    key: key.clone(),
                    path,
                    reason,
                });
                (self.default_profile(&key), false)
            }
            Err(e) => {
                error!(profile = %key, error = %e, "Profile load failed; using defaults");
                self.bus.publish(EngineEvent::Warning {
                    message: format!("Profile for {key} could not be loaded: {e}"),
                });
                (self.default_profile(&key), false)
            }
        };
        self.session = Some(session);
        self.install(profile, from_disk);
    }

    fn default_profile(&self, key: &ProfileKey) -> Profile {
        let mut profile = Profile::new(key);
        profile.timing = self.config.actuation.default_timing;
        profile
    }

    fn install(&mut self, profile: Profile, from_disk: bool) {
        self.timings = match TimingTable::from_profile(&profile) {
            Ok(table) => table,
            Err(e) => {
                warn!(profile = %profile.key(), error = %e, "Profile timing invalid; using casual");
                TimingTable::default()
            }
        };
        self.routes = routing_table(&profile);

        for control_id in profile.bindings.keys() {
            if self.catalog.lookup(control_id).is_err() {
                debug!(control_id = %control_id, "Bound control not exposed by this car");
                self.bus.publish(EngineEvent::BindingSkipped {
                    control_id: control_id.clone(),
                });
            }
        }

        info!(
            profile = %profile.key(),
            from_disk,
            bindings = profile.bindings.len(),
            combos = profile.combos.len(),
            "Profile active"
        );
        self.bus.publish(EngineEvent::ProfileLoaded {
            key: profile.key(),
            from_disk,
            bindings: profile.bindings.len(),
            combos: profile.combos.len(),
        });
        self.profile = Some(profile);
    }

    /// Rebuild routing and timing after an edit to the active profile.
    fn reroute(&mut self) -> CommandResult {
        let Some(profile) = self.profile.as_ref() else {
            return Err(CommandError::NoSession);
        };
        self.timings = TimingTable::from_profile(profile)?;
        self.routes = routing_table(profile);
        Ok(CommandReply::Done)
    }

    fn on_input(&self, event: &InputEvent) {
        if event.id.source() == InputSource::Voice && !self.voice_enabled {
            trace!(input = %event.id, "Voice input ignored");
            return;
        }
        // Releases still pass so nothing stays held across a mode switch.
        if self.mode == EngineMode::Config && event.phase != InputPhase::Released {
            trace!(input = %event.id, "Config mode; input ignored");
            return;
        }
        let Some(action) = self.routes.route(&event.id).cloned() else {
            trace!(input = %event.id, "Unbound input");
            return;
        };

        match (event.phase, action) {
            (InputPhase::Pressed, BoundAction::Increase { control_id }) => {
                self.press(event, control_id, Direction::Increase);
            }
            (InputPhase::Pressed, BoundAction::Decrease { control_id }) => {
                self.press(event, control_id, Direction::Decrease);
            }
            (InputPhase::Pressed, BoundAction::Preset { control_id, value }) => {
                let timing = self.timings.for_control(&control_id);
                // The outcome arrives as a BurstFinished notice.
                if let Err(error) = self.actuation.activate_preset(&control_id, value, timing) {
                    self.rejected(control_id, error);
                }
            }
            (InputPhase::Pressed, BoundAction::Combo { name }) => {
                if let Err(e) = self.spawn_combo(&name, None) {
                    warn!(combo = %name, error = %e, "Combo not started");
                }
            }
            (
                InputPhase::Released,
                BoundAction::Increase { control_id } | BoundAction::Decrease { control_id },
            ) => {
                if let Err(error) = self.actuation.release(&control_id, event.id.clone()) {
                    self.rejected(control_id, error);
                }
            }
            (InputPhase::Held, _) | (InputPhase::Released, _) => {}
        }
    }

    fn press(&self, event: &InputEvent, control_id: String, direction: Direction) {
        let timing = self.timings.for_control(&control_id);
        if let Err(error) = self
            .actuation
            .press(&control_id, direction, event.id.clone(), timing)
        {
            self.rejected(control_id, error);
            return;
        }
        // A spoken command is one step; there is no key-up to wait for.
        if event.id.is_instantaneous()
            && let Err(error) = self.actuation.release(&control_id, event.id.clone())
        {
            self.rejected(control_id, error);
        }
    }

    fn rejected(&self, control_id: String, error: ActuationError) {
        debug!(control_id = %control_id, error = %error, "Actuation rejected");
        self.bus
            .publish(EngineEvent::ActuationRejected { control_id, error });
    }

    fn on_notice(&self, notice: ActuationNotice) {
        match notice {
            ActuationNotice::Rejected { control_id, error } => self.rejected(control_id, error),
            ActuationNotice::BurstFinished(outcome) => {
                self.bus.publish(EngineEvent::BurstFinished(outcome));
            }
            ActuationNotice::TargetAligned {
                control_id,
                requested,
                target,
            } => self.bus.publish(EngineEvent::TargetAligned {
                control_id,
                requested,
                target,
            }),
            ActuationNotice::HoldEnded {
                control_id,
                input,
                pulses,
                end,
            } => debug!(control_id = %control_id, input = %input, pulses, end = ?end, "Hold ended"),
            ActuationNotice::DispatcherStarted { generation } => {
                debug!(generation, "Dispatcher running");
            }
            ActuationNotice::DispatcherStopped { generation } => {
                debug!(generation, "Dispatcher exited");
            }
        }
    }

    /// Run a combo on its own task so the core loop keeps routing input.
    fn spawn_combo(
        &self,
        name: &str,
        reply: Option<oneshot::Sender<CommandResult>>,
    ) -> Result<(), CommandError> {
        let Some(profile) = self.profile.as_ref() else {
            return Err(CommandError::NoSession);
        };
        let Some(combo) = profile.combo(name).cloned() else {
            return Err(CommandError::UnknownCombo(name.to_string()));
        };
        let timings = self.timings.clone();
        let executor = ComboExecutor::new(Arc::clone(&self.actuation));
        let bus = self.bus.clone();

        tokio::spawn(async move {
            let result = executor
                .execute(&combo, &timings, |progress| {
                    bus.publish(EngineEvent::ComboProgress {
                        name: progress.name.clone(),
                        completed: progress.completed,
                        total: progress.total,
                        control_id: progress.control_id.clone(),
                    });
                })
                .await;
            let reply_value = match result {
                Ok(report) => {
                    info!(
                        combo = %report.name,
                        pulses = report.pulses(),
                        interrupted = ?report.interrupted,
                        "Combo finished"
                    );
                    bus.publish(EngineEvent::ComboFinished(report.clone()));
                    Ok(CommandReply::ComboFinished(report))
                }
                Err(error) => {
                    warn!(combo = %combo.name, error = %error, "Combo refused");
                    bus.publish(EngineEvent::Warning {
                        message: format!("Combo '{}' refused: {error}", combo.name),
                    });
                    Err(CommandError::Actuation(error))
                }
            };
            if let Some(reply) = reply
                && reply.send(reply_value).is_err()
            {
                trace!("Combo reply dropped");
            }
        });
        Ok(())
    }

    /// Run a timing calibration on its own task; it takes seconds.
    fn spawn_calibration(
        &self,
        control_id: String,
        reply: oneshot::Sender<CommandResult>,
    ) -> Result<(), CommandError> {
        if self.mode == EngineMode::Config {
            return Err(CommandError::Actuation(ActuationError::Paused));
        }
        let calibrator =
            TimingCalibrator::new(Arc::clone(&self.actuation), self.config.actuation.calibration)?;
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let result = match calibrator.run(&control_id).await {
                Ok(report) => {
                    bus.publish(EngineEvent::CalibrationFinished(report.clone()));
                    Ok(CommandReply::Calibrated(report))
                }
                Err(error) => {
                    warn!(control_id = %control_id, error = %error, "Timing calibration failed");
                    Err(CommandError::Actuation(error))
                }
            };
            if reply.send(result).is_err() {
                trace!("Calibration reply dropped");
            }
        });
        Ok(())
    }

    fn set_mode(&mut self, mode: EngineMode) -> CommandResult {
        let previous = self.mode;
        if previous == mode {
            return Ok(CommandReply::Mode(mode));
        }
        if let Err(e) = self.actuation.set_paused(mode == EngineMode::Config) {
            debug!(error = %e, "Nothing to cancel on mode change");
        }
        self.mode = mode;
        info!(%previous, current = %mode, "Engine mode changed");
        self.bus.publish(EngineEvent::ModeChanged {
            previous,
            current: mode,
        });
        Ok(CommandReply::Mode(mode))
    }

    async fn on_command(&mut self, envelope: Envelope) -> ControlFlow<()> {
        let Envelope { command, reply } = envelope;
        debug!(command = ?command, "Engine command");
        let result = match command {
            EngineCommand::Shutdown => {
                if reply.send(Ok(CommandReply::Done)).is_err() {
                    trace!("Shutdown reply dropped");
                }
                return ControlFlow::Break(());
            }
            EngineCommand::ExecuteCombo { name } => {
                // The combo task owns the reply from here on.
                let (tx, rx) = oneshot::channel();
                match self.spawn_combo(&name, Some(tx)) {
                    Ok(()) => {
                        tokio::spawn(async move {
                            let result = rx.await.unwrap_or(Err(CommandError::Stopped));
                            if reply.send(result).is_err() {
                                trace!("Combo reply dropped");
                            }
                        });
                        return ControlFlow::Continue(());
                    }
                    Err(e) => Err(e),
                }
            }
            EngineCommand::CalibrateTiming { control_id } => {
                let (tx, rx) = oneshot::channel();
                match self.spawn_calibration(control_id, tx) {
                    Ok(()) => {
                        tokio::spawn(async move {
                            let result = rx.await.unwrap_or(Err(CommandError::Stopped));
                            if reply.send(result).is_err() {
                                trace!("Calibration reply dropped");
                            }
                        });
                        return ControlFlow::Continue(());
                    }
                    Err(e) => Err(e),
                }
            }
            other => self.apply(other).await,
        };
        if reply.send(result).is_err() {
            trace!("Command reply dropped");
        }
        ControlFlow::Continue(())
    }

    async fn apply(&mut self, command: EngineCommand) -> CommandResult {
        match command {
            EngineCommand::CurrentProfile => {
                Ok(CommandReply::Profile(self.profile.clone().map(Box::new)))
            }
            EngineCommand::Save => self.save().await,
            EngineCommand::Bind { binding } => {
                self.profile_mut()?.set_binding(binding);
                self.reroute()
            }
            EngineCommand::Unbind { control_id } => {
                self.profile_mut()?.remove_binding(&control_id);
                self.reroute()
            }
            EngineCommand::SetCombo { combo } => {
                self.profile_mut()?.set_combo(combo);
                self.reroute()
            }
            EngineCommand::RemoveCombo { name } => match self.profile_mut()?.remove_combo(&name) {
                Some(_) => self.reroute(),
                None => Err(CommandError::UnknownCombo(name)),
            },
            EngineCommand::SetTiming { selection } => {
                selection.validate()?;
                self.profile_mut()?.timing = selection;
                self.reroute()
            }
            EngineCommand::SetHudLayout { layout } => {
                self.profile_mut()?.hud_layout = layout;
                Ok(CommandReply::Done)
            }
            EngineCommand::SetMode { mode } => self.set_mode(mode),
            EngineCommand::Shutdown
            | EngineCommand::ExecuteCombo { .. }
            | EngineCommand::CalibrateTiming { .. } => Ok(CommandReply::Done),
        }
    }

    fn profile_mut(&mut self) -> Result<&mut Profile, CommandError> {
        self.profile.as_mut().ok_or(CommandError::NoSession)
    }

    async fn save(&self) -> CommandResult {
        let (Some(profile), Some(session)) = (self.profile.as_ref(), self.session.as_ref()) else {
            return Err(CommandError::NoSession);
        };
        let outcome = self
            .store
            .save(profile, session, &self.catalog.snapshot())
            .await?;
        if !outcome.report.unchecked_controls.is_empty() {
            warn!(
                profile = %outcome.key,
                unchecked = ?outcome.report.unchecked_controls,
                "Saved bindings for controls this car does not expose"
            );
        }
        self.bus.publish(EngineEvent::ProfileSaved {
            key: outcome.key,
            path: outcome.path.clone(),
            unchecked_controls: outcome.report.unchecked_controls,
        });
        Ok(CommandReply::Saved { path: outcome.path })
    }
}
