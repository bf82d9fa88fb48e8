//! End-to-end actuation scenarios against a live dispatcher thread.

use incar_actuation::prelude::*;
use incar_actuation::{ActuationNoticeReceiver, HoldEnd, Pulse, notice_channel};
use incar_input::InputId;
use incar_profile_repository::ComboDefinition;
use incar_telemetry::{
    ControlCatalog, ControlDescriptor, LinkState, SessionIdentity, SessionState,
    TelemetrySnapshot, ValueKind,
};
use incar_timing::TimingPreset;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn session() -> SessionIdentity {
    SessionIdentity::new("Ferrari 296 GT3", "Monza", SessionState::Practice)
}

fn fresh_catalog(controls: &[ControlDescriptor]) -> Arc<ControlCatalog> {
    let catalog = Arc::new(ControlCatalog::new());
    catalog.refresh(&TelemetrySnapshot {
        session: session(),
        controls: controls.to_vec(),
    });
    catalog.set_link_state(LinkState::Fresh);
    catalog
}

fn brake_bias(value: f64) -> ControlDescriptor {
    ControlDescriptor::new("dcBrakeBias", ValueKind::Float, 40.0, 60.0, 0.5, value)
}

fn integer(id: &str, value: f64) -> ControlDescriptor {
    ControlDescriptor::new(id, ValueKind::Integer, 1.0, 12.0, 1.0, value)
}

fn fast() -> incar_timing::TimingProfile {
    TimingPreset::Aggressive.profile()
}

/// Sink that behaves like the simulator: each pulse moves the control and
/// the catalog is refreshed, as a telemetry poll would.
struct SimSink {
    catalog: Arc<ControlCatalog>,
    controls: Arc<Mutex<Vec<ControlDescriptor>>>,
    steps_per_pulse: f64,
    disconnect_after: Option<usize>,
    switch_car_after: Option<usize>,
    session: SessionIdentity,
    on_first_pulse: Option<(String, f64)>,
    /// Shorter presses are recorded but do not move the control.
    min_press: Duration,
    recorder: RecordingSink,
}

impl SimSink {
    fn new(catalog: &Arc<ControlCatalog>, controls: &[ControlDescriptor], steps_per_pulse: f64) -> Self {
        Self {
            catalog: Arc::clone(catalog),
            controls: Arc::new(Mutex::new(controls.to_vec())),
            steps_per_pulse,
            disconnect_after: None,
            switch_car_after: None,
            session: session(),
            on_first_pulse: None,
            min_press: Duration::ZERO,
            recorder: RecordingSink::new(),
        }
    }
}

impl PulseSink for SimSink {
    fn name(&self) -> &str {
        "sim"
    }

    fn emit(&mut self, pulse: &Pulse) -> Result<(), String> {
        self.recorder.emit(pulse)?;
        let mut controls = self.controls.lock();
        if pulse.press >= self.min_press
            && let Some(c) = controls.iter_mut().find(|c| c.id == pulse.control_id)
        {
            let moved = c.current_value + pulse.direction.sign() * c.step_size * self.steps_per_pulse;
            c.current_value = moved.clamp(c.min_value, c.max_value);
        }
        if let Some((id, value)) = self.on_first_pulse.take()
            && let Some(c) = controls.iter_mut().find(|c| c.id == id)
        {
            c.current_value = value;
        }
        if self
            .switch_car_after
            .is_some_and(|n| self.recorder.len() >= n)
        {
            self.session = SessionIdentity::new("Oreca 07 LMP2", "Monza", SessionState::Practice);
        }
        self.catalog.refresh(&TelemetrySnapshot {
            session: self.session.clone(),
            controls: controls.clone(),
        });
        if self
            .disconnect_after
            .is_some_and(|n| self.recorder.len() >= n)
        {
            self.catalog.set_link_state(LinkState::Disconnected);
        }
        Ok(())
    }
}

fn engine_with(
    catalog: &Arc<ControlCatalog>,
    sink: impl PulseSink + 'static,
) -> Result<(Arc<ActuationEngine>, ActuationNoticeReceiver), ActuationError> {
    let (tx, rx) = notice_channel();
    let config = ActuationConfig {
        rng_seed: Some(42),
        ..ActuationConfig::default()
    };
    let engine = ActuationEngine::new(config, Arc::clone(catalog), shared_sink(sink))?.with_notices(tx);
    engine.start(None)?;
    Ok((Arc::new(engine), rx))
}

async fn wait_for_notice(
    rx: &mut ActuationNoticeReceiver,
    mut pred: impl FnMut(&ActuationNotice) -> bool,
) -> Option<ActuationNotice> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(notice)) if pred(&notice) => return Some(notice),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}

mod presets {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn brake_bias_fifty_to_fifty_four_sends_eight_pulses() -> TestResult {
        let catalog = fresh_catalog(&[brake_bias(50.0)]);
        let sink = RecordingSink::new();
        let (engine, _rx) = engine_with(&catalog, sink.clone())?;

        let ticket = engine.activate_preset("dcBrakeBias", 54.0, fast())?;
        assert_eq!(ticket.planned(), 8);
        let outcome = ticket.wait().await;

        assert_eq!(outcome.dispatched, 8);
        assert_eq!(outcome.halt, BurstHalt::Completed);
        assert_eq!(sink.count("dcBrakeBias", Direction::Increase), 8);
        assert_eq!(sink.count("dcBrakeBias", Direction::Decrease), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn burst_halts_once_telemetry_reports_target() -> TestResult {
        let controls = [brake_bias(50.0)];
        let catalog = fresh_catalog(&controls);
        let sink = SimSink::new(&catalog, &controls, 2.0);
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let outcome = engine.activate_preset("dcBrakeBias", 54.0, fast())?.wait().await;

        assert_eq!(outcome.halt, BurstHalt::TargetReached);
        assert_eq!(outcome.dispatched, 4);
        assert_eq!(recorder.len(), 4);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overshoot_is_logged_not_corrected() -> TestResult {
        let controls = [brake_bias(50.0)];
        let catalog = fresh_catalog(&controls);
        let sink = SimSink::new(&catalog, &controls, 3.0);
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let outcome = engine.activate_preset("dcBrakeBias", 54.0, fast())?.wait().await;

        assert!(matches!(outcome.halt, BurstHalt::Overshoot { observed } if (observed - 54.5).abs() < 1e-9));
        assert_eq!(outcome.dispatched, 3);
        assert_eq!(recorder.count("dcBrakeBias", Direction::Decrease), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn off_grid_start_still_reaches_the_maximum() -> TestResult {
        let controls = [brake_bias(50.2)];
        let catalog = fresh_catalog(&controls);
        let sink = SimSink::new(&catalog, &controls, 1.0);
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let ticket = engine.activate_preset("dcBrakeBias", 60.0, fast())?;
        assert_eq!(ticket.planned(), 20);
        let outcome = ticket.wait().await;

        assert!(
            matches!(outcome.halt, BurstHalt::Completed | BurstHalt::TargetReached),
            "halt was {:?}",
            outcome.halt
        );
        assert_eq!(outcome.dispatched, 20);
        assert_eq!(recorder.count("dcBrakeBias", Direction::Increase), 20);
        let value = catalog.lookup("dcBrakeBias")?.current_value;
        assert!((value - 60.0).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn out_of_range_preset_is_rejected() -> TestResult {
        let catalog = fresh_catalog(&[brake_bias(50.0)]);
        let sink = RecordingSink::new();
        let (engine, _rx) = engine_with(&catalog, sink.clone())?;

        let result = engine.activate_preset("dcBrakeBias", 65.0, fast());
        assert!(matches!(result, Err(ActuationError::TargetOutOfRange { .. })));
        assert!(sink.is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pause_aborts_a_running_burst() -> TestResult {
        let controls = [brake_bias(40.0)];
        let catalog = fresh_catalog(&controls);
        let sink = SimSink::new(&catalog, &controls, 0.0);
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let relaxed = TimingPreset::Relaxed.profile();
        let ticket = engine.activate_preset("dcBrakeBias", 60.0, relaxed)?;
        assert_eq!(ticket.planned(), 40);
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.set_paused(true)?;
        let outcome = ticket.wait().await;

        assert_eq!(outcome.halt, BurstHalt::Cancelled);
        assert!(outcome.dispatched < 40);
        assert_eq!(recorder.len(), usize::try_from(outcome.dispatched)?);
        assert!(matches!(
            engine.activate_preset("dcBrakeBias", 50.0, fast()),
            Err(ActuationError::Paused)
        ));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn preset_on_unknown_control_is_reported() -> TestResult {
        let catalog = fresh_catalog(&[brake_bias(50.0)]);
        let (engine, _rx) = engine_with(&catalog, RecordingSink::new())?;
        assert_eq!(
            engine.activate_preset("dcTyreHeat", 1.0, fast()).err(),
            Some(ActuationError::UnknownControl("dcTyreHeat".to_string()))
        );
        Ok(())
    }
}

mod holds {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn release_stops_pulses_within_one_interval() -> TestResult {
        let controls = [integer("dcABS", 1.0)];
        let catalog = fresh_catalog(&controls);
        let sink = SimSink::new(&catalog, &controls, 1.0);
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;
        let input = InputId::parse("F1")?;

        engine.press("dcABS", Direction::Increase, input.clone(), fast())?;
        tokio::time::sleep(Duration::from_millis(400)).await;
        let released_at = Instant::now();
        engine.release("dcABS", input)?;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let pulses = recorder.pulses();
        assert!(pulses.len() >= 3, "expected repeats, got {}", pulses.len());
        let period = fast().max_period();
        let late = pulses
            .iter()
            .filter(|p| p.at > released_at + period)
            .count();
        assert_eq!(late, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hold_stops_at_bound_even_if_telemetry_lags() -> TestResult {
        let catalog = fresh_catalog(&[integer("dcABS", 10.0)]);
        let sink = RecordingSink::new();
        let (engine, mut rx) = engine_with(&catalog, sink.clone())?;
        let input = InputId::parse("F1")?;

        engine.press("dcABS", Direction::Increase, input, fast())?;
        let ended = wait_for_notice(&mut rx, |n| matches!(n, ActuationNotice::HoldEnded { .. })).await;

        assert!(matches!(
            ended,
            Some(ActuationNotice::HoldEnded { end: HoldEnd::AtBound, pulses: 2, .. })
        ));
        assert_eq!(sink.count("dcABS", Direction::Increase), 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_cancels_hold_and_refuses_new_presses() -> TestResult {
        let catalog = fresh_catalog(&[integer("dcABS", 1.0)]);
        let (engine, mut rx) = engine_with(&catalog, RecordingSink::new())?;
        let input = InputId::parse("JOY:0:4")?;

        engine.press("dcABS", Direction::Increase, input.clone(), fast())?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        catalog.set_link_state(LinkState::Disconnected);

        let ended = wait_for_notice(&mut rx, |n| matches!(n, ActuationNotice::HoldEnded { .. })).await;
        assert!(matches!(
            ended,
            Some(ActuationNotice::HoldEnded { end: HoldEnd::Unavailable, .. })
        ));
        assert!(matches!(
            engine.press("dcABS", Direction::Increase, input, fast()),
            Err(ActuationError::ControlsUnavailable { state: LinkState::Disconnected })
        ));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restart_drops_holds_and_keeps_working() -> TestResult {
        let catalog = fresh_catalog(&[integer("dcABS", 1.0), brake_bias(50.0)]);
        let sink = RecordingSink::new();
        let (engine, mut rx) = engine_with(&catalog, sink.clone())?;

        engine.press("dcABS", Direction::Increase, InputId::parse("F1")?, fast())?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.restart()?;
        let ended = wait_for_notice(&mut rx, |n| matches!(n, ActuationNotice::HoldEnded { .. })).await;
        assert!(matches!(
            ended,
            Some(ActuationNotice::HoldEnded { end: HoldEnd::DispatcherStopped, .. })
        ));

        let outcome = engine.activate_preset("dcBrakeBias", 51.0, fast())?.wait().await;
        assert_eq!(outcome.dispatched, 2);
        Ok(())
    }
}

mod combos {
    use super::*;

    fn five_step_combo() -> ComboDefinition {
        ["dcA", "dcB", "dcC", "dcD", "dcE"]
            .into_iter()
            .fold(ComboDefinition::new("pit exit"), |combo, id| combo.with_step(id, 2.0))
    }

    fn five_controls() -> Vec<ControlDescriptor> {
        ["dcA", "dcB", "dcC", "dcD", "dcE"]
            .into_iter()
            .map(|id| integer(id, 1.0))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_after_two_steps_discards_the_rest() -> TestResult {
        let controls = five_controls();
        let catalog = fresh_catalog(&controls);
        let mut sink = SimSink::new(&catalog, &controls, 0.0);
        sink.disconnect_after = Some(2);
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let executor = ComboExecutor::new(Arc::clone(&engine));
        let report = executor
            .execute(&five_step_combo(), &TimingTable::new(fast()), |_| {})
            .await?;

        assert_eq!(report.dispatched.len(), 2);
        assert_eq!(report.discarded, vec!["dcC", "dcD", "dcE"]);
        assert_eq!(report.interrupted, Some(ComboInterruption::LinkLost));
        // Nothing was retried or undone
        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.count("dcA", Direction::Decrease), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bursts_are_planned_from_the_starting_snapshot() -> TestResult {
        let controls = vec![integer("dcABS", 4.0), integer("dcTractionControl", 5.0)];
        let catalog = fresh_catalog(&controls);
        let mut sink = SimSink::new(&catalog, &controls, 0.0);
        sink.on_first_pulse = Some(("dcTractionControl".to_string(), 7.0));
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let combo = ComboDefinition::new("wet")
            .with_step("dcABS", 8.0)
            .with_step("dcTractionControl", 9.0);
        let mut progress = Vec::new();
        let report = ComboExecutor::new(Arc::clone(&engine))
            .execute(&combo, &TimingTable::new(fast()), |p| progress.push(p.completed))
            .await?;

        assert_eq!(report.dispatched.len(), 2);
        assert_eq!(recorder.count("dcABS", Direction::Increase), 4);
        // Telemetry moved TC to 7 mid-combo; the burst still uses 5 -> 9
        assert_eq!(recorder.count("dcTractionControl", Direction::Increase), 4);
        assert_eq!(progress, vec![1, 2]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unknown_and_out_of_range_steps_are_skipped() -> TestResult {
        let catalog = fresh_catalog(&[integer("dcABS", 4.0)]);
        let sink = RecordingSink::new();
        let (engine, _rx) = engine_with(&catalog, sink.clone())?;

        let combo = ComboDefinition::new("mixed")
            .with_step("dcTyreHeat", 2.0)
            .with_step("dcABS", 15.0)
            .with_step("dcABS", 5.0);
        let report = ComboExecutor::new(Arc::clone(&engine))
            .execute(&combo, &TimingTable::new(fast()), |_| {})
            .await?;

        assert_eq!(report.skipped.len(), 2);
        assert!(matches!(
            report.skipped.first().map(|s| &s.reason),
            Some(ActuationError::UnknownControl(_))
        ));
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(sink.count("dcABS", Direction::Increase), 1);
        assert!(!report.is_partial());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn combo_refused_while_disconnected() -> TestResult {
        let catalog = fresh_catalog(&[integer("dcABS", 4.0)]);
        let (engine, _rx) = engine_with(&catalog, RecordingSink::new())?;
        catalog.set_link_state(LinkState::Disconnected);

        let result = ComboExecutor::new(Arc::clone(&engine))
            .execute(
                &ComboDefinition::new("dry").with_step("dcABS", 3.0),
                &TimingTable::new(fast()),
                |_| {},
            )
            .await;
        assert!(matches!(result, Err(ActuationError::ControlsUnavailable { .. })));
        Ok(())
    }

    fn abs_then_tc() -> ComboDefinition {
        ComboDefinition::new("rain")
            .with_step("dcABS", 12.0)
            .with_step("dcTractionControl", 3.0)
    }

    async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        done()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn car_change_and_cancel_stop_the_combo() -> TestResult {
        let controls = vec![integer("dcABS", 4.0), integer("dcTractionControl", 5.0)];
        let catalog = fresh_catalog(&controls);
        let mut sink = SimSink::new(&catalog, &controls, 0.0);
        sink.switch_car_after = Some(1);
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let executor = ComboExecutor::new(Arc::clone(&engine));
        let combo = tokio::spawn(async move {
            executor
                .execute(&abs_then_tc(), &TimingTable::new(fast()), |_| {})
                .await
        });
        let switched = wait_until(|| {
            catalog
                .snapshot()
                .session()
                .is_some_and(|s| s.car_name.starts_with("Oreca"))
        })
        .await;
        assert!(switched);
        engine.cancel_all()?;
        let report = combo.await??;

        assert_eq!(report.interrupted, Some(ComboInterruption::Cancelled));
        assert_eq!(
            report.dispatched.first().map(|s| &s.outcome.halt),
            Some(&BurstHalt::Cancelled)
        );
        assert_eq!(report.discarded, vec!["dcTractionControl"]);
        assert_eq!(recorder.count("dcTractionControl", Direction::Decrease), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn steps_planned_for_the_old_car_are_discarded() -> TestResult {
        let controls = vec![integer("dcABS", 11.0), integer("dcTractionControl", 5.0)];
        let catalog = fresh_catalog(&controls);
        let mut sink = SimSink::new(&catalog, &controls, 1.0);
        sink.switch_car_after = Some(1);
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let report = ComboExecutor::new(Arc::clone(&engine))
            .execute(&abs_then_tc(), &TimingTable::new(fast()), |_| {})
            .await?;

        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(report.interrupted, Some(ComboInterruption::SessionChanged));
        assert_eq!(report.discarded, vec!["dcTractionControl"]);
        assert_eq!(recorder.count("dcTractionControl", Direction::Decrease), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dispatcher_restart_is_reported_apart_from_link_loss() -> TestResult {
        let controls = vec![integer("dcABS", 4.0), integer("dcTractionControl", 5.0)];
        let catalog = fresh_catalog(&controls);
        let sink = SimSink::new(&catalog, &controls, 0.0);
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let executor = ComboExecutor::new(Arc::clone(&engine));
        let combo = tokio::spawn(async move {
            executor
                .execute(&abs_then_tc(), &TimingTable::new(fast()), |_| {})
                .await
        });
        assert!(wait_until(|| !recorder.is_empty()).await);
        engine.restart()?;
        let report = combo.await??;

        assert_eq!(report.interrupted, Some(ComboInterruption::DispatcherStopped));
        assert_eq!(report.discarded, vec!["dcTractionControl"]);
        assert_eq!(recorder.count("dcTractionControl", Direction::Decrease), 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pausing_stops_the_combo_and_refuses_new_ones() -> TestResult {
        let controls = vec![integer("dcABS", 4.0), integer("dcTractionControl", 5.0)];
        let catalog = fresh_catalog(&controls);
        let sink = SimSink::new(&catalog, &controls, 0.0);
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let executor = ComboExecutor::new(Arc::clone(&engine));
        let running = executor.clone();
        let combo = tokio::spawn(async move {
            running
                .execute(&abs_then_tc(), &TimingTable::new(fast()), |_| {})
                .await
        });
        assert!(wait_until(|| !recorder.is_empty()).await);
        engine.set_paused(true)?;
        let report = combo.await??;

        assert_eq!(report.interrupted, Some(ComboInterruption::Paused));
        assert_eq!(report.discarded, vec!["dcTractionControl"]);
        assert_eq!(recorder.count("dcTractionControl", Direction::Decrease), 0);

        let refused = executor
            .execute(&abs_then_tc(), &TimingTable::new(fast()), |_| {})
            .await;
        assert!(matches!(refused, Err(ActuationError::Paused)));
        Ok(())
    }
}

mod calibration {
    use super::*;
    use incar_actuation::TimingCalibrator;
    use incar_timing::CalibrationConfig;

    fn quick(max_ms: u64) -> CalibrationConfig {
        CalibrationConfig {
            max_ms,
            settle_ms: 10,
            ..CalibrationConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn finds_the_shortest_registered_press_and_steps_back() -> TestResult {
        let controls = [brake_bias(50.0)];
        let catalog = fresh_catalog(&controls);
        let mut sink = SimSink::new(&catalog, &controls, 1.0);
        sink.min_press = Duration::from_millis(5);
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let report = TimingCalibrator::new(Arc::clone(&engine), quick(20))?
            .run("dcBrakeBias")
            .await?;

        assert_eq!(report.suggested_ms, Some(5));
        assert_eq!(report.direction, Direction::Increase);
        assert_eq!(report.tried.len(), 5);
        assert!(report.tried.iter().take(4).all(|c| c.registered == 0));
        // Test pulses are exact; the float press extension is not added
        assert!(recorder.pulses().iter().all(|p| p.pulse.press <= Duration::from_millis(5)));
        assert_eq!(recorder.count("dcBrakeBias", Direction::Increase), 6);
        assert_eq!(recorder.count("dcBrakeBias", Direction::Decrease), 2);
        assert!((report.final_value - 50.0).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn control_at_its_maximum_is_calibrated_downwards() -> TestResult {
        let controls = [integer("dcABS", 12.0)];
        let catalog = fresh_catalog(&controls);
        let sink = SimSink::new(&catalog, &controls, 1.0);
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let report = TimingCalibrator::new(Arc::clone(&engine), quick(5))?
            .run("dcABS")
            .await?;

        assert_eq!(report.direction, Direction::Decrease);
        assert_eq!(report.suggested_ms, Some(1));
        assert!((report.final_value - 12.0).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nothing_registers_within_the_search_bounds() -> TestResult {
        let controls = [integer("dcABS", 4.0)];
        let catalog = fresh_catalog(&controls);
        let mut sink = SimSink::new(&catalog, &controls, 1.0);
        sink.min_press = Duration::from_millis(50);
        let recorder = sink.recorder.clone();
        let (engine, _rx) = engine_with(&catalog, sink)?;

        let report = TimingCalibrator::new(Arc::clone(&engine), quick(6))?
            .run("dcABS")
            .await?;

        assert_eq!(report.suggested_ms, None);
        assert_eq!(report.tried.len(), 6);
        assert_eq!(recorder.len(), 6);
        assert_eq!(report.aborted, None);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn calibration_is_refused_while_paused() -> TestResult {
        let catalog = fresh_catalog(&[integer("dcABS", 4.0)]);
        let (engine, _rx) = engine_with(&catalog, RecordingSink::new())?;
        engine.set_paused(true)?;

        let result = TimingCalibrator::new(Arc::clone(&engine), quick(6))?
            .run("dcABS")
            .await;
        assert!(matches!(result, Err(ActuationError::Paused)));
        Ok(())
    }

    #[test]
    fn unusable_schedule_is_rejected() -> TestResult {
        let catalog = fresh_catalog(&[integer("dcABS", 4.0)]);
        let engine = Arc::new(ActuationEngine::new(
            ActuationConfig::default(),
            catalog,
            shared_sink(RecordingSink::new()),
        )?);
        let config = CalibrationConfig {
            confirmations: 0,
            ..CalibrationConfig::default()
        };
        assert!(matches!(
            TimingCalibrator::new(engine, config),
            Err(ActuationError::InvalidConfig(_))
        ));
        Ok(())
    }
}
