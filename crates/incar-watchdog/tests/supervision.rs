//! Watchdog against real tokio loops.

use incar_telemetry::BeatFn;
use incar_watchdog::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// A loop that beats every 10ms until told to hang. Its bindings live
/// outside the task, like the engine's catalog and store.
struct TickLoop {
    hang: Arc<AtomicBool>,
    hang_after_restart: bool,
    bindings: Arc<Mutex<Vec<String>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    restarts: AtomicU32,
}

impl TickLoop {
    fn new(hang_after_restart: bool) -> Arc<Self> {
        Arc::new(Self {
            hang: Arc::new(AtomicBool::new(false)),
            hang_after_restart,
            bindings: Arc::new(Mutex::new(vec!["dcBrakeBias".to_string()])),
            task: Mutex::new(None),
            restarts: AtomicU32::new(0),
        })
    }

    fn start(&self, beat: BeatFn) {
        let hang = Arc::clone(&self.hang);
        let handle = tokio::spawn(async move {
            loop {
                if !hang.load(Ordering::SeqCst) {
                    beat();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        if let Some(old) = self.task.lock().replace(handle) {
            old.abort();
        }
    }
}

impl SupervisedLoop for TickLoop {
    fn name(&self) -> &str {
        "tick"
    }

    fn expected_interval(&self) -> Duration {
        Duration::from_millis(10)
    }

    fn restart(&self, beat: BeatFn) -> Result<(), String> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.hang.store(self.hang_after_restart, Ordering::SeqCst);
        self.start(beat);
        Ok(())
    }
}

fn fast_config() -> Result<WatchdogConfig, WatchdogError> {
    WatchdogConfig::builder()
        .check_interval_ms(20)
        .stall_factor(3)
        .escalation_window_s(60)
        .escalation_restart_limit(3)
        .build()
}

fn forward_events(watchdog: &Watchdog) -> mpsc::UnboundedReceiver<WatchdogEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    watchdog.on_event(move |event| {
        if tx.send(event.clone()).is_err() {
            // Receiver dropped at the end of the test
        }
    });
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<WatchdogEvent>) -> Option<WatchdogEvent> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_loop_is_restarted_and_keeps_its_state() -> TestResult {
    let watchdog = Arc::new(Watchdog::new(fast_config()?)?);
    let mut events = forward_events(&watchdog);
    let tick = TickLoop::new(false);
    let beat = watchdog.register(tick.clone())?;
    tick.start(beat);

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = Arc::clone(&watchdog).spawn(stop_rx);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tick.restarts.load(Ordering::SeqCst), 0);
    assert_eq!(watchdog.status("tick").map(|s| s.health), Some(LoopHealth::Healthy));

    tick.hang.store(true, Ordering::SeqCst);
    let event = next_event(&mut events).await;
    assert!(matches!(event, Some(WatchdogEvent::Restarted { ref loop_name, .. }) if loop_name == "tick"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tick.restarts.load(Ordering::SeqCst), 1);
    assert_eq!(tick.bindings.lock().as_slice(), ["dcBrakeBias"]);
    assert!(!watchdog.is_degraded());

    stop_tx.send(true)?;
    handle.await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recurring_stalls_escalate_to_degraded_mode() -> TestResult {
    let watchdog = Arc::new(Watchdog::new(fast_config()?)?);
    let mut events = forward_events(&watchdog);
    let tick = TickLoop::new(true);
    let beat = watchdog.register(tick.clone())?;
    tick.start(beat);
    tick.hang.store(true, Ordering::SeqCst);

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = Arc::clone(&watchdog).spawn(stop_rx);

    let mut restarted = 0;
    let degraded = loop {
        match next_event(&mut events).await {
            Some(WatchdogEvent::Restarted { .. }) => restarted += 1,
            Some(WatchdogEvent::Degraded { restarts_in_window, .. }) => break Some(restarts_in_window),
            Some(_) => {}
            None => break None,
        }
    };

    assert_eq!(degraded, Some(3));
    assert_eq!(restarted, 3);
    assert!(watchdog.is_degraded());
    assert_eq!(watchdog.status("tick").map(|s| s.health), Some(LoopHealth::Degraded));

    stop_tx.send(true)?;
    handle.await?;
    Ok(())
}

#[tokio::test]
async fn dropping_the_shutdown_sender_stops_the_watchdog() -> TestResult {
    let watchdog = Arc::new(Watchdog::new(fast_config()?)?);
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = Arc::clone(&watchdog).spawn(stop_rx);
    drop(stop_tx);
    tokio::time::timeout(Duration::from_secs(1), handle).await??;
    Ok(())
}
