//! Watchdog adapters for the engine's two timing-sensitive loops.
//!
//! Each adapter owns only the loop's execution context. The catalog, the
//! binding store and the active profile are passed in from outside and
//! survive a restart untouched.

use incar_actuation::{ActuationEngine, IDLE_TICK};
use incar_telemetry::{BeatFn, TelemetryReader};
use incar_watchdog::SupervisedLoop;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Name of the telemetry poll loop in watchdog events.
pub const TELEMETRY_LOOP: &str = "telemetry";
/// Name of the actuation dispatcher in watchdog events.
pub const DISPATCH_LOOP: &str = "actuation";

/// Floor of the beat interval budgeted for the dispatcher. The dispatcher
/// beats every loop turn and after every pulse, so the longest gap between
/// beats is one press; [`DispatchLoop`] widens the budget to the longest
/// press the engine's config allows.
pub const DISPATCH_EXPECTED_INTERVAL: Duration = Duration::from_millis(250);

/// The telemetry poll task.
pub struct TelemetryLoop {
    reader: TelemetryReader,
    expected_interval: Duration,
    runtime: Handle,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TelemetryLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryLoop")
            .field("reader", &self.reader)
            .field("expected_interval", &self.expected_interval)
            .finish_non_exhaustive()
    }
}

impl TelemetryLoop {
    pub fn new(reader: TelemetryReader, expected_interval: Duration, runtime: Handle) -> Self {
        Self {
            reader,
            expected_interval,
            runtime,
            task: Mutex::new(None),
        }
    }

    /// Start the poll task beating on `beat`, replacing any previous one.
    pub fn start(&self, beat: BeatFn) {
        let _entered = self.runtime.enter();
        let handle = self.reader.spawn(Some(beat));
        if let Some(old) = self.task.lock().replace(handle) {
            old.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn reader(&self) -> &TelemetryReader {
        &self.reader
    }
}

impl SupervisedLoop for TelemetryLoop {
    fn name(&self) -> &str {
        TELEMETRY_LOOP
    }

    fn expected_interval(&self) -> Duration {
        self.expected_interval
    }

    fn restart(&self, beat: BeatFn) -> Result<(), String> {
        debug!(misses = self.reader.consecutive_misses(), "Respawning telemetry poll task");
        self.start(beat);
        Ok(())
    }
}

/// The actuation dispatcher thread.
#[derive(Debug)]
pub struct DispatchLoop {
    engine: Arc<ActuationEngine>,
}

impl DispatchLoop {
    pub fn new(engine: Arc<ActuationEngine>) -> Self {
        Self { engine }
    }
}

impl SupervisedLoop for DispatchLoop {
    fn name(&self) -> &str {
        DISPATCH_LOOP
    }

    fn expected_interval(&self) -> Duration {
        let longest_turn = self.engine.config().longest_press().saturating_add(IDLE_TICK);
        DISPATCH_EXPECTED_INTERVAL.max(longest_turn)
    }

    /// The engine keeps the beat it was started with, which is this same
    /// heartbeat.
    fn restart(&self, _beat: BeatFn) -> Result<(), String> {
        self.engine
            .restart()
            .map(|generation| debug!(generation, "Dispatcher generation replaced"))
            .map_err(|e| e.to_string())
    }
}
