//! The watchdog supervisor.
//!
//! Every monitored loop is registered as a [`SupervisedLoop`] and receives a
//! [`BeatFn`] to call on each turn. The supervisor checks heartbeat ages on a
//! fixed interval; a loop whose heartbeat is older than
//! `stall_factor × expected_interval` is restarted in isolation through its
//! own [`SupervisedLoop::restart`]. Shared state (catalog, binding store,
//! loaded profile) lives outside the loop and is untouched by a restart.

use incar_telemetry::BeatFn;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{WatchdogError, WatchdogResult};
use crate::escalation::{Escalation, RestartHistory};
use crate::health::{Heartbeat, LoopHealth, LoopStatus};

/// A loop the watchdog can restart.
///
/// Implementations own the handle to the loop's execution context (a task or
/// a thread) and recreate only that context in `restart`.
pub trait SupervisedLoop: Send + Sync {
    /// Stable name used in logs and events.
    fn name(&self) -> &str;

    /// How often the loop beats when healthy.
    fn expected_interval(&self) -> Duration;

    /// Tear down the stalled context and start a new one beating on `beat`.
    ///
    /// # Errors
    ///
    /// A description of why the new context could not be started.
    fn restart(&self, beat: BeatFn) -> Result<(), String>;
}

/// Something the supervisor did or noticed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// A stalled loop was restarted.
    Restarted {
        loop_name: String,
        /// Heartbeat age that triggered the restart.
        stalled_for: Duration,
        restarts_in_window: usize,
    },
    /// A restart attempt failed; it is retried on a later check.
    RestartFailed { loop_name: String, reason: String },
    /// Restarts recur; surfaced to the user instead of looping silently.
    Degraded {
        loop_name: String,
        restarts_in_window: usize,
        window: Duration,
    },
    /// The escalation window has emptied again.
    Recovered { loop_name: String },
}

/// Callback invoked for every [`WatchdogEvent`].
pub type WatchdogCallback = Arc<dyn Fn(&WatchdogEvent) + Send + Sync>;

/// Watchdog configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// How often heartbeats are checked (milliseconds).
    pub check_interval_ms: u64,
    /// A loop stalls when its heartbeat is older than this many expected intervals.
    pub stall_factor: u32,
    /// Sliding window for counting restarts (seconds).
    pub escalation_window_s: u64,
    /// Restarts within the window that escalate to degraded mode.
    pub escalation_restart_limit: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 100,
            stall_factor: 3,
            escalation_window_s: 60,
            escalation_restart_limit: 3,
        }
    }
}

impl WatchdogConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is zero.
    pub fn validate(&self) -> WatchdogResult<()> {
        if self.check_interval_ms == 0 {
            return Err(WatchdogError::invalid_configuration(
                "check_interval_ms must be greater than 0",
            ));
        }
        if self.stall_factor == 0 {
            return Err(WatchdogError::invalid_configuration(
                "stall_factor must be greater than 0",
            ));
        }
        if self.escalation_window_s == 0 {
            return Err(WatchdogError::invalid_configuration(
                "escalation_window_s must be greater than 0",
            ));
        }
        if self.escalation_restart_limit == 0 {
            return Err(WatchdogError::invalid_configuration(
                "escalation_restart_limit must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> WatchdogConfigBuilder {
        WatchdogConfigBuilder::default()
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    #[must_use]
    pub fn escalation_window(&self) -> Duration {
        Duration::from_secs(self.escalation_window_s)
    }

    /// Heartbeat age beyond which a loop with `expected` interval is stalled.
    #[must_use]
    pub fn stall_threshold(&self, expected: Duration) -> Duration {
        expected.saturating_mul(self.stall_factor)
    }
}

/// Builder for `WatchdogConfig`.
#[derive(Debug, Default)]
pub struct WatchdogConfigBuilder {
    config: WatchdogConfig,
}

impl WatchdogConfigBuilder {
    #[must_use]
    pub fn check_interval_ms(mut self, ms: u64) -> Self {
        self.config.check_interval_ms = ms;
        self
    }

    #[must_use]
    pub fn stall_factor(mut self, factor: u32) -> Self {
        self.config.stall_factor = factor;
        self
    }

    #[must_use]
    pub fn escalation_window_s(mut self, seconds: u64) -> Self {
        self.config.escalation_window_s = seconds;
        self
    }

    #[must_use]
    pub fn escalation_restart_limit(mut self, limit: u32) -> Self {
        self.config.escalation_restart_limit = limit;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> WatchdogResult<WatchdogConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

struct Supervised {
    task: Arc<dyn SupervisedLoop>,
    heartbeat: Heartbeat,
    history: RestartHistory,
    total_restarts: u64,
}

impl Supervised {
    fn status(&self, config: &WatchdogConfig, now: Instant) -> LoopStatus {
        let expected = self.task.expected_interval();
        let age = self.heartbeat.age_at(now);
        let health = if self.history.is_degraded() {
            LoopHealth::Degraded
        } else if age > config.stall_threshold(expected) {
            LoopHealth::Stalled
        } else if self.heartbeat.beats() == 0 {
            LoopHealth::Unknown
        } else {
            LoopHealth::Healthy
        };
        LoopStatus {
            name: self.task.name().to_string(),
            health,
            expected_interval: expected,
            heartbeat_age: age,
            total_restarts: self.total_restarts,
            restarts_in_window: self.history.recent(),
        }
    }
}

/// Supervises the engine's loops.
pub struct Watchdog {
    config: WatchdogConfig,
    loops: Mutex<BTreeMap<String, Supervised>>,
    callbacks: RwLock<Vec<WatchdogCallback>>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("config", &self.config)
            .field("loops", &self.loops.lock().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Watchdog {
    /// Create a watchdog with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: WatchdogConfig) -> WatchdogResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            loops: Mutex::new(BTreeMap::new()),
            callbacks: RwLock::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Start supervising `task`. Returns the beat closure the loop must call.
    ///
    /// # Errors
    ///
    /// `AlreadyRegistered` if a loop with the same name is supervised.
    pub fn register(&self, task: Arc<dyn SupervisedLoop>) -> WatchdogResult<BeatFn> {
        let name = task.name().to_string();
        let mut loops = self.loops.lock();
        if loops.contains_key(&name) {
            return Err(WatchdogError::already_registered(name));
        }
        let heartbeat = Heartbeat::new();
        let beat = heartbeat.beat_fn();
        debug!(
            loop_name = %name,
            expected_ms = u64::try_from(task.expected_interval().as_millis()).unwrap_or(u64::MAX),
            "Loop registered with watchdog"
        );
        loops.insert(
            name,
            Supervised {
                task,
                heartbeat,
                history: RestartHistory::new(
                    self.config.escalation_window(),
                    usize::try_from(self.config.escalation_restart_limit).unwrap_or(usize::MAX),
                ),
                total_restarts: 0,
            },
        );
        Ok(beat)
    }

    /// Stop supervising a loop.
    ///
    /// # Errors
    ///
    /// `UnknownLoop` if no loop has this name.
    pub fn unregister(&self, name: &str) -> WatchdogResult<()> {
        self.loops
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| WatchdogError::unknown_loop(name))
    }

    /// Add an event callback.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&WatchdogEvent) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Status of one loop.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<LoopStatus> {
        let now = Instant::now();
        self.loops
            .lock()
            .get(name)
            .map(|s| s.status(&self.config, now))
    }

    /// Status of every loop, sorted by name.
    #[must_use]
    pub fn statuses(&self) -> Vec<LoopStatus> {
        let now = Instant::now();
        self.loops
            .lock()
            .values()
            .map(|s| s.status(&self.config, now))
            .collect()
    }

    /// Whether any loop is in degraded mode.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.loops.lock().values().any(|s| s.history.is_degraded())
    }

    /// Check every loop once at `now`, restarting stalled ones.
    ///
    /// Returns the events raised; callbacks have already been invoked.
    pub fn check(&self, now: Instant) -> Vec<WatchdogEvent> {
        let mut events = Vec::new();
        {
            let mut loops = self.loops.lock();
            for (name, supervised) in loops.iter_mut() {
                if supervised.history.try_recover(now) {
                    info!(loop_name = %name, "Loop left degraded mode");
                    events.push(WatchdogEvent::Recovered {
                        loop_name: name.clone(),
                    });
                }

                let threshold = self.config.stall_threshold(supervised.task.expected_interval());
                let age = supervised.heartbeat.age_at(now);
                if age <= threshold {
                    continue;
                }

                self.restart_one(name, supervised, age, now, &mut events);
            }
        }

        self.notify(&events);
        events
    }

    fn restart_one(
        &self,
        name: &str,
        supervised: &mut Supervised,
        age: Duration,
        now: Instant,
        events: &mut Vec<WatchdogEvent>,
    ) {
        warn!(
            loop_name = %name,
            stalled_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
            "Loop stalled; restarting"
        );

        // Grace period for the new context, and for the retry if this fails.
        supervised.heartbeat.beat_at(now);
        supervised.total_restarts = supervised.total_restarts.saturating_add(1);
        let escalation = supervised.history.record(now);

        match supervised.task.restart(supervised.heartbeat.beat_fn()) {
            Ok(()) => {
                warn!(
                    loop_name = %name,
                    restarts_in_window = escalation.recent(),
                    "Loop restarted"
                );
                events.push(WatchdogEvent::Restarted {
                    loop_name: name.to_string(),
                    stalled_for: age,
                    restarts_in_window: escalation.recent(),
                });
            }
            Err(reason) => {
                error!(loop_name = %name, %reason, "Loop restart failed");
                events.push(WatchdogEvent::RestartFailed {
                    loop_name: name.to_string(),
                    reason,
                });
            }
        }

        if let Escalation::EnteredDegraded { recent } = escalation {
            error!(
                loop_name = %name,
                restarts = recent,
                window_s = self.config.escalation_window_s,
                "Loop keeps stalling; entering degraded mode"
            );
            events.push(WatchdogEvent::Degraded {
                loop_name: name.to_string(),
                restarts_in_window: recent,
                window: self.config.escalation_window(),
            });
        }
    }

    fn notify(&self, events: &[WatchdogEvent]) {
        if events.is_empty() {
            return;
        }
        let callbacks = self.callbacks.read();
        for event in events {
            for callback in callbacks.iter() {
                callback(event);
            }
        }
    }

    /// Run [`Watchdog::check`] on the tokio runtime until `shutdown` flips
    /// to `true` or its sender is dropped.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.check_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_ms = self.config.check_interval_ms,
                stall_factor = self.config.stall_factor,
                "Watchdog started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.check(Instant::now());
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Watchdog stopped");
        })
    }
}
