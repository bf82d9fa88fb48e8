//! Fixed-cadence telemetry poll loop.
//!
//! Each poll reads the source under a timeout, commits the result to the
//! [`ControlCatalog`], advances the staleness state machine and publishes
//! [`TelemetryEvent`]s. A failed poll leaves the last committed snapshot in
//! place.
//!
//! The loop's bookkeeping lives behind an `Arc` so that a supervisor can
//! abort the task and call [`TelemetryReader::spawn`] again without losing
//! the staleness counters or the last seen session.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::catalog::{ControlCatalog, RefreshOutcome};
use crate::control::{SessionIdentity, SessionState};
use crate::error::{TelemetryError, TelemetryResult};
use crate::source::TelemetrySource;
use crate::staleness::{LinkState, LinkTransition, StalenessConfig, StalenessTracker};

/// Default poll rate.
pub const DEFAULT_POLL_HZ: u32 = 60;

/// Events produced by the poll loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// Car or track differs from the previous successful poll.
    SessionChanged {
        previous: Option<SessionIdentity>,
        current: SessionIdentity,
    },
    /// Same car and track, new session phase.
    SessionStateChanged {
        session: SessionIdentity,
        previous: SessionState,
    },
    /// A control's value moved.
    ValueChanged {
        control_id: String,
        previous: f64,
        current: f64,
    },
    /// The set of available controls changed.
    CatalogRefreshed {
        generation: u64,
        available: usize,
        appeared: Vec<String>,
        vanished: Vec<String>,
    },
    /// Fresh/stale/disconnected transition.
    LinkChanged(LinkTransition),
}

pub type TelemetryEventSender = mpsc::UnboundedSender<TelemetryEvent>;
pub type TelemetryEventReceiver = mpsc::UnboundedReceiver<TelemetryEvent>;

/// Called once per loop iteration so a supervisor can observe liveness.
pub type BeatFn = Arc<dyn Fn() + Send + Sync>;

/// Reader timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaderConfig {
    /// Time between polls.
    pub poll_interval: Duration,
    /// Budget for one source read.
    pub read_timeout: Duration,
    /// Staleness thresholds.
    pub staleness: StalenessConfig,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::from_hz(DEFAULT_POLL_HZ)
    }
}

impl ReaderConfig {
    /// Poll at `hz` with a read budget of three poll periods.
    pub fn from_hz(hz: u32) -> Self {
        let hz = u64::from(hz.max(1));
        let poll_interval = Duration::from_micros(1_000_000 / hz);
        Self {
            poll_interval,
            read_timeout: poll_interval.saturating_mul(3),
            staleness: StalenessConfig::default(),
        }
    }
}

#[derive(Debug)]
struct ReaderState {
    tracker: StalenessTracker,
    last_session: Option<SessionIdentity>,
}

/// Polls a [`TelemetrySource`] into a shared [`ControlCatalog`].
#[derive(Clone)]
pub struct TelemetryReader {
    source: Arc<dyn TelemetrySource>,
    catalog: Arc<ControlCatalog>,
    events: TelemetryEventSender,
    config: ReaderConfig,
    state: Arc<Mutex<ReaderState>>,
}

impl std::fmt::Debug for TelemetryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryReader")
            .field("source", &self.source.name())
            .field("config", &self.config)
            .finish()
    }
}

impl TelemetryReader {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        catalog: Arc<ControlCatalog>,
        events: TelemetryEventSender,
        config: ReaderConfig,
    ) -> Self {
        Self {
            source,
            catalog,
            events,
            state: Arc::new(Mutex::new(ReaderState {
                tracker: StalenessTracker::new(config.staleness),
                last_session: None,
            })),
            config,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ControlCatalog> {
        &self.catalog
    }

    /// Session of the last successful poll.
    pub fn last_session(&self) -> Option<SessionIdentity> {
        self.state.lock().last_session.clone()
    }

    /// Failed polls since the last success.
    pub fn consecutive_misses(&self) -> u32 {
        self.state.lock().tracker.consecutive_misses()
    }

    /// Perform one poll.
    ///
    /// # Errors
    ///
    /// Returns the source error after recording the miss. Callers treat every
    /// error as transient.
    pub async fn poll_once(&self) -> TelemetryResult<RefreshOutcome> {
        let read = tokio::time::timeout(self.config.read_timeout, self.source.read()).await;
        let result = match read {
            Ok(inner) => inner,
            Err(_elapsed) => Err(TelemetryError::Timeout {
                timeout_ms: u64::try_from(self.config.read_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match result {
            Ok(snapshot) => {
                let outcome = self.catalog.refresh(&snapshot);
                let (transition, previous_session) = {
                    let mut state = self.state.lock();
                    let transition = state.tracker.record_success();
                    let previous = state.last_session.replace(snapshot.session.clone());
                    (transition, previous)
                };
                self.catalog.set_link_state(LinkState::Fresh);
                if let Some(transition) = transition {
                    self.publish_link(transition);
                }
                self.publish_session(previous_session, &snapshot.session);
                self.publish_refresh(&outcome);
                Ok(outcome)
            }
            Err(err) => {
                let (transition, misses, state) = {
                    let mut state = self.state.lock();
                    let transition = state.tracker.record_failure();
                    (transition, state.tracker.consecutive_misses(), state.tracker.state())
                };
                self.catalog.set_link_state(state);
                if misses == 1 {
                    debug!(source = self.source.name(), error = %err, "telemetry poll failed");
                } else {
                    trace!(source = self.source.name(), misses, error = %err, "telemetry poll failed");
                }
                if let Some(transition) = transition {
                    self.publish_link(transition);
                }
                Err(err)
            }
        }
    }

    /// Run the poll loop on the tokio runtime until the event channel closes.
    pub fn spawn(&self, beat: Option<BeatFn>) -> JoinHandle<()> {
        let reader = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reader.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                source = reader.source.name(),
                interval_us = u64::try_from(reader.config.poll_interval.as_micros()).unwrap_or(u64::MAX),
                "telemetry reader started"
            );
            loop {
                ticker.tick().await;
                if let Some(beat) = &beat {
                    beat();
                }
                if let Err(err) = reader.poll_once().await {
                    trace!(error = %err, "poll miss");
                }
                if reader.events.is_closed() {
                    debug!("telemetry event channel closed; reader exiting");
                    break;
                }
            }
        })
    }

    fn emit(&self, event: TelemetryEvent) {
        if self.events.send(event).is_err() {
            trace!("telemetry event dropped: no receiver");
        }
    }

    fn publish_link(&self, transition: LinkTransition) {
        if transition.is_disconnection() {
            warn!(source = self.source.name(), "telemetry disconnected");
        } else if transition.is_reconnection() {
            info!(source = self.source.name(), "telemetry connected");
        } else {
            debug!(from = %transition.previous, to = %transition.current, "telemetry link state");
        }
        self.emit(TelemetryEvent::LinkChanged(transition));
    }

    fn publish_session(&self, previous: Option<SessionIdentity>, current: &SessionIdentity) {
        match previous {
            Some(prev) if prev.same_pairing(current) => {
                if prev.session_state != current.session_state {
                    info!(session = %current, state = ?current.session_state, "session state changed");
                    self.emit(TelemetryEvent::SessionStateChanged {
                        session: current.clone(),
                        previous: prev.session_state,
                    });
                }
            }
            previous => {
                info!(car = %current.car_name, track = %current.track_name, "session changed");
                self.emit(TelemetryEvent::SessionChanged {
                    previous,
                    current: current.clone(),
                });
            }
        }
    }

    fn publish_refresh(&self, outcome: &RefreshOutcome) {
        for change in &outcome.value_changes {
            self.emit(TelemetryEvent::ValueChanged {
                control_id: change.control_id.clone(),
                previous: change.previous,
                current: change.current,
            });
        }
        if outcome.car_changed || !outcome.appeared.is_empty() || !outcome.vanished.is_empty() {
            self.emit(TelemetryEvent::CatalogRefreshed {
                generation: outcome.generation,
                available: self.catalog.snapshot().available_count(),
                appeared: outcome.appeared.clone(),
                vanished: outcome.vanished.clone(),
            });
        }
    }
}
