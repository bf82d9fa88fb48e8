//! Heartbeats and per-loop health reporting.
//!
//! A [`Heartbeat`] is a lock-free timestamp shared between a supervised loop
//! (which beats on every turn) and the supervisor (which reads its age).

use incar_telemetry::BeatFn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Health of one supervised loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LoopHealth {
    /// Beating within its stall threshold.
    Healthy,
    /// Heartbeat older than the stall threshold; a restart is due.
    Stalled,
    /// Restarted too often within the escalation window.
    Degraded,
    /// Not yet beaten since registration.
    #[default]
    Unknown,
}

impl std::fmt::Display for LoopHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopHealth::Healthy => write!(f, "Healthy"),
            LoopHealth::Stalled => write!(f, "Stalled"),
            LoopHealth::Degraded => write!(f, "Degraded"),
            LoopHealth::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Last-beat timestamp of a loop.
///
/// Cloning shares the timestamp. Beating never takes a lock.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    origin: Instant,
    /// Nanoseconds after `origin` of the last beat.
    last_ns: Arc<AtomicU64>,
    beaten: Arc<AtomicU64>,
}

impl Heartbeat {
    /// A heartbeat that counts as beaten now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ns: Arc::new(AtomicU64::new(0)),
            beaten: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record a beat.
    pub fn beat(&self) {
        self.beat_at(Instant::now());
    }

    /// Record a beat at `now`. Earlier timestamps than the last beat are ignored.
    pub fn beat_at(&self, now: Instant) {
        let offset = now.saturating_duration_since(self.origin);
        let ns = u64::try_from(offset.as_nanos()).unwrap_or(u64::MAX);
        self.last_ns.fetch_max(ns, Ordering::AcqRel);
        self.beaten.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of beats since creation.
    #[must_use]
    pub fn beats(&self) -> u64 {
        self.beaten.load(Ordering::Relaxed)
    }

    /// Time of the last beat.
    #[must_use]
    pub fn last(&self) -> Instant {
        let ns = self.last_ns.load(Ordering::Acquire);
        self.origin
            .checked_add(Duration::from_nanos(ns))
            .unwrap_or(self.origin)
    }

    /// Age of the last beat as seen at `now`.
    #[must_use]
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last())
    }

    /// Closure handed to the loop so it can beat without knowing the watchdog.
    #[must_use]
    pub fn beat_fn(&self) -> BeatFn {
        let heartbeat = self.clone();
        Arc::new(move || heartbeat.beat())
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time status of one supervised loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopStatus {
    /// Loop name.
    pub name: String,
    /// Current health.
    pub health: LoopHealth,
    /// Interval the loop promised to beat at.
    pub expected_interval: Duration,
    /// Age of the last beat.
    pub heartbeat_age: Duration,
    /// Restarts since registration.
    pub total_restarts: u64,
    /// Restarts inside the current escalation window.
    pub restarts_in_window: usize,
}
