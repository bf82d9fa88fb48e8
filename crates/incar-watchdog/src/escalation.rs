//! Restart history and degraded-mode escalation.
//!
//! Each supervised loop keeps the instants of its recent restarts. Once the
//! number of restarts inside the sliding window reaches the limit, the loop
//! is escalated to degraded mode; it leaves degraded mode when the window
//! has emptied again.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// What recording a restart means for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Below the limit; the restart is routine.
    Isolated {
        /// Restarts inside the window, this one included.
        recent: usize,
    },
    /// The limit was just reached.
    EnteredDegraded {
        /// Restarts inside the window, this one included.
        recent: usize,
    },
    /// Already degraded and still restarting.
    StillDegraded {
        /// Restarts inside the window, this one included.
        recent: usize,
    },
}

impl Escalation {
    /// Restarts counted inside the window.
    #[must_use]
    pub fn recent(self) -> usize {
        match self {
            Self::Isolated { recent }
            | Self::EnteredDegraded { recent }
            | Self::StillDegraded { recent } => recent,
        }
    }
}

/// Sliding-window restart counter for one loop.
#[derive(Debug, Clone)]
pub struct RestartHistory {
    window: Duration,
    limit: usize,
    restarts: VecDeque<Instant>,
    degraded: bool,
}

impl RestartHistory {
    /// Escalate after `limit` restarts within `window`.
    #[must_use]
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit: limit.max(1),
            restarts: VecDeque::with_capacity(limit.max(1)),
            degraded: false,
        }
    }

    /// Record a restart at `now`.
    pub fn record(&mut self, now: Instant) -> Escalation {
        self.prune(now);
        self.restarts.push_back(now);
        let recent = self.restarts.len();
        if self.degraded {
            Escalation::StillDegraded { recent }
        } else if recent >= self.limit {
            self.degraded = true;
            Escalation::EnteredDegraded { recent }
        } else {
            Escalation::Isolated { recent }
        }
    }

    /// Drop restarts older than the window.
    pub fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.restarts.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
    }

    /// Leave degraded mode once no restart is left in the window.
    ///
    /// Returns `true` on the transition.
    pub fn try_recover(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.degraded && self.restarts.is_empty() {
            self.degraded = false;
            return true;
        }
        false
    }

    /// Restarts currently inside the window.
    #[must_use]
    pub fn recent(&self) -> usize {
        self.restarts.len()
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}
