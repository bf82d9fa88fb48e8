//! Three-state staleness tracking for the telemetry link.

use crate::error::StalenessConfigError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default number of consecutive failed polls before declaring a disconnect.
pub const DEFAULT_DISCONNECT_AFTER_MISSES: u32 = 30;

/// How current the engine's view of the simulator is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum LinkState {
    /// The last poll succeeded.
    Fresh = 0,
    /// Some polls failed; last-known values are still used.
    Stale = 1,
    /// Too many polls failed; actuation is refused.
    #[default]
    Disconnected = 2,
}

impl LinkState {
    /// Whether new actuation requests may be accepted.
    pub fn accepts_actuation(self) -> bool {
        !matches!(self, LinkState::Disconnected)
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => LinkState::Fresh,
            1 => LinkState::Stale,
            _ => LinkState::Disconnected,
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Fresh => write!(f, "fresh"),
            LinkState::Stale => write!(f, "stale"),
            LinkState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Thresholds for the staleness state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessConfig {
    /// Consecutive misses before `Stale`.
    pub stale_after_misses: u32,
    /// Consecutive misses before `Disconnected`.
    pub disconnect_after_misses: u32,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            stale_after_misses: 1,
            disconnect_after_misses: DEFAULT_DISCONNECT_AFTER_MISSES,
        }
    }
}

impl StalenessConfig {
    /// Validate thresholds.
    pub fn validate(&self) -> Result<(), StalenessConfigError> {
        if self.stale_after_misses == 0 {
            return Err(StalenessConfigError::ZeroStaleThreshold);
        }
        if self.disconnect_after_misses < self.stale_after_misses {
            return Err(StalenessConfigError::DisconnectBeforeStale {
                stale: self.stale_after_misses,
                disconnect: self.disconnect_after_misses,
            });
        }
        Ok(())
    }
}

/// A change of [`LinkState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTransition {
    /// State before the poll.
    pub previous: LinkState,
    /// State after the poll.
    pub current: LinkState,
}

impl LinkTransition {
    /// The link was lost on this poll.
    pub fn is_disconnection(&self) -> bool {
        self.previous != LinkState::Disconnected && self.current == LinkState::Disconnected
    }

    /// The link came back on this poll.
    pub fn is_reconnection(&self) -> bool {
        self.previous == LinkState::Disconnected && self.current != LinkState::Disconnected
    }
}

/// Counts consecutive poll failures and derives the link state.
#[derive(Debug)]
pub struct StalenessTracker {
    config: StalenessConfig,
    state: LinkState,
    consecutive_misses: u32,
    total_misses: u64,
    last_success: Option<Instant>,
}

impl StalenessTracker {
    /// Start in `Disconnected`: nothing has been read yet.
    pub fn new(config: StalenessConfig) -> Self {
        Self {
            config,
            state: LinkState::Disconnected,
            consecutive_misses: 0,
            total_misses: 0,
            last_success: None,
        }
    }

    /// Record a successful poll.
    pub fn record_success(&mut self) -> Option<LinkTransition> {
        self.last_success = Some(Instant::now());
        self.consecutive_misses = 0;
        self.transition_to(LinkState::Fresh)
    }

    /// Record a failed poll.
    pub fn record_failure(&mut self) -> Option<LinkTransition> {
        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        self.total_misses = self.total_misses.saturating_add(1);

        let next = if self.consecutive_misses >= self.config.disconnect_after_misses {
            LinkState::Disconnected
        } else if self.consecutive_misses >= self.config.stale_after_misses
            && self.state != LinkState::Disconnected
        {
            LinkState::Stale
        } else {
            self.state
        };
        self.transition_to(next)
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Failed polls since the last success.
    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    /// Failed polls since creation.
    pub fn total_misses(&self) -> u64 {
        self.total_misses
    }

    /// Time since the last successful poll.
    pub fn time_since_success(&self) -> Option<Duration> {
        self.last_success.map(|t| t.elapsed())
    }

    fn transition_to(&mut self, next: LinkState) -> Option<LinkTransition> {
        if next == self.state {
            return None;
        }
        let previous = self.state;
        self.state = next;
        Some(LinkTransition {
            previous,
            current: next,
        })
    }
}
