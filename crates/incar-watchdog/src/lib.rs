//! # incar-watchdog
//!
//! Liveness supervision for the engine's long-running loops.
//!
//! The telemetry poll loop and the actuation dispatcher each beat a
//! [`Heartbeat`] on every turn. The [`Watchdog`] checks heartbeat ages on a
//! fixed interval and restarts a stalled loop in isolation: only the loop's
//! task or thread is recreated, while the control catalog, binding store and
//! loaded profile are shared state the restart never touches.
//!
//! Restarts that recur within the escalation window raise a
//! [`WatchdogEvent::Degraded`] notice instead of looping silently.
//!
//! ## Example
//!
//! ```rust
//! use incar_watchdog::prelude::*;
//! use incar_telemetry::BeatFn;
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//!
//! struct PollLoop;
//!
//! impl SupervisedLoop for PollLoop {
//!     fn name(&self) -> &str {
//!         "telemetry"
//!     }
//!     fn expected_interval(&self) -> Duration {
//!         Duration::from_millis(16)
//!     }
//!     fn restart(&self, _beat: BeatFn) -> Result<(), String> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), WatchdogError> {
//! let watchdog = Watchdog::new(WatchdogConfig::default())?;
//! let beat = watchdog.register(Arc::new(PollLoop))?;
//! beat();
//! assert!(watchdog.check(Instant::now()).is_empty());
//! # Ok(())
//! # }
//! ```

#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_debug_implementations
)]

pub mod error;
pub mod escalation;
pub mod health;
pub mod supervisor;

pub mod prelude;

pub use error::{WatchdogError, WatchdogResult};
pub use escalation::{Escalation, RestartHistory};
pub use health::{Heartbeat, LoopHealth, LoopStatus};
pub use supervisor::{
    SupervisedLoop, Watchdog, WatchdogCallback, WatchdogConfig, WatchdogConfigBuilder,
    WatchdogEvent,
};
