//! Prelude module for convenient imports

pub use crate::error::{WatchdogError, WatchdogResult};
pub use crate::health::{Heartbeat, LoopHealth, LoopStatus};
pub use crate::supervisor::{SupervisedLoop, Watchdog, WatchdogConfig, WatchdogEvent};
