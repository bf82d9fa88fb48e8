//! Prelude for incar-input.

pub use crate::allowlist::DeviceAllowlist;
pub use crate::error::{InputError, InputResult};
pub use crate::event::{InputEvent, InputPhase};
pub use crate::hub::{InputHub, InputReceiver, InputSender};
pub use crate::id::{InputId, InputSource};
pub use crate::router::BindingMap;
