//! Input event source for incar.
//!
//! Keyboard, HID, and voice front ends each get an [`InputSender`] from the
//! [`InputHub`]. Identifiers are normalized to [`InputId`]s and phases are
//! cleaned up per front end before they reach the engine, which sees a
//! single ordered stream of [`InputEvent`]s and resolves them through a
//! [`BindingMap`].

#![deny(static_mut_refs)]

pub mod allowlist;
pub mod error;
pub mod event;
pub mod hub;
pub mod id;
pub mod router;
pub mod text;

pub mod prelude;

pub use allowlist::DeviceAllowlist;
pub use error::{InputError, InputResult};
pub use event::{InputEvent, InputPhase, PhaseNormalizer};
pub use hub::{DEFAULT_INPUT_QUEUE, InputHub, InputReceiver, InputSender};
pub use id::{InputId, InputSource, normalize_phrase};
pub use router::BindingMap;
pub use text::{parse_command, spawn_line_source, spawn_stdin};
