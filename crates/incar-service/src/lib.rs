//! # incar-service
//!
//! The engine runtime and the `incard` daemon.
//!
//! [`Engine`] assembles the telemetry reader, the actuation engine and the
//! watchdog around one core loop. The loop reacts to session changes by
//! loading the matching profile from the [`BindingStore`], routes input
//! events through the profile's bindings, and accepts typed
//! [`EngineCommand`]s from an [`EngineHandle`]. Everything observable is
//! published on the [`EventBus`] as an [`EngineEvent`].
//!
//! [`BindingStore`]: incar_profile_repository::BindingStore

#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_debug_implementations
)]

pub mod commands;
pub mod config;
pub mod events;
pub mod runtime;
pub mod sim;
pub mod supervised;

pub use commands::{CommandError, CommandReply, CommandResult, EngineCommand, EngineMode};
pub use config::{
    ActuationSettings, EngineConfig, InputSettings, ProfileSettings, SourceKind, TelemetrySettings,
    app_data_dir, default_config_path,
};
pub use events::{EVENT_BUS_CAPACITY, EngineEvent, EventBus};
pub use runtime::{Engine, EngineHandle};
pub use sim::{LoggingSink, SimulatedSimulator};
pub use supervised::{DISPATCH_LOOP, DispatchLoop, TELEMETRY_LOOP, TelemetryLoop};
