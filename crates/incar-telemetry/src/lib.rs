//! Telemetry polling and the live control catalog.
//!
//! ## Modules
//! - `control` - Control descriptors, session identity, poll snapshots
//! - `discovery` - Raw telemetry variables to control descriptors
//! - `catalog` - Atomically refreshed catalog of available controls
//! - `staleness` - Fresh/stale/disconnected link tracking
//! - `source` - The `TelemetrySource` seam and a JSON snapshot-file source
//! - `reader` - Fixed-cadence poll loop publishing `TelemetryEvent`s

#![deny(static_mut_refs)]

pub mod catalog;
pub mod control;
pub mod discovery;
pub mod error;
pub mod reader;
pub mod source;
pub mod staleness;

pub mod prelude;

pub use catalog::{CatalogEntry, CatalogSnapshot, ControlCatalog, RefreshOutcome, ValueChange};
pub use control::{
    ControlDescriptor, SessionIdentity, SessionState, TelemetrySnapshot, ValueKind, sanitize_name,
};
pub use discovery::{ControlDiscovery, DEFAULT_CONTROL_PREFIX, RawFrame, RawVariable};
pub use error::{
    DescriptorError, ErrorCategory, StalenessConfigError, TelemetryError, TelemetryResult,
};
pub use reader::{
    BeatFn, DEFAULT_POLL_HZ, ReaderConfig, TelemetryEvent, TelemetryEventReceiver,
    TelemetryEventSender, TelemetryReader,
};
pub use source::{SnapshotFileSource, TelemetrySource};
pub use staleness::{LinkState, LinkTransition, StalenessConfig, StalenessTracker};
