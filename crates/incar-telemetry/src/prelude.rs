//! Commonly used telemetry types.

pub use crate::catalog::{CatalogSnapshot, ControlCatalog};
pub use crate::control::{ControlDescriptor, SessionIdentity, SessionState, TelemetrySnapshot, ValueKind};
pub use crate::error::{ErrorCategory, TelemetryError, TelemetryResult};
pub use crate::reader::{ReaderConfig, TelemetryEvent, TelemetryReader};
pub use crate::source::TelemetrySource;
pub use crate::staleness::LinkState;
