//! Prelude module for convenient imports

pub use crate::error::{ProfileStoreError, ProfileStoreResult, ValidationError};
pub use crate::model::{Binding, BoundAction, ComboDefinition, HudLayout, Preset, Profile, ProfileKey};
pub use crate::repository::{BindingStore, ProfileRepositoryConfig};
pub use crate::validation::{ValidationReport, routing_table, validate_profile};

pub use incar_telemetry::{CatalogSnapshot, SessionIdentity};
