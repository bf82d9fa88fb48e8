//! Binding profiles for incar
//!
//! One profile per exact (car, track) pair holds the control bindings,
//! combo definitions, timing selection and HUD layout.
//!
//! # Architecture
//!
//! - [`model`]: Profile, bindings, presets, combos, HUD layout
//! - [`validation`]: Bounds, preset count, timing and input-conflict checks
//! - [`storage`]: File-based storage operations with atomic writes
//! - [`repository`]: The `BindingStore` with per-key locking and caching
//! - [`error`]: Error types for store operations
//!
//! # Error Recovery
//!
//! - Records are written atomically (write to temp, then rename)
//! - A corrupt record yields `ProfileCorrupt`; the file is copied aside and
//!   callers continue with defaults
//! - Invalid profiles are rejected before anything is written
//!
//! # Example
//!
//! ```ignore
//! use incar_profile_repository::prelude::*;
//!
//! # async fn example(session: &SessionIdentity, catalog: &CatalogSnapshot) -> anyhow::Result<()> {
//! let store = BindingStore::new(ProfileRepositoryConfig::new("profiles")).await?;
//! let profile = store.match_session(session).await?.unwrap_or_else(|| {
//!     Profile::new(&ProfileKey::from(session))
//! });
//! store.save(&profile, session, catalog).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod error;
#[expect(missing_docs, reason = "plain data records documented at the type level")]
pub mod model;
pub mod prelude;
pub mod repository;
pub mod storage;
pub mod validation;

pub use error::{ProfileStoreError, ProfileStoreResult, ValidationError};
pub use model::{
    Binding, BoundAction, ComboDefinition, ComboStep, HudLayout, MAX_PRESETS, Preset, Profile,
    ProfileKey,
};
pub use repository::{
    BindingStore, ProfileRecord, ProfileRepositoryConfig, SCHEMA_VERSION, SaveOutcome,
    StoredProfile,
};
pub use storage::FileStorage;
pub use validation::{ValidationReport, routing_table, validate_profile};
