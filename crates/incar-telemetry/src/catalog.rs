//! The live set of adjustable controls for the current car.
//!
//! Consumers never observe a half-applied refresh: every refresh builds a
//! complete [`CatalogSnapshot`] and swaps it in under a short write lock.
//! Readers clone the `Arc` and work against that snapshot for as long as
//! they need, which is how a combo resolves all of its steps against one
//! consistent view.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::control::{ControlDescriptor, SessionIdentity, TelemetrySnapshot};
use crate::error::{TelemetryError, TelemetryResult};
use crate::staleness::LinkState;

/// A catalog slot: the descriptor plus whether the latest scan reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Last known descriptor.
    pub descriptor: ControlDescriptor,
    /// `false` when the control was seen earlier for this car but is missing
    /// from the latest scan.
    pub available: bool,
}

/// Immutable, committed view of the catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    generation: u64,
    session: Option<SessionIdentity>,
    entries: BTreeMap<String, CatalogEntry>,
}

impl CatalogSnapshot {
    /// Monotonic refresh counter; `0` means never refreshed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Session the snapshot was taken in.
    pub fn session(&self) -> Option<&SessionIdentity> {
        self.session.as_ref()
    }

    /// Look up an available control.
    ///
    /// # Errors
    ///
    /// `UnknownControl` when the id is absent or was not in the latest scan.
    pub fn lookup(&self, control_id: &str) -> TelemetryResult<&ControlDescriptor> {
        match self.entries.get(control_id) {
            Some(entry) if entry.available => Ok(&entry.descriptor),
            _ => Err(TelemetryError::unknown_control(control_id)),
        }
    }

    /// Raw slot access, including unavailable controls.
    pub fn entry(&self, control_id: &str) -> Option<&CatalogEntry> {
        self.entries.get(control_id)
    }

    /// All slots in id order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// Available controls in id order.
    pub fn available(&self) -> impl Iterator<Item = &ControlDescriptor> {
        self.entries
            .values()
            .filter(|e| e.available)
            .map(|e| &e.descriptor)
    }

    /// Number of available controls.
    pub fn available_count(&self) -> usize {
        self.entries.values().filter(|e| e.available).count()
    }
}

/// A control whose value moved between two refreshes.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    /// Control id.
    pub control_id: String,
    /// Value in the previous snapshot.
    pub previous: f64,
    /// Value in the new snapshot.
    pub current: f64,
}

/// What a refresh changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshOutcome {
    /// Generation of the committed snapshot.
    pub generation: u64,
    /// Car differs from the previous snapshot; stale entries were dropped.
    pub car_changed: bool,
    /// Value changes on controls present in both snapshots.
    pub value_changes: Vec<ValueChange>,
    /// Controls that became available.
    pub appeared: Vec<String>,
    /// Controls that stopped being reported.
    pub vanished: Vec<String>,
}

/// Shared, single-writer catalog of the current car's controls.
#[derive(Debug)]
pub struct ControlCatalog {
    current: RwLock<Arc<CatalogSnapshot>>,
    link: AtomicU8,
}

impl Default for ControlCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlCatalog {
    /// An empty catalog in the `Disconnected` link state.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(CatalogSnapshot::default())),
            link: AtomicU8::new(LinkState::Disconnected as u8),
        }
    }

    /// The last committed snapshot.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Look up an available control in the last committed snapshot.
    ///
    /// # Errors
    ///
    /// `UnknownControl` when the control is not currently available. This is
    /// routine after a car change and may clear on the next scan.
    pub fn lookup(&self, control_id: &str) -> TelemetryResult<ControlDescriptor> {
        self.snapshot().lookup(control_id).cloned()
    }

    /// Current value of a control, if available.
    pub fn current_value(&self, control_id: &str) -> Option<f64> {
        self.snapshot()
            .lookup(control_id)
            .ok()
            .map(|d| d.current_value)
    }

    /// Replace the catalog with the controls from `poll`.
    ///
    /// Controls seen earlier for the same car but absent from this scan are
    /// kept with `available = false`. A car change discards them.
    pub fn refresh(&self, poll: &TelemetrySnapshot) -> RefreshOutcome {
        let mut guard = self.current.write();
        let previous = Arc::clone(&guard);

        let car_changed = previous
            .session
            .as_ref()
            .is_some_and(|s| s.car_name != poll.session.car_name);

        let mut entries: BTreeMap<String, CatalogEntry> = BTreeMap::new();
        let mut outcome = RefreshOutcome {
            generation: previous.generation.saturating_add(1),
            car_changed,
            ..RefreshOutcome::default()
        };

        for descriptor in &poll.controls {
            match previous.entries.get(&descriptor.id) {
                Some(old) if !car_changed => {
                    if !old.available {
                        outcome.appeared.push(descriptor.id.clone());
                    }
                    if !descriptor.same_value(old.descriptor.current_value, descriptor.current_value)
                    {
                        outcome.value_changes.push(ValueChange {
                            control_id: descriptor.id.clone(),
                            previous: old.descriptor.current_value,
                            current: descriptor.current_value,
                        });
                    }
                }
                _ => outcome.appeared.push(descriptor.id.clone()),
            }
            entries.insert(
                descriptor.id.clone(),
                CatalogEntry {
                    descriptor: descriptor.clone(),
                    available: true,
                },
            );
        }

        if !car_changed {
            for (id, old) in &previous.entries {
                if entries.contains_key(id) {
                    continue;
                }
                if old.available {
                    outcome.vanished.push(id.clone());
                }
                entries.insert(
                    id.clone(),
                    CatalogEntry {
                        descriptor: old.descriptor.clone(),
                        available: false,
                    },
                );
            }
        } else {
            outcome
                .vanished
                .extend(previous.entries.values().filter(|e| e.available).map(|e| e.descriptor.id.clone()));
        }

        *guard = Arc::new(CatalogSnapshot {
            generation: outcome.generation,
            session: Some(poll.session.clone()),
            entries,
        });
        outcome
    }

    /// Current link state.
    pub fn link_state(&self) -> LinkState {
        LinkState::from_u8(self.link.load(Ordering::Acquire))
    }

    /// Publish a new link state, returning the previous one.
    pub fn set_link_state(&self, state: LinkState) -> LinkState {
        LinkState::from_u8(self.link.swap(state as u8, Ordering::AcqRel))
    }
}
