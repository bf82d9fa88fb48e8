//! Which HID devices may drive the engine.
//!
//! Keyboards and voice are always accepted. HID buttons are accepted only
//! from listed devices once the list is non-empty. The list is shared by
//! every sender of a hub and can be replaced while they run.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::id::{InputId, InputSource};

/// Shared set of accepted HID device names.
#[derive(Debug, Clone, Default)]
pub struct DeviceAllowlist {
    devices: Arc<RwLock<BTreeSet<String>>>,
}

impl DeviceAllowlist {
    /// An empty list accepts every device.
    pub fn new<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list = Self::default();
        list.replace(devices);
        list
    }

    /// Swap in a new set of device names. Names are trimmed and compared
    /// case-insensitively.
    pub fn replace<I, S>(&self, devices: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let devices = devices
            .into_iter()
            .map(|d| d.as_ref().trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();
        *self.devices.write() = devices;
    }

    pub fn devices(&self) -> Vec<String> {
        self.devices.read().iter().cloned().collect()
    }

    pub fn is_restricted(&self) -> bool {
        !self.devices.read().is_empty()
    }

    /// Whether events from `id` may reach the engine.
    pub fn allows(&self, id: &InputId) -> bool {
        if id.source() != InputSource::Hid {
            return true;
        }
        let devices = self.devices.read();
        if devices.is_empty() {
            return true;
        }
        id.device()
            .is_some_and(|device| devices.contains(&device.to_ascii_lowercase()))
    }
}
