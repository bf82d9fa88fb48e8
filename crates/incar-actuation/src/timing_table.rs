//! Per-control timing resolved from a profile.

use incar_profile_repository::Profile;
use incar_timing::{TimingProfile, TimingResult};
use std::collections::HashMap;

/// Profile-wide timing plus per-control rate overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingTable {
    default: TimingProfile,
    overrides: HashMap<String, TimingProfile>,
}

impl TimingTable {
    pub fn new(default: TimingProfile) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Resolve the profile's timing selection and every binding override.
    pub fn from_profile(profile: &Profile) -> TimingResult<Self> {
        let mut table = Self::new(profile.timing.resolve()?);
        for binding in profile.bindings.values() {
            if let Some(rate) = &binding.rate_override {
                table
                    .overrides
                    .insert(binding.control_id.clone(), rate.resolve()?);
            }
        }
        Ok(table)
    }

    pub fn set_override(&mut self, control_id: impl Into<String>, timing: TimingProfile) {
        self.overrides.insert(control_id.into(), timing);
    }

    pub fn default_timing(&self) -> TimingProfile {
        self.default
    }

    /// Timing for one control: its override, else the profile timing.
    pub fn for_control(&self, control_id: &str) -> TimingProfile {
        self.overrides
            .get(control_id)
            .copied()
            .unwrap_or(self.default)
    }
}
