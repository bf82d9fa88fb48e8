//! Profile data model: bindings, presets, combos, HUD layout.

use incar_input::InputId;
use incar_telemetry::{SessionIdentity, sanitize_name};
use incar_timing::TimingSelection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum presets per binding.
pub const MAX_PRESETS: usize = 4;

/// Identity a profile is stored under: exact (car, track).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileKey {
    pub car_name: String,
    pub track_name: String,
}

impl ProfileKey {
    /// Build a key, sanitizing both names.
    pub fn new(car_name: &str, track_name: &str) -> Self {
        Self {
            car_name: sanitize_name(car_name),
            track_name: sanitize_name(track_name),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.car_name.is_empty() || self.track_name.is_empty()
    }

    /// File stem: readable names plus a hash prefix that keeps keys distinct
    /// on case-insensitive file systems.
    pub fn file_stem(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.car_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.track_name.as_bytes());
        let digest = hasher.finalize();
        let short: String = digest
            .iter()
            .take(4)
            .map(|b| format!("{b:02x}"))
            .collect();
        format!("{}@{}-{}", self.car_name, self.track_name, short)
    }
}

impl From<&SessionIdentity> for ProfileKey {
    fn from(session: &SessionIdentity) -> Self {
        Self::new(&session.car_name, &session.track_name)
    }
}

impl fmt::Display for ProfileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.car_name, self.track_name)
    }
}

/// A jump-to value for one control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub value: f64,
    #[serde(default)]
    pub input: Option<InputId>,
    #[serde(default)]
    pub voice_phrase: Option<String>,
}

impl Preset {
    pub fn new(value: f64, input: Option<InputId>) -> Self {
        Self {
            value,
            input,
            voice_phrase: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// How one control is driven from inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub control_id: String,
    #[serde(default)]
    pub increase_input: Option<InputId>,
    #[serde(default)]
    pub decrease_input: Option<InputId>,
    /// Ordered, at most [`MAX_PRESETS`].
    #[serde(default)]
    pub presets: Vec<Preset>,
    #[serde(default = "default_true")]
    pub hud_visible: bool,
    /// Replaces the profile timing for this control only.
    #[serde(default)]
    pub rate_override: Option<TimingSelection>,
}

impl Binding {
    pub fn new(control_id: impl Into<String>) -> Self {
        Self {
            control_id: control_id.into(),
            increase_input: None,
            decrease_input: None,
            presets: Vec::new(),
            hud_visible: true,
            rate_override: None,
        }
    }

    pub fn with_increase(mut self, input: InputId) -> Self {
        self.increase_input = Some(input);
        self
    }

    pub fn with_decrease(mut self, input: InputId) -> Self {
        self.decrease_input = Some(input);
        self
    }

    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.presets.push(preset);
        self
    }

    pub fn with_rate_override(mut self, timing: TimingSelection) -> Self {
        self.rate_override = Some(timing);
        self
    }
}

/// One step of a combo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboStep {
    pub control_id: String,
    pub target_value: f64,
}

/// A named macro applying several preset values from one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboDefinition {
    pub name: String,
    #[serde(default)]
    pub bound_input: Option<InputId>,
    #[serde(default)]
    pub voice_phrase: Option<String>,
    pub steps: Vec<ComboStep>,
}

impl ComboDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bound_input: None,
            voice_phrase: None,
            steps: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: InputId) -> Self {
        self.bound_input = Some(input);
        self
    }

    pub fn with_step(mut self, control_id: impl Into<String>, target_value: f64) -> Self {
        self.steps.push(ComboStep {
            control_id: control_id.into(),
            target_value,
        });
        self
    }
}

/// Where the HUD overlay sits and how it looks. Rendering is external.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HudLayout {
    pub x: i32,
    pub y: i32,
    pub scale: f64,
    pub opacity: f64,
    #[serde(default)]
    pub locked: bool,
    /// Display order of controls; unlisted controls follow in id order.
    #[serde(default)]
    pub control_order: Vec<String>,
}

impl Default for HudLayout {
    fn default() -> Self {
        Self {
            x: 40,
            y: 40,
            scale: 1.0,
            opacity: 0.85,
            locked: false,
            control_order: Vec::new(),
        }
    }
}

/// What an input triggers within a profile.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundAction {
    Increase { control_id: String },
    Decrease { control_id: String },
    Preset { control_id: String, value: f64 },
    Combo { name: String },
}

impl fmt::Display for BoundAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increase { control_id } => write!(f, "{control_id} +"),
            Self::Decrease { control_id } => write!(f, "{control_id} -"),
            Self::Preset { control_id, value } => write!(f, "{control_id} = {value}"),
            Self::Combo { name } => write!(f, "combo '{name}'"),
        }
    }
}

/// The persisted bindings, combos, timing and HUD layout for one (car, track).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub car_name: String,
    pub track_name: String,
    #[serde(default)]
    pub bindings: BTreeMap<String, Binding>,
    #[serde(default)]
    pub combos: Vec<ComboDefinition>,
    #[serde(default)]
    pub timing: TimingSelection,
    #[serde(default)]
    pub hud_layout: HudLayout,
}

impl Profile {
    /// Empty profile for a key.
    pub fn new(key: &ProfileKey) -> Self {
        Self {
            car_name: key.car_name.clone(),
            track_name: key.track_name.clone(),
            bindings: BTreeMap::new(),
            combos: Vec::new(),
            timing: TimingSelection::default(),
            hud_layout: HudLayout::default(),
        }
    }

    pub fn key(&self) -> ProfileKey {
        ProfileKey::new(&self.car_name, &self.track_name)
    }

    /// Re-key the profile to `key`, as when saving under the current session.
    pub fn rekey(&mut self, key: &ProfileKey) {
        self.car_name = key.car_name.clone();
        self.track_name = key.track_name.clone();
    }

    /// Insert or replace the binding for its control.
    pub fn set_binding(&mut self, binding: Binding) -> Option<Binding> {
        self.bindings.insert(binding.control_id.clone(), binding)
    }

    pub fn remove_binding(&mut self, control_id: &str) -> Option<Binding> {
        self.bindings.remove(control_id)
    }

    pub fn binding(&self, control_id: &str) -> Option<&Binding> {
        self.bindings.get(control_id)
    }

    /// Insert or replace a combo by name.
    pub fn set_combo(&mut self, combo: ComboDefinition) -> Option<ComboDefinition> {
        match self.combos.iter_mut().find(|c| c.name == combo.name) {
            Some(existing) => Some(std::mem::replace(existing, combo)),
            None => {
                self.combos.push(combo);
                None
            }
        }
    }

    pub fn remove_combo(&mut self, name: &str) -> Option<ComboDefinition> {
        let index = self.combos.iter().position(|c| c.name == name)?;
        Some(self.combos.remove(index))
    }

    pub fn combo(&self, name: &str) -> Option<&ComboDefinition> {
        self.combos.iter().find(|c| c.name == name)
    }

    /// Every (input, action) pair the profile defines, in a stable order.
    ///
    /// Voice phrases on presets and combos appear as `VOICE:` inputs. Blank
    /// phrases are skipped.
    pub fn input_actions(&self) -> Vec<(InputId, BoundAction)> {
        let mut out = Vec::new();
        for binding in self.bindings.values() {
            let control_id = &binding.control_id;
            if let Some(input) = &binding.increase_input {
                out.push((
                    input.clone(),
                    BoundAction::Increase {
                        control_id: control_id.clone(),
                    },
                ));
            }
            if let Some(input) = &binding.decrease_input {
                out.push((
                    input.clone(),
                    BoundAction::Decrease {
                        control_id: control_id.clone(),
                    },
                ));
            }
            for preset in &binding.presets {
                let action = BoundAction::Preset {
                    control_id: control_id.clone(),
                    value: preset.value,
                };
                if let Some(input) = &preset.input {
                    out.push((input.clone(), action.clone()));
                }
                if let Some(voice) = preset.voice_phrase.as_deref().and_then(|p| InputId::voice(p).ok()) {
                    out.push((voice, action));
                }
            }
        }
        for combo in &self.combos {
            let action = BoundAction::Combo {
                name: combo.name.clone(),
            };
            if let Some(input) = &combo.bound_input {
                out.push((input.clone(), action.clone()));
            }
            if let Some(voice) = combo.voice_phrase.as_deref().and_then(|p| InputId::voice(p).ok()) {
                out.push((voice, action));
            }
        }
        out
    }
}
