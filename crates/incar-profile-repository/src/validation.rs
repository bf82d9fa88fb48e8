//! Profile validation logic
//!
//! Everything here runs before a profile reaches disk. Values are checked
//! against the bounds reported by the live catalog; controls the catalog
//! has never seen cannot be checked and are listed in the report instead.

use incar_input::{BindingMap, InputError};
use incar_telemetry::CatalogSnapshot;
use tracing::warn;

use crate::error::ValidationError;
use crate::model::{BoundAction, MAX_PRESETS, Profile};

/// Non-fatal findings from a successful validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Controls referenced by the profile but absent from the catalog
    pub unchecked_controls: Vec<String>,
}

/// Validate a profile against the current catalog.
///
/// # Errors
///
/// The first violation found. Out-of-range values are rejected rather than
/// clamped.
pub fn validate_profile(
    profile: &Profile,
    catalog: &CatalogSnapshot,
) -> Result<ValidationReport, ValidationError> {
    if profile.key().is_empty() {
        return Err(ValidationError::MissingIdentity);
    }

    let mut report = ValidationReport::default();

    profile
        .timing
        .validate()
        .map_err(|source| ValidationError::InvalidTiming {
            context: "profile timing".to_string(),
            source,
        })?;

    for (key, binding) in &profile.bindings {
        if *key != binding.control_id {
            return Err(ValidationError::KeyMismatch {
                key: key.clone(),
                control_id: binding.control_id.clone(),
            });
        }
        if binding.presets.len() > MAX_PRESETS {
            return Err(ValidationError::TooManyPresets {
                control_id: binding.control_id.clone(),
                count: binding.presets.len(),
                max: MAX_PRESETS,
            });
        }
        if let Some(rate) = &binding.rate_override {
            rate.validate()
                .map_err(|source| ValidationError::InvalidTiming {
                    context: format!("rate override for '{}'", binding.control_id),
                    source,
                })?;
        }
        for (index, preset) in binding.presets.iter().enumerate() {
            let context = format!("preset {}", index.saturating_add(1));
            if preset
                .voice_phrase
                .as_deref()
                .is_some_and(|p| p.trim().is_empty())
            {
                return Err(ValidationError::EmptyVoicePhrase(context));
            }
            check_value(&context, &binding.control_id, preset.value, catalog, &mut report)?;
        }
    }

    let mut names: Vec<&str> = Vec::with_capacity(profile.combos.len());
    for combo in &profile.combos {
        let name = combo.name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyComboName);
        }
        if names.contains(&name) {
            return Err(ValidationError::DuplicateCombo(name.to_string()));
        }
        names.push(name);
        if combo.steps.is_empty() {
            return Err(ValidationError::EmptyCombo(name.to_string()));
        }
        if combo
            .voice_phrase
            .as_deref()
            .is_some_and(|p| p.trim().is_empty())
        {
            return Err(ValidationError::EmptyVoicePhrase(format!("combo '{name}'")));
        }
        for step in &combo.steps {
            check_value(
                &format!("combo '{name}'"),
                &step.control_id,
                step.target_value,
                catalog,
                &mut report,
            )?;
        }
    }

    check_conflicts(profile)?;

    report.unchecked_controls.sort();
    report.unchecked_controls.dedup();
    if !report.unchecked_controls.is_empty() {
        warn!(
            profile = %profile.key(),
            controls = ?report.unchecked_controls,
            "controls not in catalog; values saved unchecked"
        );
    }
    Ok(report)
}

fn check_value(
    context: &str,
    control_id: &str,
    value: f64,
    catalog: &CatalogSnapshot,
    report: &mut ValidationReport,
) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue {
            context: context.to_string(),
            control_id: control_id.to_string(),
        });
    }
    match catalog.entry(control_id) {
        Some(entry) => {
            let descriptor = &entry.descriptor;
            if !descriptor.contains(value) {
                return Err(ValidationError::out_of_range(
                    context,
                    control_id,
                    value,
                    descriptor.min_value,
                    descriptor.max_value,
                ));
            }
        }
        None => report.unchecked_controls.push(control_id.to_string()),
    }
    Ok(())
}

/// Build the routing table once to prove every input maps to one action.
fn check_conflicts(profile: &Profile) -> Result<BindingMap<BoundAction>, ValidationError> {
    let mut map = BindingMap::new();
    for (input, action) in profile.input_actions() {
        if let Err(err) = map.bind(input.clone(), action.clone()) {
            return Err(match err {
                InputError::Conflict { .. } => ValidationError::InputConflict {
                    input: input.to_string(),
                    first: map
                        .route(&input)
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                    second: action.to_string(),
                },
                other => ValidationError::InputConflict {
                    input: input.to_string(),
                    first: other.to_string(),
                    second: action.to_string(),
                },
            });
        }
    }
    Ok(map)
}

/// Routing table for a profile that already passed validation.
///
/// Conflicting entries, which can only come from hand-edited files, keep the
/// first binding.
pub fn routing_table(profile: &Profile) -> BindingMap<BoundAction> {
    match check_conflicts(profile) {
        Ok(map) => map,
        Err(err) => {
            warn!(profile = %profile.key(), error = %err, "conflicting inputs; keeping first binding");
            let mut map = BindingMap::new();
            for (input, action) in profile.input_actions() {
                if map.route(&input).is_none()
                    && let Err(e) = map.bind(input, action)
                {
                    warn!(error = %e, "binding skipped");
                }
            }
            map
        }
    }
}
