//! Turns raw telemetry variables into control descriptors.
//!
//! Only variables carrying the driver-control prefix with a numeric,
//! non-boolean value become controls. Output is sorted by id and free of
//! duplicates; a repeated id keeps its first occurrence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::control::{ControlDescriptor, SessionIdentity, SessionState, TelemetrySnapshot, ValueKind};
use crate::error::{TelemetryError, TelemetryResult};

/// Default prefix of driver-adjustable telemetry variables.
pub const DEFAULT_CONTROL_PREFIX: &str = "dc";

/// One telemetry variable as exposed by a bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawVariable {
    /// Variable name.
    pub name: String,
    /// Current value; may be any JSON value.
    pub value: serde_json::Value,
    /// Lowest legal value.
    #[serde(default)]
    pub min: Option<f64>,
    /// Highest legal value.
    #[serde(default)]
    pub max: Option<f64>,
    /// Change per pulse.
    #[serde(default)]
    pub step: Option<f64>,
    /// Reported granularity. Derived from the value when absent.
    #[serde(default)]
    pub kind: Option<ValueKind>,
}

/// A full raw read: session header plus variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    /// `false` when the driver is not in a car.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Unsanitized car name.
    #[serde(default)]
    pub car: String,
    /// Unsanitized track name.
    #[serde(default)]
    pub track: String,
    /// Simulator session type string.
    #[serde(default)]
    pub session_type: String,
    /// Variables in source order.
    #[serde(default)]
    pub variables: Vec<RawVariable>,
}

fn default_active() -> bool {
    true
}

/// Discovery parameters.
#[derive(Debug, Clone)]
pub struct ControlDiscovery {
    prefix: String,
}

impl Default for ControlDiscovery {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROL_PREFIX)
    }
}

impl ControlDiscovery {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Convert a raw frame into a snapshot.
    ///
    /// # Errors
    ///
    /// `TelemetryUnavailable` for inactive frames or frames without a car.
    pub fn snapshot(&self, frame: &RawFrame) -> TelemetryResult<TelemetrySnapshot> {
        if !frame.active {
            return Err(TelemetryError::unavailable("driver is not in an active car"));
        }
        let session = SessionIdentity::new(
            &frame.car,
            &frame.track,
            SessionState::from_session_type(&frame.session_type),
        );
        if session.car_name.is_empty() {
            return Err(TelemetryError::unavailable("no car reported"));
        }
        Ok(TelemetrySnapshot {
            session,
            controls: self.discover(&frame.variables),
        })
    }

    /// Filter, convert, sort and de-duplicate variables.
    pub fn discover(&self, variables: &[RawVariable]) -> Vec<ControlDescriptor> {
        let mut found: BTreeMap<&str, ControlDescriptor> = BTreeMap::new();
        for var in variables {
            if !var.name.starts_with(&self.prefix) || found.contains_key(var.name.as_str()) {
                continue;
            }
            let Some(descriptor) = descriptor_from(var) else {
                continue;
            };
            if let Err(reason) = descriptor.validate() {
                warn!(control_id = %var.name, %reason, "discarding invalid control");
                continue;
            }
            if descriptor.has_precision_mismatch() {
                warn!(
                    control_id = %descriptor.id,
                    value = descriptor.current_value,
                    "integer control reported a fractional value"
                );
            }
            found.insert(var.name.as_str(), descriptor);
        }
        debug!(count = found.len(), "discovered controls");
        found.into_values().collect()
    }
}

fn descriptor_from(var: &RawVariable) -> Option<ControlDescriptor> {
    let number = match &var.value {
        serde_json::Value::Number(n) => n,
        _ => return None,
    };
    let value = number.as_f64()?;
    let kind = var.kind.unwrap_or(if number.is_f64() {
        ValueKind::Float
    } else {
        ValueKind::Integer
    });
    let step = var.step.unwrap_or(match kind {
        ValueKind::Integer => 1.0,
        ValueKind::Float => 0.1,
    });
    Some(ControlDescriptor::new(
        var.name.clone(),
        kind,
        var.min.unwrap_or(value),
        var.max.unwrap_or(value),
        step,
        value,
    ))
}
