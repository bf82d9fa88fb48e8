//! Control descriptors, session identity, and the raw poll snapshot.

use crate::error::DescriptorError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric granularity the simulator reports for a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Whole-number steps (TC level, ABS map, ARB blade).
    #[default]
    Integer,
    /// Fractional steps (brake bias).
    Float,
}

/// One adjustable in-car control as reported by the latest scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDescriptor {
    /// Stable telemetry variable name, e.g. `dcBrakeBias`.
    pub id: String,
    /// Human readable name.
    #[serde(default)]
    pub display_name: String,
    /// Integer or float granularity.
    #[serde(default)]
    pub value_kind: ValueKind,
    /// Lowest legal value.
    pub min_value: f64,
    /// Highest legal value.
    pub max_value: f64,
    /// Value change produced by one pulse.
    pub step_size: f64,
    /// Last value read from telemetry.
    pub current_value: f64,
}

impl ControlDescriptor {
    /// Build a descriptor, deriving the display name from the id.
    pub fn new(
        id: impl Into<String>,
        value_kind: ValueKind,
        min_value: f64,
        max_value: f64,
        step_size: f64,
        current_value: f64,
    ) -> Self {
        let id = id.into();
        let display_name = display_name_for(&id);
        Self {
            id,
            display_name,
            value_kind,
            min_value,
            max_value,
            step_size,
            current_value,
        }
    }

    /// Comparison tolerance for this control's values.
    ///
    /// Telemetry floats are not exact multiples of the step, so equality is
    /// always judged within a thousandth of a step.
    pub fn tolerance(&self) -> f64 {
        (self.step_size.abs() * 1e-3).max(1e-9)
    }

    /// Whether `value` lies within `[min_value, max_value]`.
    pub fn contains(&self, value: f64) -> bool {
        let tol = self.tolerance();
        value >= self.min_value - tol && value <= self.max_value + tol
    }

    /// Whether two values are the same for this control.
    pub fn same_value(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.tolerance()
    }

    /// Reject descriptors that cannot be actuated safely.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.id.trim().is_empty() {
            return Err(DescriptorError::EmptyId);
        }
        if !self.min_value.is_finite() || !self.max_value.is_finite() {
            return Err(DescriptorError::NonFiniteBounds {
                control_id: self.id.clone(),
            });
        }
        if self.min_value > self.max_value {
            return Err(DescriptorError::InvertedBounds {
                control_id: self.id.clone(),
                min: self.min_value,
                max: self.max_value,
            });
        }
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(DescriptorError::NonPositiveStep {
                control_id: self.id.clone(),
                step: self.step_size,
            });
        }
        if !self.current_value.is_finite() {
            return Err(DescriptorError::NonFiniteValue {
                control_id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// An integer control reporting a fractional value.
    ///
    /// Some simulators report integer controls through float channels. The
    /// reported kind stays authoritative; callers only flag the mismatch.
    pub fn has_precision_mismatch(&self) -> bool {
        self.value_kind == ValueKind::Integer && self.current_value.fract().abs() > 1e-6
    }
}

fn display_name_for(id: &str) -> String {
    let base = id.strip_prefix("dc").unwrap_or(id);
    let mut out = String::with_capacity(base.len() + 4);
    let mut prev_lower = false;
    for ch in base.chars() {
        if ch.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        out.push(ch);
    }
    out
}

/// Coarse session phase reported by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Practice or test session.
    Practice,
    /// Qualifying.
    Qualify,
    /// Race.
    Race,
    /// Anything else, or not reported.
    #[default]
    Other,
}

impl SessionState {
    /// Map a simulator session-type string onto a state.
    pub fn from_session_type(value: &str) -> Self {
        let lower = value.trim().to_ascii_lowercase();
        if lower.contains("race") {
            Self::Race
        } else if lower.contains("qual") {
            Self::Qualify
        } else if lower.contains("practice") || lower.contains("test") || lower.contains("warmup")
        {
            Self::Practice
        } else {
            Self::Other
        }
    }
}

/// Which car on which track the driver is currently in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionIdentity {
    /// Sanitized car name.
    pub car_name: String,
    /// Sanitized track name.
    pub track_name: String,
    /// Session phase.
    #[serde(default)]
    pub session_state: SessionState,
}

impl SessionIdentity {
    /// Create a session identity, sanitizing the car and track names.
    pub fn new(
        car_name: impl AsRef<str>,
        track_name: impl AsRef<str>,
        session_state: SessionState,
    ) -> Self {
        Self {
            car_name: sanitize_name(car_name.as_ref()),
            track_name: sanitize_name(track_name.as_ref()),
            session_state,
        }
    }

    /// Whether car and track match, ignoring session state.
    pub fn same_pairing(&self, other: &SessionIdentity) -> bool {
        self.car_name == other.car_name && self.track_name == other.track_name
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.car_name, self.track_name)
    }
}

/// Keep alphanumerics, spaces, dashes and underscores.
pub fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// One successful read of the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Current car/track/session.
    pub session: SessionIdentity,
    /// Adjustable controls exposed by the current car.
    #[serde(default)]
    pub controls: Vec<ControlDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn display_name_splits_camel_case() {
        let d = ControlDescriptor::new("dcBrakeBias", ValueKind::Float, 40.0, 60.0, 0.5, 50.0);
        assert_eq!(d.display_name, "Brake Bias");
        let d = ControlDescriptor::new("dcABS", ValueKind::Integer, 1.0, 12.0, 1.0, 4.0);
        assert_eq!(d.display_name, "ABS");
    }

    #[test]
    fn contains_uses_step_tolerance() {
        let d = ControlDescriptor::new("dcBrakeBias", ValueKind::Float, 40.0, 60.0, 0.5, 50.0);
        assert!(d.contains(60.0000001));
        assert!(!d.contains(60.5));
        assert!(d.contains(40.0));
        assert!(!d.contains(39.5));
    }

    #[test]
    fn validate_rejects_bad_bounds() {
        let d = ControlDescriptor::new("dcABS", ValueKind::Integer, 5.0, 1.0, 1.0, 3.0);
        assert!(matches!(d.validate(), Err(DescriptorError::InvertedBounds { .. })));
        let d = ControlDescriptor::new("dcABS", ValueKind::Integer, 1.0, 5.0, 0.0, 3.0);
        assert!(matches!(d.validate(), Err(DescriptorError::NonPositiveStep { .. })));
        let d = ControlDescriptor::new(" ", ValueKind::Integer, 1.0, 5.0, 1.0, 3.0);
        assert_eq!(d.validate(), Err(DescriptorError::EmptyId));
        let d = ControlDescriptor::new("dcABS", ValueKind::Integer, 1.0, 5.0, 1.0, f64::NAN);
        assert!(matches!(d.validate(), Err(DescriptorError::NonFiniteValue { .. })));
        let d = ControlDescriptor::new("dcABS", ValueKind::Integer, 1.0, 5.0, 1.0, 3.0);
        assert_eq!(d.validate(), Ok(()));
    }

    #[test]
    fn precision_mismatch_is_flagged() {
        let d = ControlDescriptor::new("dcTractionControl", ValueKind::Integer, 1.0, 9.0, 1.0, 3.5);
        assert!(d.has_precision_mismatch());
        let d = ControlDescriptor::new("dcTractionControl", ValueKind::Integer, 1.0, 9.0, 1.0, 3.0);
        assert!(!d.has_precision_mismatch());
    }

    #[test]
    fn session_names_are_sanitized() {
        let s = SessionIdentity::new("Porsche 911 GT3 R (992)", "Spa: GP", SessionState::Race);
        assert_eq!(s.car_name, "Porsche 911 GT3 R 992");
        assert_eq!(s.track_name, "Spa GP");
    }

    #[test]
    fn session_state_parses_simulator_strings() {
        assert_eq!(SessionState::from_session_type("Race"), SessionState::Race);
        assert_eq!(SessionState::from_session_type("Lone Qualify"), SessionState::Qualify);
        assert_eq!(SessionState::from_session_type("Offline Testing"), SessionState::Practice);
        assert_eq!(SessionState::from_session_type(""), SessionState::Other);
    }

    #[test]
    fn snapshot_round_trips_through_json() -> TestResult {
        let snapshot = TelemetrySnapshot {
            session: SessionIdentity::new("Car", "Track", SessionState::Practice),
            controls: vec![ControlDescriptor::new(
                "dcABS",
                ValueKind::Integer,
                1.0,
                12.0,
                1.0,
                4.0,
            )],
        };
        let json = serde_json::to_string(&snapshot)?;
        let back: TelemetrySnapshot = serde_json::from_str(&json)?;
        assert_eq!(back, snapshot);
        Ok(())
    }
}
