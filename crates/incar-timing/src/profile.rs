//! Timing presets, custom timing, and the resolved [`TimingProfile`].

use incar_telemetry::ValueKind;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{TimingError, TimingResult};

/// Smallest press or interval a custom profile may request.
pub const MIN_CUSTOM_MS: u64 = 10;

/// Longest key press a custom profile may request, jitter included. The
/// dispatcher thread is busy for the whole press, so this also bounds how
/// long it can go without a heartbeat.
pub const MAX_PRESS_MS: u64 = 500;

/// Longest gap between pulses a custom profile may request.
pub const MAX_INTERVAL_MS: u64 = 2_000;

/// Extra press time given to float-valued controls.
pub const DEFAULT_FLOAT_PRESS_EXTRA_MS: u64 = 30;

/// Inclusive millisecond range. A fixed value has `min == max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MsRange {
    pub min: u64,
    pub max: u64,
}

impl MsRange {
    pub const fn fixed(ms: u64) -> Self {
        Self { min: ms, max: ms }
    }

    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Midpoint, rounded down.
    pub fn midpoint(&self) -> u64 {
        self.min.saturating_add(self.max.saturating_sub(self.min) / 2)
    }

    fn validate(&self, field: &'static str, floor: u64) -> TimingResult<()> {
        if self.min > self.max {
            return Err(TimingError::InvalidRange {
                field,
                min: self.min,
                max: self.max,
            });
        }
        if self.min < floor {
            return Err(TimingError::BelowMinimum {
                field,
                value: self.min,
                floor,
            });
        }
        Ok(())
    }

    fn validate_ceiling(&self, field: &'static str, extra: u64, ceiling: u64) -> TimingResult<()> {
        let longest = self.max.saturating_add(extra);
        if longest > ceiling {
            return Err(TimingError::AboveMaximum {
                field,
                value: longest,
                ceiling,
            });
        }
        Ok(())
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        if self.min >= self.max {
            self.min
        } else {
            rng.random_range(self.min..=self.max)
        }
    }
}

/// Shortening of the repeat interval while an input stays held.
///
/// The n-th repeat waits `interval * factor^n`, never less than
/// `min_interval_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RepeatAcceleration {
    pub factor: f64,
    pub min_interval_ms: u64,
}

impl RepeatAcceleration {
    fn validate(&self) -> TimingResult<()> {
        if !(self.factor > 0.0 && self.factor <= 1.0) {
            return Err(TimingError::InvalidAcceleration(self.factor.to_string()));
        }
        if self.min_interval_ms < MIN_CUSTOM_MS {
            return Err(TimingError::BelowMinimum {
                field: "acceleration.min_interval_ms",
                value: self.min_interval_ms,
                floor: MIN_CUSTOM_MS,
            });
        }
        Ok(())
    }

    fn apply(&self, interval: Duration, repeat_index: u32) -> Duration {
        let exponent = i32::try_from(repeat_index).unwrap_or(i32::MAX);
        interval
            .mul_f64(self.factor.powi(exponent))
            .max(Duration::from_millis(self.min_interval_ms))
    }
}

/// Built-in, immutable timing presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimingPreset {
    /// 10 ms press, 10 ms gap.
    Aggressive,
    /// 80 ms press, 100 ms gap.
    #[default]
    Casual,
    /// 150 ms press, 200 ms gap.
    Relaxed,
}

impl TimingPreset {
    pub const ALL: [TimingPreset; 3] = [Self::Aggressive, Self::Casual, Self::Relaxed];

    pub fn profile(self) -> TimingProfile {
        let (press, interval, initial_delay_ms) = match self {
            Self::Aggressive => (10, 10, 250),
            Self::Casual => (80, 100, 400),
            Self::Relaxed => (150, 200, 500),
        };
        TimingProfile {
            press: MsRange::fixed(press),
            interval: MsRange::fixed(interval),
            initial_delay_ms,
            jitter_ms: 0,
            acceleration: None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Casual => "casual",
            Self::Relaxed => "relaxed",
        }
    }
}

impl fmt::Display for TimingPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimingPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aggressive" => Ok(Self::Aggressive),
            "casual" => Ok(Self::Casual),
            "relaxed" => Ok(Self::Relaxed),
            other => Err(format!("unknown timing preset: {other}")),
        }
    }
}

/// User-defined timing attached to a profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CustomTiming {
    /// Key press duration range.
    pub press_ms: MsRange,
    /// Gap between pulses.
    pub interval_ms: MsRange,
    /// Hold time before repeating starts.
    pub initial_delay_ms: u64,
    /// Random +/- offset applied to each press and gap.
    #[serde(default)]
    pub jitter_ms: u64,
    #[serde(default)]
    pub acceleration: Option<RepeatAcceleration>,
}

impl Default for CustomTiming {
    fn default() -> Self {
        Self {
            press_ms: MsRange::new(60, 80),
            interval_ms: MsRange::new(60, 90),
            initial_delay_ms: 400,
            jitter_ms: 0,
            acceleration: None,
        }
    }
}

impl CustomTiming {
    /// Reject ranges that are inverted, below [`MIN_CUSTOM_MS`], or that can
    /// exceed [`MAX_PRESS_MS`] / [`MAX_INTERVAL_MS`] once jitter is added.
    pub fn validate(&self) -> TimingResult<()> {
        self.press_ms.validate("press_ms", MIN_CUSTOM_MS)?;
        self.interval_ms.validate("interval_ms", MIN_CUSTOM_MS)?;
        self.press_ms
            .validate_ceiling("press_ms", self.jitter_ms, MAX_PRESS_MS)?;
        self.interval_ms
            .validate_ceiling("interval_ms", self.jitter_ms, MAX_INTERVAL_MS)?;
        if let Some(acceleration) = &self.acceleration {
            acceleration.validate()?;
        }
        Ok(())
    }
}

/// What a profile or binding selects: a preset or custom values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimingSelection {
    Named { preset: TimingPreset },
    Custom(CustomTiming),
}

impl Default for TimingSelection {
    fn default() -> Self {
        Self::Named {
            preset: TimingPreset::default(),
        }
    }
}

impl From<TimingPreset> for TimingSelection {
    fn from(preset: TimingPreset) -> Self {
        Self::Named { preset }
    }
}

impl TimingSelection {
    pub fn validate(&self) -> TimingResult<()> {
        match self {
            Self::Named { .. } => Ok(()),
            Self::Custom(custom) => custom.validate(),
        }
    }

    /// Resolve to concrete parameters.
    ///
    /// # Errors
    ///
    /// Returns the validation error of an invalid custom timing.
    pub fn resolve(&self) -> TimingResult<TimingProfile> {
        match self {
            Self::Named { preset } => Ok(preset.profile()),
            Self::Custom(custom) => {
                custom.validate()?;
                Ok(TimingProfile {
                    press: custom.press_ms,
                    interval: custom.interval_ms,
                    initial_delay_ms: custom.initial_delay_ms,
                    jitter_ms: custom.jitter_ms,
                    acceleration: custom.acceleration,
                })
            }
        }
    }
}

impl fmt::Display for TimingSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { preset } => write!(f, "{preset}"),
            Self::Custom(c) => write!(
                f,
                "custom press {}-{}ms gap {}-{}ms",
                c.press_ms.min, c.press_ms.max, c.interval_ms.min, c.interval_ms.max
            ),
        }
    }
}

/// Durations of one pulse: how long the key is held and the gap after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseTiming {
    pub press: Duration,
    pub gap: Duration,
}

impl PulseTiming {
    /// Time from the start of this pulse to the start of the next.
    pub fn period(&self) -> Duration {
        self.press.saturating_add(self.gap)
    }
}

/// Resolved actuation cadence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingProfile {
    press: MsRange,
    interval: MsRange,
    initial_delay_ms: u64,
    jitter_ms: u64,
    acceleration: Option<RepeatAcceleration>,
}

impl Default for TimingProfile {
    fn default() -> Self {
        TimingPreset::default().profile()
    }
}

impl TimingProfile {
    /// Lengthen the press for float controls, which the simulator registers
    /// less reliably with short presses.
    pub fn for_value_kind(mut self, kind: ValueKind, float_press_extra_ms: u64) -> Self {
        if kind == ValueKind::Float {
            self.press.min = self.press.min.saturating_add(float_press_extra_ms);
            self.press.max = self.press.max.saturating_add(float_press_extra_ms);
        }
        self
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn has_acceleration(&self) -> bool {
        self.acceleration.is_some()
    }

    /// Deterministic mid-range timing for the given repeat index.
    pub fn nominal(&self, repeat_index: u32) -> PulseTiming {
        let gap = Duration::from_millis(self.interval.midpoint());
        PulseTiming {
            press: Duration::from_millis(self.press.midpoint()),
            gap: self.accelerate(gap, repeat_index),
        }
    }

    /// A fixed press and gap with no repeat delay, jitter or acceleration.
    /// Used when measuring what the simulator accepts.
    pub fn fixed(press_ms: u64, interval_ms: u64) -> Self {
        Self {
            press: MsRange::fixed(press_ms),
            interval: MsRange::fixed(interval_ms),
            initial_delay_ms: 0,
            jitter_ms: 0,
            acceleration: None,
        }
    }

    /// Longest single key press, jitter included.
    pub fn max_press(&self) -> Duration {
        Duration::from_millis(self.press.max.saturating_add(self.jitter_ms))
    }

    /// Longest possible period, used to size timeouts and liveness budgets.
    pub fn max_period(&self) -> Duration {
        let jitter = self.jitter_ms.saturating_mul(2);
        Duration::from_millis(
            self.press
                .max
                .saturating_add(self.interval.max)
                .saturating_add(jitter),
        )
    }

    /// Draw a pulse timing, applying range sampling, acceleration and jitter.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, repeat_index: u32) -> PulseTiming {
        let press = self.jittered(self.press.sample(rng), rng);
        let gap = self.jittered(self.interval.sample(rng), rng);
        PulseTiming {
            press: Duration::from_millis(press),
            gap: self.accelerate(Duration::from_millis(gap), repeat_index),
        }
    }

    fn accelerate(&self, gap: Duration, repeat_index: u32) -> Duration {
        match &self.acceleration {
            Some(acceleration) if repeat_index > 0 => acceleration.apply(gap, repeat_index),
            _ => gap,
        }
    }

    fn jittered<R: Rng + ?Sized>(&self, base: u64, rng: &mut R) -> u64 {
        if self.jitter_ms == 0 {
            return base;
        }
        let offset = rng.random_range(0..=self.jitter_ms.saturating_mul(2));
        base.saturating_add(offset)
            .saturating_sub(self.jitter_ms)
            .max(MIN_CUSTOM_MS.min(base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn presets_have_documented_periods() {
        let aggressive = TimingPreset::Aggressive.profile().nominal(0);
        assert_eq!(aggressive.period(), Duration::from_millis(20));
        let casual = TimingPreset::Casual.profile().nominal(0);
        assert_eq!(casual.press, Duration::from_millis(80));
        assert_eq!(casual.gap, Duration::from_millis(100));
        let relaxed = TimingPreset::Relaxed.profile();
        assert_eq!(relaxed.max_period(), Duration::from_millis(350));
    }

    #[test]
    fn float_controls_press_longer() {
        let profile = TimingPreset::Aggressive
            .profile()
            .for_value_kind(ValueKind::Float, DEFAULT_FLOAT_PRESS_EXTRA_MS);
        assert_eq!(profile.nominal(0).press, Duration::from_millis(40));
        let integer = TimingPreset::Aggressive
            .profile()
            .for_value_kind(ValueKind::Integer, DEFAULT_FLOAT_PRESS_EXTRA_MS);
        assert_eq!(integer.nominal(0).press, Duration::from_millis(10));
    }

    #[test]
    fn custom_timing_rejects_inverted_or_tiny_ranges() {
        let mut custom = CustomTiming::default();
        assert!(custom.validate().is_ok());
        custom.press_ms = MsRange::new(90, 60);
        assert!(matches!(custom.validate(), Err(TimingError::InvalidRange { .. })));
        custom.press_ms = MsRange::new(5, 60);
        assert!(matches!(custom.validate(), Err(TimingError::BelowMinimum { .. })));
    }

    #[test]
    fn custom_timing_caps_long_presses() {
        let mut custom = CustomTiming {
            press_ms: MsRange::new(400, 800),
            ..CustomTiming::default()
        };
        assert!(matches!(
            custom.validate(),
            Err(TimingError::AboveMaximum { field: "press_ms", value: 800, .. })
        ));

        // Jitter counts against the cap
        custom.press_ms = MsRange::fixed(MAX_PRESS_MS);
        assert!(custom.validate().is_ok());
        custom.jitter_ms = 1;
        assert!(matches!(custom.validate(), Err(TimingError::AboveMaximum { .. })));

        custom.jitter_ms = 0;
        custom.interval_ms = MsRange::fixed(MAX_INTERVAL_MS + 1);
        assert!(matches!(
            custom.validate(),
            Err(TimingError::AboveMaximum { field: "interval_ms", .. })
        ));
    }

    #[test]
    fn max_press_includes_jitter() -> TestResult {
        let custom = CustomTiming {
            press_ms: MsRange::new(60, 80),
            jitter_ms: 15,
            ..CustomTiming::default()
        };
        let profile = TimingSelection::Custom(custom).resolve()?;
        assert_eq!(profile.max_press(), Duration::from_millis(95));
        assert_eq!(TimingProfile::fixed(12, 12).max_press(), Duration::from_millis(12));
        Ok(())
    }

    #[test]
    fn samples_stay_within_range() -> TestResult {
        let profile = TimingSelection::Custom(CustomTiming::default()).resolve()?;
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let t = profile.sample(&mut rng, 0);
            assert!(t.press >= Duration::from_millis(60) && t.press <= Duration::from_millis(80));
            assert!(t.gap >= Duration::from_millis(60) && t.gap <= Duration::from_millis(90));
        }
        Ok(())
    }

    #[test]
    fn acceleration_shortens_repeats_down_to_floor() -> TestResult {
        let custom = CustomTiming {
            press_ms: MsRange::fixed(20),
            interval_ms: MsRange::fixed(100),
            initial_delay_ms: 300,
            jitter_ms: 0,
            acceleration: Some(RepeatAcceleration {
                factor: 0.5,
                min_interval_ms: 30,
            }),
        };
        let profile = TimingSelection::Custom(custom).resolve()?;
        assert_eq!(profile.nominal(0).gap, Duration::from_millis(100));
        assert_eq!(profile.nominal(1).gap, Duration::from_millis(50));
        assert_eq!(profile.nominal(5).gap, Duration::from_millis(30));
        Ok(())
    }

    #[test]
    fn selection_serializes_with_kind_tag() -> TestResult {
        let json = serde_json::to_string(&TimingSelection::from(TimingPreset::Relaxed))?;
        assert!(json.contains("\"kind\":\"named\""));
        let back: TimingSelection = serde_json::from_str(&json)?;
        assert_eq!(back, TimingSelection::from(TimingPreset::Relaxed));
        Ok(())
    }

    #[test]
    fn preset_parses_case_insensitively() {
        assert_eq!("Aggressive".parse::<TimingPreset>(), Ok(TimingPreset::Aggressive));
        assert!("turbo".parse::<TimingPreset>().is_err());
    }
}
