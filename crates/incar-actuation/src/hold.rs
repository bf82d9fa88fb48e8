//! Hold-repeat state machine for one (control, input) pair.
//!
//! ```text
//! Idle --press--> Pressed --initial delay--> Pulsing --period--> HeldRepeating
//!   any state --release--> Released
//! ```
//!
//! The machine is clock-free: callers pass `now` and a live descriptor, and
//! get back what to do. The dispatcher owns the clock and the sink.

use incar_input::InputId;
use incar_telemetry::ControlDescriptor;
use incar_timing::{PulseTiming, TimingProfile};
use rand::Rng;
use std::fmt;
use std::time::Instant;

use crate::burst::{Direction, can_step};

/// Where a hold is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HoldState {
    /// Not yet pressed.
    Idle,
    /// First pulse sent; waiting out the initial delay.
    Pressed,
    /// Initial delay passed; the first repeat is out.
    Pulsing,
    /// Repeats continue, accelerating if the profile allows.
    HeldRepeating,
    /// Input released or the hold otherwise ended.
    Released,
}

/// Why a hold stopped pulsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldEnd {
    Released,
    /// The control reached its bound; holding longer does nothing.
    AtBound,
    /// The telemetry link went down.
    Unavailable,
    /// The control disappeared from the catalog.
    UnknownControl,
    /// Superseded by a preset or combo on the same control.
    Cancelled,
    DispatcherStopped,
    SinkFailed(String),
}

impl fmt::Display for HoldEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoldEnd::Released => write!(f, "released"),
            HoldEnd::AtBound => write!(f, "at bound"),
            HoldEnd::Unavailable => write!(f, "controls unavailable"),
            HoldEnd::UnknownControl => write!(f, "unknown control"),
            HoldEnd::Cancelled => write!(f, "cancelled"),
            HoldEnd::DispatcherStopped => write!(f, "dispatcher stopped"),
            HoldEnd::SinkFailed(reason) => write!(f, "sink failed: {reason}"),
        }
    }
}

/// What the dispatcher should do next for a hold.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldStep {
    /// Emit one pulse with this timing.
    Pulse(PulseTiming),
    /// Not due yet.
    Wait,
    /// Stop and drop the hold.
    Finished(HoldEnd),
}

#[derive(Debug, Clone)]
pub struct HoldMachine {
    control_id: String,
    input: InputId,
    direction: Direction,
    timing: TimingProfile,
    state: HoldState,
    origin: f64,
    pulses: u32,
    next_due: Option<Instant>,
}

impl HoldMachine {
    pub fn new(
        control_id: impl Into<String>,
        input: InputId,
        direction: Direction,
        timing: TimingProfile,
    ) -> Self {
        Self {
            control_id: control_id.into(),
            input,
            direction,
            timing,
            state: HoldState::Idle,
            origin: 0.0,
            pulses: 0,
            next_due: None,
        }
    }

    pub fn control_id(&self) -> &str {
        &self.control_id
    }

    pub fn input(&self) -> &InputId {
        &self.input
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> HoldState {
        self.state
    }

    /// Pulses emitted so far.
    pub fn pulses(&self) -> u32 {
        self.pulses
    }

    /// When the next pulse is due, if any.
    pub fn due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Value the control would have if every pulse so far landed.
    pub fn projected(&self, step_size: f64) -> f64 {
        self.origin + self.direction.sign() * step_size * f64::from(self.pulses)
    }

    /// Input went down: `Idle -> Pressed`, emitting the first pulse.
    ///
    /// At bound the hold finishes immediately without a pulse.
    pub fn press<R: Rng + ?Sized>(
        &mut self,
        live: &ControlDescriptor,
        now: Instant,
        rng: &mut R,
    ) -> HoldStep {
        if self.state != HoldState::Idle {
            return HoldStep::Wait;
        }
        self.origin = live.current_value;
        if !can_step(live, live.current_value, self.direction) {
            return self.finish(HoldEnd::AtBound);
        }

        let timing = self.timing.sample(rng, 0);
        self.pulses = 1;
        self.state = HoldState::Pressed;
        self.next_due = Some(now + self.timing.initial_delay().max(timing.period()));
        HoldStep::Pulse(timing)
    }

    /// Advance the machine. Emits a repeat pulse when one is due.
    ///
    /// The bound check uses the further of live telemetry and the projected
    /// value, so unconfirmed pulses are never allowed to push past a bound.
    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        live: &ControlDescriptor,
        now: Instant,
        rng: &mut R,
    ) -> HoldStep {
        let Some(due) = self.next_due else {
            return HoldStep::Wait;
        };
        if now < due {
            return HoldStep::Wait;
        }

        let effective = self
            .direction
            .furthest(self.projected(live.step_size), live.current_value);
        if !can_step(live, effective, self.direction) {
            return self.finish(HoldEnd::AtBound);
        }

        let repeat_index = self.pulses;
        let timing = self.timing.sample(rng, repeat_index);
        self.pulses = self.pulses.saturating_add(1);
        self.state = match self.state {
            HoldState::Pressed => HoldState::Pulsing,
            HoldState::Pulsing | HoldState::HeldRepeating => HoldState::HeldRepeating,
            other => other,
        };
        self.next_due = Some(now + timing.period());
        HoldStep::Pulse(timing)
    }

    /// Input went up. No further pulses are produced.
    pub fn release(&mut self) -> HoldEnd {
        self.state = HoldState::Released;
        self.next_due = None;
        HoldEnd::Released
    }

    /// End the hold for any other reason.
    pub fn finish(&mut self, end: HoldEnd) -> HoldStep {
        self.state = HoldState::Released;
        self.next_due = None;
        HoldStep::Finished(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incar_telemetry::ValueKind;
    use incar_timing::TimingPreset;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Duration;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn abs(current: f64) -> ControlDescriptor {
        ControlDescriptor::new("dcABS", ValueKind::Integer, 1.0, 12.0, 1.0, current)
    }

    fn machine(direction: Direction) -> Result<HoldMachine, Box<dyn std::error::Error>> {
        Ok(HoldMachine::new(
            "dcABS",
            InputId::parse("F1")?,
            direction,
            TimingPreset::Aggressive.profile(),
        ))
    }

    #[test]
    fn press_emits_one_pulse_then_waits_initial_delay() -> TestResult {
        let mut rng = StdRng::seed_from_u64(7);
        let mut hold = machine(Direction::Increase)?;
        let t0 = Instant::now();

        assert!(matches!(hold.press(&abs(4.0), t0, &mut rng), HoldStep::Pulse(_)));
        assert_eq!(hold.state(), HoldState::Pressed);
        assert_eq!(hold.tick(&abs(4.0), t0 + Duration::from_millis(100), &mut rng), HoldStep::Wait);

        let after_delay = t0 + Duration::from_millis(250);
        assert!(matches!(hold.tick(&abs(5.0), after_delay, &mut rng), HoldStep::Pulse(_)));
        assert_eq!(hold.state(), HoldState::Pulsing);

        let next = hold.due().ok_or("no next pulse")?;
        assert!(matches!(hold.tick(&abs(6.0), next, &mut rng), HoldStep::Pulse(_)));
        assert_eq!(hold.state(), HoldState::HeldRepeating);
        assert_eq!(hold.pulses(), 3);
        Ok(())
    }

    #[test]
    fn press_at_bound_is_a_no_op() -> TestResult {
        let mut rng = StdRng::seed_from_u64(7);
        let mut hold = machine(Direction::Increase)?;
        assert_eq!(
            hold.press(&abs(12.0), Instant::now(), &mut rng),
            HoldStep::Finished(HoldEnd::AtBound)
        );
        assert_eq!(hold.pulses(), 0);
        Ok(())
    }

    #[test]
    fn projection_stops_before_bound_despite_lagging_telemetry() -> TestResult {
        let mut rng = StdRng::seed_from_u64(7);
        let mut hold = machine(Direction::Decrease)?;
        let mut now = Instant::now();
        let stale = abs(3.0);

        assert!(matches!(hold.press(&stale, now, &mut rng), HoldStep::Pulse(_)));
        let mut emitted = 1;
        loop {
            now = hold.due().map_or(now, |d| d.max(now));
            match hold.tick(&stale, now, &mut rng) {
                HoldStep::Pulse(_) => emitted += 1,
                HoldStep::Finished(end) => {
                    assert_eq!(end, HoldEnd::AtBound);
                    break;
                }
                HoldStep::Wait => now += Duration::from_millis(1),
            }
        }
        // 3 -> 2 -> 1, never below min even though telemetry never moved
        assert_eq!(emitted, 2);
        Ok(())
    }

    #[test]
    fn release_stops_everything() -> TestResult {
        let mut rng = StdRng::seed_from_u64(7);
        let mut hold = machine(Direction::Increase)?;
        let t0 = Instant::now();
        assert!(matches!(hold.press(&abs(4.0), t0, &mut rng), HoldStep::Pulse(_)));
        assert_eq!(hold.release(), HoldEnd::Released);
        assert_eq!(hold.due(), None);
        assert_eq!(hold.tick(&abs(4.0), t0 + Duration::from_secs(5), &mut rng), HoldStep::Wait);
        Ok(())
    }

    #[test]
    fn second_press_is_ignored() -> TestResult {
        let mut rng = StdRng::seed_from_u64(7);
        let mut hold = machine(Direction::Increase)?;
        let t0 = Instant::now();
        assert!(matches!(hold.press(&abs(4.0), t0, &mut rng), HoldStep::Pulse(_)));
        assert_eq!(hold.press(&abs(4.0), t0, &mut rng), HoldStep::Wait);
        assert_eq!(hold.pulses(), 1);
        Ok(())
    }
}
