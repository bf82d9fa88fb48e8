//! A simulated simulator and a logging pulse sink.
//!
//! [`SimulatedSimulator`] is both ends of the loop: it serves telemetry
//! snapshots and applies the pulses it receives, one step each, clamped to
//! the control's range. It backs `incard run --simulate` and the runtime
//! tests. [`LoggingSink`] stands in for platform key injection when the
//! engine reads a real bridge.

use async_trait::async_trait;
use incar_actuation::{Pulse, PulseSink};
use incar_telemetry::{
    ControlDescriptor, SessionIdentity, SessionState, TelemetryError, TelemetryResult,
    TelemetrySnapshot, TelemetrySource, ValueKind,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct SimState {
    session: SessionIdentity,
    controls: Vec<ControlDescriptor>,
    in_car: bool,
    pulses: u64,
    stall_next_read: Option<Duration>,
}

/// Deterministic in-process car. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedSimulator {
    state: Arc<Mutex<SimState>>,
    hold_press: bool,
}

impl SimulatedSimulator {
    pub fn new(session: SessionIdentity, controls: Vec<ControlDescriptor>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                session,
                controls,
                in_car: true,
                pulses: 0,
                stall_next_read: None,
            })),
            hold_press: true,
        }
    }

    /// A GT3 car at Monza with the usual in-car adjustments.
    pub fn gt3_demo() -> Self {
        Self::new(
            SessionIdentity::new("Ferrari 296 GT3", "Monza", SessionState::Practice),
            vec![
                ControlDescriptor::new("dcBrakeBias", ValueKind::Float, 40.0, 60.0, 0.5, 52.0),
                ControlDescriptor::new("dcABS", ValueKind::Integer, 1.0, 12.0, 1.0, 4.0),
                ControlDescriptor::new("dcTractionControl", ValueKind::Integer, 1.0, 12.0, 1.0, 5.0),
                ControlDescriptor::new("dcTractionControl2", ValueKind::Integer, 1.0, 12.0, 1.0, 5.0),
                ControlDescriptor::new("dcEnginePower", ValueKind::Integer, 1.0, 8.0, 1.0, 1.0),
                ControlDescriptor::new("dcAntiRollFront", ValueKind::Integer, 1.0, 10.0, 1.0, 6.0),
                ControlDescriptor::new("dcAntiRollRear", ValueKind::Integer, 1.0, 10.0, 1.0, 4.0),
            ],
        )
    }

    /// Return from `emit` without sleeping for the press duration.
    pub fn without_press_delay(mut self) -> Self {
        self.hold_press = false;
        self
    }

    /// Driver climbs in or out; reads fail while out of the car.
    pub fn set_in_car(&self, in_car: bool) {
        self.state.lock().in_car = in_car;
    }

    /// Switch car, track or session phase.
    pub fn set_session(&self, session: SessionIdentity, controls: Vec<ControlDescriptor>) {
        let mut state = self.state.lock();
        state.session = session;
        state.controls = controls;
    }

    /// Move a control as if the driver used the simulator's own controls.
    pub fn set_value(&self, control_id: &str, value: f64) -> bool {
        let mut state = self.state.lock();
        match state.controls.iter_mut().find(|c| c.id == control_id) {
            Some(control) => {
                control.current_value = value.clamp(control.min_value, control.max_value);
                true
            }
            None => false,
        }
    }

    pub fn value(&self, control_id: &str) -> Option<f64> {
        self.state
            .lock()
            .controls
            .iter()
            .find(|c| c.id == control_id)
            .map(|c| c.current_value)
    }

    /// Pulses received so far.
    pub fn pulses(&self) -> u64 {
        self.state.lock().pulses
    }

    /// Block the thread of the next read for `duration`, the way a bridge
    /// wedged in a file read would.
    pub fn stall_next_read(&self, duration: Duration) {
        self.state.lock().stall_next_read = Some(duration);
    }
}

#[async_trait]
impl TelemetrySource for SimulatedSimulator {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn read(&self) -> TelemetryResult<TelemetrySnapshot> {
        let stall = self.state.lock().stall_next_read.take();
        if let Some(stall) = stall {
            warn!(stall_ms = u64::try_from(stall.as_millis()).unwrap_or(u64::MAX), "Simulated read stalled");
            std::thread::sleep(stall);
        }
        let state = self.state.lock();
        if !state.in_car {
            return Err(TelemetryError::unavailable("driver not in car"));
        }
        Ok(TelemetrySnapshot {
            session: state.session.clone(),
            controls: state.controls.clone(),
        })
    }
}

impl PulseSink for SimulatedSimulator {
    fn name(&self) -> &str {
        "simulated"
    }

    fn emit(&mut self, pulse: &Pulse) -> Result<(), String> {
        if self.hold_press {
            std::thread::sleep(pulse.press);
        }
        let mut state = self.state.lock();
        state.pulses = state.pulses.saturating_add(1);
        let Some(control) = state.controls.iter_mut().find(|c| c.id == pulse.control_id) else {
            debug!(control_id = %pulse.control_id, "Pulse for a control this car lacks");
            return Ok(());
        };
        let moved = control.current_value + pulse.direction.sign() * control.step_size;
        control.current_value = moved.clamp(control.min_value, control.max_value);
        Ok(())
    }
}

/// Logs every pulse. Platform key injection plugs in at the same seam.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

impl PulseSink for LoggingSink {
    fn name(&self) -> &str {
        "log"
    }

    fn emit(&mut self, pulse: &Pulse) -> Result<(), String> {
        info!(
            control_id = %pulse.control_id,
            direction = %pulse.direction,
            press_ms = u64::try_from(pulse.press.as_millis()).unwrap_or(u64::MAX),
            "pulse"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use incar_actuation::Direction;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn pulse(control_id: &str, direction: Direction) -> Pulse {
        Pulse {
            control_id: control_id.to_string(),
            direction,
            press: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn pulses_move_values_within_bounds() -> TestResult {
        let mut sim = SimulatedSimulator::gt3_demo().without_press_delay();
        sim.emit(&pulse("dcBrakeBias", Direction::Increase))?;
        assert_eq!(sim.value("dcBrakeBias"), Some(52.5));

        sim.set_value("dcABS", 12.0);
        sim.emit(&pulse("dcABS", Direction::Increase))?;
        assert_eq!(sim.value("dcABS"), Some(12.0));

        let snapshot = sim.read().await?;
        assert_eq!(snapshot.session.car_name, "Ferrari 296 GT3");
        assert_eq!(sim.pulses(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn out_of_car_reads_fail() {
        let sim = SimulatedSimulator::gt3_demo();
        sim.set_in_car(false);
        assert!(sim.read().await.is_err());
    }
}
