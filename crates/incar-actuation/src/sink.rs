//! Where pulses go.
//!
//! Key injection is platform specific and lives outside this crate. The
//! dispatcher only needs something that can perform one pulse.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::burst::Direction;

/// One discrete press of a control's increase or decrease input.
#[derive(Debug, Clone, PartialEq)]
pub struct Pulse {
    pub control_id: String,
    pub direction: Direction,
    /// How long the input is held down.
    pub press: Duration,
}

/// Performs pulses toward the simulator.
///
/// `emit` runs on the dispatcher thread and may block for at most the
/// pulse's press duration. It must not perform disk or network I/O.
pub trait PulseSink: Send {
    fn name(&self) -> &str;

    /// Perform one pulse.
    ///
    /// # Errors
    ///
    /// A description of the failure; the current hold or burst is ended.
    fn emit(&mut self, pulse: &Pulse) -> Result<(), String>;
}

/// A pulse observed by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPulse {
    pub pulse: Pulse,
    pub at: Instant,
}

/// Sink that records pulses instead of pressing anything.
///
/// Clones share the same record, so a test can keep one handle while the
/// dispatcher owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pulses: Arc<Mutex<Vec<RecordedPulse>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pulses(&self) -> Vec<RecordedPulse> {
        self.pulses.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.pulses.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulses.lock().is_empty()
    }

    /// Pulses sent to one control in one direction.
    pub fn count(&self, control_id: &str, direction: Direction) -> usize {
        self.pulses
            .lock()
            .iter()
            .filter(|r| r.pulse.control_id == control_id && r.pulse.direction == direction)
            .count()
    }

    pub fn clear(&self) {
        self.pulses.lock().clear();
    }
}

impl PulseSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn emit(&mut self, pulse: &Pulse) -> Result<(), String> {
        self.pulses.lock().push(RecordedPulse {
            pulse: pulse.clone(),
            at: Instant::now(),
        });
        Ok(())
    }
}

/// Sink shared between dispatcher generations.
pub type SharedSink = Arc<Mutex<Box<dyn PulseSink>>>;

/// Wrap a sink for use by the dispatcher.
pub fn shared_sink(sink: impl PulseSink + 'static) -> SharedSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_record() -> Result<(), String> {
        let sink = RecordingSink::new();
        let mut handle = sink.clone();
        handle.emit(&Pulse {
            control_id: "dcABS".to_string(),
            direction: Direction::Increase,
            press: Duration::from_millis(10),
        })?;
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.count("dcABS", Direction::Increase), 1);
        assert_eq!(sink.count("dcABS", Direction::Decrease), 0);
        Ok(())
    }
}
