//! Input events and phase normalization.

use std::collections::HashSet;
use std::time::Instant;
use tracing::trace;

use crate::id::{InputId, InputSource};

/// Lifecycle of a physical input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputPhase {
    Pressed,
    Held,
    Released,
}

/// One normalized input transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub id: InputId,
    pub phase: InputPhase,
    pub timestamp: Instant,
}

impl InputEvent {
    pub fn new(id: InputId, phase: InputPhase) -> Self {
        Self {
            id,
            phase,
            timestamp: Instant::now(),
        }
    }

    pub fn pressed(id: InputId) -> Self {
        Self::new(id, InputPhase::Pressed)
    }

    pub fn released(id: InputId) -> Self {
        Self::new(id, InputPhase::Released)
    }

    pub fn source(&self) -> InputSource {
        self.id.source()
    }
}

/// Cleans up raw front-end transitions.
///
/// Keyboard auto-repeat shows up as repeated presses; those become `Held`.
/// A release for an input that is not down is dropped. Voice inputs have no
/// physical hold and always expand to a press immediately followed by a
/// release.
#[derive(Debug, Default)]
pub struct PhaseNormalizer {
    down: HashSet<InputId>,
}

impl PhaseNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize one raw transition into zero, one, or two events.
    pub fn normalize(&mut self, id: InputId, phase: InputPhase) -> Vec<InputEvent> {
        if id.is_instantaneous() {
            return match phase {
                InputPhase::Pressed => {
                    let pressed = InputEvent::pressed(id.clone());
                    vec![pressed, InputEvent::released(id)]
                }
                InputPhase::Held | InputPhase::Released => Vec::new(),
            };
        }

        match phase {
            InputPhase::Pressed | InputPhase::Held => {
                if self.down.insert(id.clone()) {
                    vec![InputEvent::pressed(id)]
                } else {
                    vec![InputEvent::new(id, InputPhase::Held)]
                }
            }
            InputPhase::Released => {
                if self.down.remove(&id) {
                    vec![InputEvent::released(id)]
                } else {
                    trace!(input = %id, "release without press dropped");
                    Vec::new()
                }
            }
        }
    }

    /// Whether an input is currently down.
    pub fn is_down(&self, id: &InputId) -> bool {
        self.down.contains(id)
    }

    /// Roll back the state change made for an event that never reached the
    /// engine: a lost press leaves the input up, a lost release keeps it down
    /// so the release can be sent again.
    pub fn undo(&mut self, event: &InputEvent) {
        if event.id.is_instantaneous() {
            return;
        }
        match event.phase {
            InputPhase::Pressed => {
                self.down.remove(&event.id);
            }
            InputPhase::Released => {
                self.down.insert(event.id.clone());
            }
            InputPhase::Held => {}
        }
    }

    /// Release every held input, e.g. when a front end disconnects.
    pub fn release_all(&mut self) -> Vec<InputEvent> {
        self.down.drain().map(InputEvent::released).collect()
    }
}
