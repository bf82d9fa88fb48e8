//! Fan-in of every input front end into one ordered stream.

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::allowlist::DeviceAllowlist;
use crate::error::{InputError, InputResult};
use crate::event::{InputEvent, InputPhase, PhaseNormalizer};
use crate::id::InputId;

/// Default capacity of the shared input channel.
pub const DEFAULT_INPUT_QUEUE: usize = 256;

// The channel is twice the configured capacity. Presses and repeats only use
// the first half; the rest is kept for releases so a burst of presses cannot
// leave a hold running.

pub type InputReceiver = mpsc::Receiver<InputEvent>;

/// Owns the receiving end until the engine takes it.
#[derive(Debug)]
pub struct InputHub {
    tx: mpsc::Sender<InputEvent>,
    rx: InputReceiver,
    headroom: usize,
    allowlist: DeviceAllowlist,
}

impl Default for InputHub {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_QUEUE)
    }
}

impl InputHub {
    pub fn new(capacity: usize) -> Self {
        let headroom = capacity.max(1);
        let (tx, rx) = mpsc::channel(headroom.saturating_mul(2));
        Self {
            tx,
            rx,
            headroom,
            allowlist: DeviceAllowlist::default(),
        }
    }

    /// Accept HID input only from the devices in `allowlist`.
    pub fn with_allowlist(mut self, allowlist: DeviceAllowlist) -> Self {
        self.allowlist = allowlist;
        self
    }

    pub fn allowlist(&self) -> &DeviceAllowlist {
        &self.allowlist
    }

    /// A handle for one front end. Each handle normalizes its own phases.
    pub fn sender(&self, name: impl Into<String>) -> InputSender {
        InputSender {
            name: name.into(),
            tx: self.tx.clone(),
            normalizer: PhaseNormalizer::new(),
            headroom: self.headroom,
            allowlist: self.allowlist.clone(),
        }
    }

    /// Hand the stream to the engine. The stream ends once every sender is
    /// dropped.
    pub fn into_receiver(self) -> InputReceiver {
        self.rx
    }
}

/// Per-front-end sending handle.
#[derive(Debug)]
pub struct InputSender {
    name: String,
    tx: mpsc::Sender<InputEvent>,
    normalizer: PhaseNormalizer,
    headroom: usize,
    allowlist: DeviceAllowlist,
}

impl InputSender {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Presses from devices outside the allowlist never enter the stream.
    /// Releases always reach the normalizer so a press accepted before the
    /// list changed still ends.
    fn admits(&self, id: &InputId, phase: InputPhase) -> bool {
        if phase == InputPhase::Released || self.allowlist.allows(id) {
            return true;
        }
        trace!(source = %self.name, input = %id, "device not allowed; input ignored");
        false
    }

    /// Submit a transition, waiting for queue space.
    pub async fn send(&mut self, id: InputId, phase: InputPhase) -> InputResult<()> {
        if !self.admits(&id, phase) {
            return Ok(());
        }
        for event in self.normalizer.normalize(id, phase) {
            self.tx
                .send(event)
                .await
                .map_err(|_closed| InputError::ChannelClosed)?;
        }
        Ok(())
    }

    /// Parse a raw identifier and submit it.
    pub async fn send_raw(&mut self, raw: &str, phase: InputPhase) -> InputResult<()> {
        let id = InputId::parse(raw)?;
        self.send(id, phase).await
    }

    /// Non-blocking submit for front ends running on their own threads.
    ///
    /// When the queue is busy a press or repeat is dropped with a warning and
    /// the input stays up. Releases are never dropped: they use the reserved
    /// headroom, and if even that is exhausted the input stays down and
    /// `QueueFull` asks the caller to send the release again.
    pub fn try_send(&mut self, id: InputId, phase: InputPhase) -> InputResult<()> {
        if !self.admits(&id, phase) {
            return Ok(());
        }
        for event in self.normalizer.normalize(id, phase) {
            if event.phase != InputPhase::Released && self.tx.capacity() <= self.headroom {
                warn!(source = %self.name, input = %event.id, phase = ?event.phase, "input queue busy; event dropped");
                self.normalizer.undo(&event);
                // A dropped voice press takes its paired release with it.
                break;
            }
            match self.tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    self.normalizer.undo(&event);
                    if event.phase == InputPhase::Released {
                        warn!(source = %self.name, input = %event.id, "input queue full; release must be retried");
                        return Err(InputError::QueueFull(event.id.to_string()));
                    }
                    warn!(source = %self.name, input = %event.id, "input queue full; event dropped");
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(InputError::ChannelClosed),
            }
        }
        Ok(())
    }

    /// Release everything this front end holds down.
    pub async fn disconnect(&mut self) -> InputResult<()> {
        let released = self.normalizer.release_all();
        if !released.is_empty() {
            debug!(source = %self.name, count = released.len(), "releasing held inputs");
        }
        for event in released {
            self.tx
                .send(event)
                .await
                .map_err(|_closed| InputError::ChannelClosed)?;
        }
        Ok(())
    }
}
