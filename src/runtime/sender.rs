//! Fire-and-forget broadcast sender for output queues

use crossbeam_channel::Sender as CrossbeamSender;
use tracing::trace;

/// Channel message wrapper for end-of-stream signaling
///
/// Every output queue carries `ChannelMessage<T>` so a producer can say
/// explicitly that no more data follows, even while other clones of the
/// underlying channel are still alive.
///
/// Decoders never see this enum directly: `Sender::send()` wraps values in
/// `Sample(T)` and `Receiver::recv()` unwraps them.
#[derive(Clone, Debug)]
pub enum ChannelMessage<T> {
    /// A data item
    Sample(T),
    /// End-of-stream marker: no more data will be sent
    EndOfStream,
}

/// Broadcast sender into unbounded subscriber queues
///
/// Sending never blocks and never fails: a subscriber that went away is
/// dropped from the destination list.
pub struct Sender<T> {
    destinations: Vec<CrossbeamSender<ChannelMessage<T>>>,
}

impl<T: Clone> Sender<T> {
    pub fn new() -> Self {
        Self {
            destinations: Vec::new(),
        }
    }

    /// Add one subscriber queue
    pub fn attach(&mut self, destination: CrossbeamSender<ChannelMessage<T>>) {
        self.destinations.push(destination);
    }

    /// Send a value to all destinations
    pub fn send(&mut self, value: T) {
        let before = self.destinations.len();
        self.destinations
            .retain(|dest| dest.send(ChannelMessage::Sample(value.clone())).is_ok());
        if self.destinations.len() < before {
            trace!(
                "Dropped {} disconnected subscriber(s)",
                before - self.destinations.len()
            );
        }
    }

    /// Signal end-of-stream to all destinations
    ///
    /// Downstream `Receiver`s return `WorkError::EndOfStream` on subsequent
    /// `recv()` calls.
    pub fn close(&mut self) {
        for dest in self.destinations.drain(..) {
            let _ = dest.send(ChannelMessage::EndOfStream);
        }
    }
}

impl<T: Clone> Default for Sender<T> {
    fn default() -> Self {
        Self::new()
    }
}
