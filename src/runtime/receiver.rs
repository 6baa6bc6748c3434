//! Blocking queue receiver
//!
//! [`Receiver`] wraps a single `crossbeam_channel::Receiver<ChannelMessage<T>>`.
//! It unwraps `ChannelMessage` and caches end-of-stream state so subsequent
//! calls return `EndOfStream` without touching the channel.

use crossbeam_channel::Receiver as CrossbeamReceiver;

use super::errors::{WorkError, WorkResult};
use super::sender::ChannelMessage;

pub struct Receiver<T> {
    receiver: CrossbeamReceiver<ChannelMessage<T>>,
    eos: bool,
}

impl<T> Receiver<T> {
    pub fn new(receiver: CrossbeamReceiver<ChannelMessage<T>>) -> Self {
        Self {
            receiver,
            eos: false,
        }
    }

    /// Blocking receive.
    ///
    /// Returns `Err(WorkError::EndOfStream)` once end-of-stream has been
    /// received (either now or in a previous call) or the producer is gone.
    pub fn recv(&mut self) -> WorkResult<T> {
        if self.eos {
            return Err(WorkError::EndOfStream);
        }

        match self.receiver.recv() {
            Ok(ChannelMessage::Sample(item)) => Ok(item),
            Ok(ChannelMessage::EndOfStream) => {
                self.eos = true;
                tracing::debug!("Receiver::recv() - EndOfStream received");
                Err(WorkError::EndOfStream)
            }
            Err(_) => {
                self.eos = true;
                tracing::debug!("Receiver::recv() - channel disconnected");
                Err(WorkError::EndOfStream)
            }
        }
    }
}

impl<T> Iterator for Receiver<T> {
    type Item = T;

    /// Blocking iteration until end-of-stream
    fn next(&mut self) -> Option<T> {
        self.recv().ok()
    }
}
