//! Sample sources feeding the cursor
//!
//! A [`SampleSource`] hands out consecutive [`LogicChunk`]s until the capture
//! is exhausted. Chunks must be contiguous: each one starts where the
//! previous one ended.

use crossbeam_channel::{Receiver as CrossbeamReceiver, unbounded};
use std::collections::VecDeque;
use tracing::debug;

use super::errors::{SessionError, WorkError, WorkResult};
use super::node::ProcessNode;
use super::sample::{LogicChunk, SignalBuilder};
use super::sender::{ChannelMessage, Sender};
use crate::CaptureError;

/// Pull-based provider of captured logic data
pub trait SampleSource: Send {
    /// Number of physical lines in every chunk this source yields
    fn num_lines(&self) -> usize;

    /// Next chunk, or `Ok(None)` once the capture is exhausted
    fn next_chunk(&mut self) -> Result<Option<LogicChunk>, CaptureError>;
}

/// In-memory source over pre-built chunks
pub struct ChunkSource {
    num_lines: usize,
    chunks: VecDeque<LogicChunk>,
}

impl ChunkSource {
    pub fn new(num_lines: usize, chunks: impl IntoIterator<Item = LogicChunk>) -> Self {
        Self {
            num_lines,
            chunks: chunks.into_iter().collect(),
        }
    }

    /// Source over a synthetic capture, split into chunks of `chunk_size`
    pub fn from_signal(signal: &SignalBuilder, chunk_size: usize) -> Self {
        Self::new(signal.num_lines(), signal.chunks(chunk_size))
    }
}

impl SampleSource for ChunkSource {
    fn num_lines(&self) -> usize {
        self.num_lines
    }

    fn next_chunk(&mut self) -> Result<Option<LogicChunk>, CaptureError> {
        Ok(self.chunks.pop_front())
    }
}

/// Source fed by another thread over a crossbeam channel
///
/// The producer sends `ChannelMessage::Sample(chunk)` per chunk and
/// `ChannelMessage::EndOfStream` when done; a dropped producer also ends the
/// capture.
pub struct ChunkReceiver {
    num_lines: usize,
    receiver: CrossbeamReceiver<ChannelMessage<LogicChunk>>,
    eos: bool,
}

impl ChunkReceiver {
    pub fn new(num_lines: usize, receiver: CrossbeamReceiver<ChannelMessage<LogicChunk>>) -> Self {
        Self {
            num_lines,
            receiver,
            eos: false,
        }
    }
}

impl SampleSource for ChunkReceiver {
    fn num_lines(&self) -> usize {
        self.num_lines
    }

    fn next_chunk(&mut self) -> Result<Option<LogicChunk>, CaptureError> {
        if self.eos {
            return Ok(None);
        }
        match self.receiver.recv() {
            Ok(ChannelMessage::Sample(chunk)) => Ok(Some(chunk)),
            Ok(ChannelMessage::EndOfStream) => {
                self.eos = true;
                debug!("ChunkReceiver: EndOfStream received");
                Ok(None)
            }
            Err(_) => {
                self.eos = true;
                debug!("ChunkReceiver: producer disconnected");
                Ok(None)
            }
        }
    }
}

/// Node that reads a [`SampleSource`] in its own thread and forwards the
/// chunks to a [`ChunkReceiver`]
pub struct SourceNode {
    name: String,
    source: Box<dyn SampleSource>,
    output: Sender<LogicChunk>,
    chunks: usize,
}

impl SourceNode {
    /// Split `source` into a node for the scheduler and the receiving end a
    /// session's cursor reads from
    pub fn channel(name: &str, source: Box<dyn SampleSource>) -> (Self, ChunkReceiver) {
        let (tx, rx) = unbounded();
        let mut output = Sender::new();
        output.attach(tx);
        let receiver = ChunkReceiver::new(source.num_lines(), rx);
        let node = Self {
            name: name.to_string(),
            source,
            output,
            chunks: 0,
        };
        (node, receiver)
    }
}

impl ProcessNode for SourceNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn work(&mut self) -> WorkResult<usize> {
        match self.source.next_chunk().map_err(SessionError::from)? {
            Some(chunk) => {
                self.output.send(chunk);
                self.chunks += 1;
                Ok(1)
            }
            None => Err(WorkError::EndOfStream),
        }
    }

    fn finish(&mut self) {
        debug!("[{}] forwarded {} chunks", self.name, self.chunks);
        self.output.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_chunk_source_drains_in_order() {
        let mut signal = SignalBuilder::new(1);
        signal.hold(10);
        let mut source = ChunkSource::from_signal(&signal, 4);

        let starts: Vec<u64> = std::iter::from_fn(|| source.next_chunk().unwrap())
            .map(|c| c.start())
            .collect();
        assert_eq!(starts, vec![0, 4, 8]);
        assert!(source.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_chunk_receiver_end_of_stream() {
        let (tx, rx) = unbounded();
        let mut source = ChunkReceiver::new(1, rx);

        tx.send(ChannelMessage::Sample(LogicChunk::from_words(0, &[1, 0], 1)))
            .unwrap();
        tx.send(ChannelMessage::EndOfStream).unwrap();

        assert_eq!(source.next_chunk().unwrap().unwrap().len(), 2);
        assert!(source.next_chunk().unwrap().is_none());
        // Cached: no further blocking recv
        assert!(source.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_chunk_receiver_disconnect() {
        let (tx, rx) = unbounded::<ChannelMessage<LogicChunk>>();
        let mut source = ChunkReceiver::new(1, rx);
        drop(tx);
        assert!(source.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_source_node_forwards_and_closes() {
        let mut signal = SignalBuilder::new(2);
        signal.set(1, true).hold(9);
        let (mut node, mut receiver) =
            SourceNode::channel("capture", Box::new(ChunkSource::from_signal(&signal, 4)));
        assert_eq!(receiver.num_lines(), 2);

        while node.work().is_ok() {}
        node.finish();

        let lens: Vec<usize> = std::iter::from_fn(|| receiver.next_chunk().unwrap())
            .map(|c| c.len())
            .collect();
        assert_eq!(lens, vec![4, 4, 1]);
    }
}
