//! Decoder traits and the static declaration surface
//!
//! A decoder is an explicit state machine. The engine drives it through a
//! fixed lifecycle: [`Decoder::metadata`] for out-of-band facts, then
//! [`Decoder::start`] to register outputs and read options, then repeated
//! `decode_step` calls until the input is exhausted. [`Decoder::reset`]
//! returns the machine to its initial state; decoders also call it
//! themselves after a framing error.

use std::collections::HashSet;

use super::channels::{ChannelBinding, ChannelSpec};
use super::cursor::SampleCursor;
use super::errors::{SessionError, WorkResult};
use super::options::{Metadata, OptionSpec, Options};
use super::output::{OutputKind, Outputs, StreamId};
use super::wait::{Condition, WaitResult, wait};

/// One annotation (or binary) class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationClass {
    pub id: &'static str,
    pub desc: &'static str,
}

impl AnnotationClass {
    pub const fn new(id: &'static str, desc: &'static str) -> Self {
        Self { id, desc }
    }
}

/// A display row grouping annotation classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationRow {
    pub id: &'static str,
    pub desc: &'static str,
    pub classes: &'static [usize],
}

/// What a decoder advertises to the host
#[derive(Debug)]
pub struct DecoderInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub longname: &'static str,
    pub desc: &'static str,
    /// `"logic"` or the id of an upstream protocol
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
    pub channels: &'static [ChannelSpec],
    pub optional_channels: &'static [ChannelSpec],
    pub options: &'static [OptionSpec],
    pub annotations: &'static [AnnotationClass],
    pub annotation_rows: &'static [AnnotationRow],
    pub binary: &'static [AnnotationClass],
}

impl DecoderInfo {
    /// Index of an annotation class by id
    pub fn class(&self, id: &str) -> Option<usize> {
        self.annotations.iter().position(|c| c.id == id)
    }

    /// Row an annotation class is displayed in
    pub fn row_of(&self, class: usize) -> Option<&AnnotationRow> {
        self.annotation_rows
            .iter()
            .find(|row| row.classes.contains(&class))
    }

    /// Check the declaration for internal consistency
    pub fn validate(&self) -> Result<(), SessionError> {
        let contract = |msg: String| SessionError::Contract(format!("decoder '{}': {}", self.id, msg));

        let mut seen = HashSet::new();
        for class in self.annotations {
            if !seen.insert(class.id) {
                return Err(contract(format!("annotation class '{}' declared twice", class.id)));
            }
        }
        for row in self.annotation_rows {
            if let Some(bad) = row.classes.iter().find(|&&c| c >= self.annotations.len()) {
                return Err(contract(format!(
                    "row '{}' refers to class {}, only {} declared",
                    row.id,
                    bad,
                    self.annotations.len()
                )));
            }
        }
        let mut seen = HashSet::new();
        for channel in self.channels.iter().chain(self.optional_channels) {
            if !seen.insert(channel.id) {
                return Err(contract(format!("channel '{}' declared twice", channel.id)));
            }
        }
        Ok(())
    }
}

/// Passed to [`Decoder::start`]
pub struct StartContext<'a, P> {
    pub options: &'a Options,
    pub(crate) channels: &'a ChannelBinding,
    pub(crate) outputs: &'a mut Outputs<P>,
}

impl<P: Clone> StartContext<'_, P> {
    pub fn register(&mut self, kind: OutputKind, name: &str) -> Result<StreamId, SessionError> {
        self.outputs.register(kind, name)
    }

    /// Whether an optional channel was bound
    pub fn has_channel(&self, id: &str) -> bool {
        self.channels.has_channel(id)
    }
}

/// Logic input of a signal-level decoder: the cursor plus its bindings
pub struct LogicInput<'a> {
    pub(crate) cursor: &'a mut SampleCursor,
    pub(crate) binding: &'a ChannelBinding,
}

impl LogicInput<'_> {
    /// Block until one of `conditions` holds. See [`wait`].
    pub fn wait(&mut self, conditions: &[Condition]) -> WorkResult<WaitResult> {
        wait(&mut *self.cursor, self.binding, conditions)
    }

    /// Index of the current sample; `0` before the first read
    pub fn samplenum(&self) -> u64 {
        self.cursor.current_index().unwrap_or(0)
    }

    /// Level of a logical channel at the current sample
    pub fn sample_at(&self, channel: usize) -> Option<bool> {
        self.binding
            .line(channel)
            .and_then(|line| self.cursor.level(line))
    }

    pub fn has_channel(&self, id: &str) -> bool {
        self.binding.has_channel(id)
    }

    pub fn is_bound(&self, channel: usize) -> bool {
        self.binding.is_bound(channel)
    }
}

/// A packet received from an upstream decoder
#[derive(Debug, Clone, PartialEq)]
pub struct Packet<T> {
    pub start: u64,
    pub end: u64,
    pub data: T,
}

/// Behaviour shared by every decoder
pub trait Decoder: Send {
    /// Packet type this decoder emits for stacked decoders
    type Packet: Clone + Send + 'static;

    fn info(&self) -> &'static DecoderInfo;

    /// Out-of-band facts, delivered before `start`
    fn metadata(&mut self, _metadata: &Metadata) {}

    /// Register outputs and read options. Errors are fatal to the session.
    fn start(&mut self, ctx: &mut StartContext<'_, Self::Packet>) -> Result<(), SessionError>;

    /// Return to the initial state, dropping any partial frame
    fn reset(&mut self);
}

/// A decoder that reads sampled logic levels
pub trait LogicDecoder: Decoder {
    /// Run one pass of the state machine: wait, process, emit.
    ///
    /// `WorkError::EndOfStream` from a wait must be propagated unchanged.
    fn decode_step(
        &mut self,
        input: &mut LogicInput<'_>,
        out: &mut Outputs<Self::Packet>,
    ) -> WorkResult<()>;
}

/// A decoder that reads another decoder's packets
pub trait StackedDecoder: Decoder {
    type Input: Clone + Send + 'static;

    fn decode_step(
        &mut self,
        packet: Packet<Self::Input>,
        out: &mut Outputs<Self::Packet>,
    ) -> WorkResult<()>;
}
