//! Decode sessions
//!
//! A session owns one decoder instance and its input. Construction performs
//! the whole fatal-error surface in a fixed order:
//!
//! 1. validate the decoder declaration and the user options
//! 2. bind channels
//! 3. deliver metadata (sample rate)
//! 4. `start` the decoder, which registers its outputs
//! 5. seal registration
//!
//! Nothing is read from the input before all five steps succeed. Afterwards
//! each [`LogicSession::step`] / [`StackedSession::step`] runs one decode
//! step; the session ends at end-of-stream and closes its outputs.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::channels::ChannelBinding;
use super::cursor::SampleCursor;
use super::decoder::{Decoder, LogicDecoder, LogicInput, Packet, StackedDecoder, StartContext};
use super::errors::{SessionError, WorkError, WorkResult};
use super::node::ProcessNode;
use super::options::{Metadata, Options, SessionConfig};
use super::output::{Emission, OutputPayload, Outputs, StreamFilter};
use super::receiver::Receiver;
use super::source::SampleSource;

/// What a finished (or running) session did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub decoder: &'static str,
    /// Samples read by a logic session, packets read by a stacked session
    pub consumed: u64,
    pub steps: u64,
    pub emissions: Vec<(Arc<str>, u64)>,
}

impl SessionSummary {
    /// Emissions on the named stream
    pub fn emitted(&self, stream: &str) -> u64 {
        self.emissions
            .iter()
            .find(|(name, _)| &**name == stream)
            .map_or(0, |(_, n)| *n)
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: {} consumed in {} steps",
            self.decoder, self.consumed, self.steps
        )?;
        for (name, count) in &self.emissions {
            write!(f, ", {}={}", name, count)?;
        }
        Ok(())
    }
}

fn prepare<D: Decoder>(
    decoder: &mut D,
    config: &SessionConfig,
    available_lines: usize,
) -> Result<(ChannelBinding, Outputs<D::Packet>), SessionError> {
    let info = decoder.info();
    info.validate()?;

    let options = Options::validate(info.id, info.options, config.options())?;
    let binding = ChannelBinding::bind(
        info.id,
        info.channels,
        info.optional_channels,
        config.channels(),
        available_lines,
    )?;

    if let Some(samplerate) = config.samplerate() {
        debug!("Decoder '{}': samplerate {} Hz", info.id, samplerate);
        decoder.metadata(&Metadata::Samplerate(samplerate));
    }

    let mut outputs = Outputs::new(info.id, info.annotations.len(), info.binary.len());
    let mut ctx = StartContext {
        options: &options,
        channels: &binding,
        outputs: &mut outputs,
    };
    decoder.start(&mut ctx)?;
    outputs.seal();

    info!(
        "Decoder '{}' started with {} output stream(s)",
        info.id,
        outputs.stream_names().len()
    );
    Ok((binding, outputs))
}

fn into_session_result(result: WorkResult<()>) -> Result<bool, SessionError> {
    match result {
        Ok(()) => Ok(true),
        Err(WorkError::EndOfStream) => Ok(false),
        Err(WorkError::Contract(msg)) => Err(SessionError::Contract(msg)),
        Err(WorkError::Session(e)) => Err(e),
    }
}

/// Session of a decoder reading sampled logic
pub struct LogicSession<D: LogicDecoder> {
    decoder: D,
    cursor: SampleCursor,
    binding: ChannelBinding,
    outputs: Outputs<D::Packet>,
    steps: u64,
    finished: bool,
}

impl<D: LogicDecoder> LogicSession<D> {
    pub fn new(
        mut decoder: D,
        config: &SessionConfig,
        source: Box<dyn SampleSource>,
    ) -> Result<Self, SessionError> {
        let cursor = SampleCursor::new(source);
        let (binding, outputs) = prepare(&mut decoder, config, cursor.num_lines())?;
        Ok(Self {
            decoder,
            cursor,
            binding,
            outputs,
            steps: 0,
            finished: false,
        })
    }

    /// Subscribe to this decoder's emissions. Call before stepping.
    pub fn subscribe(&mut self, filter: StreamFilter) -> Receiver<Emission<D::Packet>> {
        self.outputs.subscribe(filter)
    }

    pub fn outputs(&self) -> &Outputs<D::Packet> {
        &self.outputs
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    pub fn has_channel(&self, id: &str) -> bool {
        self.binding.has_channel(id)
    }

    /// Run one decode step. Any error ends the session.
    pub fn step(&mut self) -> WorkResult<()> {
        if self.finished {
            return Err(WorkError::EndOfStream);
        }
        let mut input = LogicInput {
            cursor: &mut self.cursor,
            binding: &self.binding,
        };
        let result = self.decoder.decode_step(&mut input, &mut self.outputs);
        self.steps += 1;
        if result.is_err() {
            self.finish();
        }
        result
    }

    /// Close all outputs. Idempotent.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.outputs.close();
        info!("Session finished: {}", self.summary());
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            decoder: self.decoder.info().id,
            consumed: self.cursor.current_index().map_or(0, |i| i + 1),
            steps: self.steps,
            emissions: self.outputs.counts(),
        }
    }

    /// Step until end-of-stream
    pub fn run(mut self) -> Result<SessionSummary, SessionError> {
        while into_session_result(self.step())? {}
        Ok(self.summary())
    }
}

impl<D: LogicDecoder> ProcessNode for LogicSession<D> {
    fn name(&self) -> &str {
        self.decoder.info().id
    }

    fn should_stop(&self) -> bool {
        self.finished
    }

    fn work(&mut self) -> WorkResult<usize> {
        self.step().map(|()| 1)
    }

    fn finish(&mut self) {
        LogicSession::finish(self);
    }
}

/// Session of a decoder stacked on another decoder's packets
pub struct StackedSession<D: StackedDecoder> {
    decoder: D,
    input: Receiver<Emission<D::Input>>,
    outputs: Outputs<D::Packet>,
    last_start: Option<u64>,
    consumed: u64,
    steps: u64,
    finished: bool,
}

impl<D: StackedDecoder> StackedSession<D> {
    /// `input` usually comes from the upstream session's
    /// `subscribe(StreamFilter::Kind(OutputKind::Packet))`
    pub fn new(
        mut decoder: D,
        config: &SessionConfig,
        input: Receiver<Emission<D::Input>>,
    ) -> Result<Self, SessionError> {
        let (_, outputs) = prepare(&mut decoder, config, 0)?;
        Ok(Self {
            decoder,
            input,
            outputs,
            last_start: None,
            consumed: 0,
            steps: 0,
            finished: false,
        })
    }

    pub fn subscribe(&mut self, filter: StreamFilter) -> Receiver<Emission<D::Packet>> {
        self.outputs.subscribe(filter)
    }

    pub fn outputs(&self) -> &Outputs<D::Packet> {
        &self.outputs
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Pull one upstream emission and feed it to the decoder if it is a
    /// packet. Blocks until the upstream delivers or ends.
    pub fn step(&mut self) -> WorkResult<()> {
        if self.finished {
            return Err(WorkError::EndOfStream);
        }
        let result = self.pull();
        self.steps += 1;
        if result.is_err() {
            self.finish();
        }
        result
    }

    fn pull(&mut self) -> WorkResult<()> {
        let emission = self.input.recv()?;
        let OutputPayload::Packet(data) = emission.payload else {
            trace!(
                "Decoder '{}' ignoring non-packet emission on '{}'",
                self.decoder.info().id,
                emission.name
            );
            return Ok(());
        };

        if let Some(last) = self.last_start
            && emission.start < last
        {
            warn!(
                "Decoder '{}': packet from '{}' starts at {}, before previous packet at {}",
                self.decoder.info().id,
                emission.name,
                emission.start,
                last
            );
        }
        self.last_start = Some(emission.start);
        self.consumed += 1;

        let packet = Packet {
            start: emission.start,
            end: emission.end,
            data,
        };
        self.decoder.decode_step(packet, &mut self.outputs)
    }

    /// Close all outputs. Idempotent.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.outputs.close();
        info!("Session finished: {}", self.summary());
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            decoder: self.decoder.info().id,
            consumed: self.consumed,
            steps: self.steps,
            emissions: self.outputs.counts(),
        }
    }

    /// Step until the upstream ends
    pub fn run(mut self) -> Result<SessionSummary, SessionError> {
        while into_session_result(self.step())? {}
        Ok(self.summary())
    }
}

impl<D: StackedDecoder> ProcessNode for StackedSession<D> {
    fn name(&self) -> &str {
        self.decoder.info().id
    }

    fn should_stop(&self) -> bool {
        self.finished
    }

    fn work(&mut self) -> WorkResult<usize> {
        self.step().map(|()| 1)
    }

    fn finish(&mut self) {
        StackedSession::finish(self);
    }
}
