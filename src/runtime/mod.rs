//! Generic decoding engine: cursor, wait engine, outputs, sessions

pub mod channels;
pub mod cursor;
pub mod decoder;
pub mod errors;
pub mod node;
pub mod options;
pub mod output;
pub mod receiver;
pub mod sample;
pub mod scheduler;
pub mod sender;
pub mod session;
pub mod source;
pub mod wait;

pub use channels::{ChannelBinding, ChannelSpec};
pub use cursor::SampleCursor;
pub use decoder::{
    AnnotationClass, AnnotationRow, Decoder, DecoderInfo, LogicDecoder, LogicInput, Packet,
    StackedDecoder, StartContext,
};
pub use errors::{SessionError, WorkError, WorkResult};
pub use node::ProcessNode;
pub use options::{Metadata, OptionSpec, OptionValue, Options, SessionConfig, parse_samplerate};
pub use output::{
    Annotation, Emission, OutputKind, OutputPayload, Outputs, StreamFilter, StreamId,
};
pub use receiver::Receiver;
pub use sample::{LogicChunk, SignalBuilder};
pub use scheduler::{NodeReport, Scheduler};
pub use sender::{ChannelMessage, Sender};
pub use session::{LogicSession, SessionSummary, StackedSession};
pub use source::{ChunkReceiver, ChunkSource, SampleSource, SourceNode};
pub use wait::{Condition, Levels, Predicate, Term, WaitResult, wait};
