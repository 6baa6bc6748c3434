//! Logic-analyzer protocol decoding engine
//!
//! This library runs protocol decoders over sampled digital captures and over
//! the packet streams of other decoders.
//!
//! # Architecture
//!
//! - **SampleCursor / wait**: forward-only cursor over captured samples and the
//!   edge-wait engine every signal-level decoder suspends on
//! - **Outputs**: annotation, packet and binary streams with filtered,
//!   unbounded subscriber queues
//! - **Sessions**: fatal configuration checks up front, then a decode loop
//!   that ends at end-of-stream
//! - **Scheduler**: optional thread-per-session execution of stacked chains
//! - **Decoders**: I²C, I²C demultiplexer, DS1307 RTC, Modified Miller and
//!   Wiegand
//!
//! # Example
//!
//! ```no_run
//! use sigdecode::{DslCapture, I2c, LogicSession, SessionConfig, StreamFilter};
//!
//! let capture = DslCapture::open("capture.dsl")?;
//! let config = SessionConfig::new()
//!     .channel("scl", 0)
//!     .channel("sda", 1)
//!     .with_samplerate(capture.samplerate());
//! let mut session = LogicSession::new(I2c::new(), &config, Box::new(capture))?;
//! let annotations = session.subscribe(StreamFilter::All);
//! let summary = session.run()?;
//! for emission in annotations {
//!     println!("{}", emission);
//! }
//! println!("{}", summary);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use thiserror::Error;

pub mod nodes;
pub mod runtime;

// Re-export capture loading
pub use nodes::{DslCapture, DslHeader};

// Re-export reference decoders
pub use nodes::decoders::{Ds1307, I2c, I2cDemux, I2cPacket, Miller, Wiegand};

// Re-export the engine surface
pub use runtime::{
    Condition, Decoder, DecoderInfo, Emission, LogicDecoder, LogicSession, Metadata, OutputKind,
    Outputs, Packet, ProcessNode, Scheduler, SessionConfig, SessionError, SessionSummary,
    StackedDecoder, StackedSession, StreamFilter, WorkError, WorkResult,
};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Header parsing error: {0}")]
    ParseHeader(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid probe number: {0}")]
    InvalidProbe(usize),

    #[error("Invalid block number: {0}")]
    InvalidBlock(u64),

    #[error("Samples not contiguous: expected chunk at {expected}, got {got}")]
    Discontinuity { expected: u64, got: u64 },

    #[error("Chunk has {got} lines, capture has {expected}")]
    LineCount { expected: usize, got: usize },
}
