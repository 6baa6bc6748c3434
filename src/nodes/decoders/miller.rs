//! Modified Miller decoder (ISO 14443-A, reader to card)
//!
//! Bits are recovered from the distance between consecutive pauses, measured
//! in unit times (`samplerate / baudrate`). The first pause of a frame is the
//! start of frame; a gap longer than 2.5 unit times ends it.

use crate::runtime::{
    AnnotationClass, AnnotationRow, ChannelSpec, Condition, Decoder, DecoderInfo, LogicDecoder,
    LogicInput, Metadata, OptionSpec, OptionValue, OutputKind, Outputs, SessionError,
    StartContext, StreamId, WorkError, WorkResult,
};
use tracing::{debug, trace, warn};

const DATA: usize = 0;

const ANN_BIT: usize = 0;
const ANN_SOF: usize = 1;
const ANN_BITSTRING: usize = 2;
const ANN_BYTE: usize = 3;
const ANN_FRAME_ERROR: usize = 4;

const BIN_RAW: usize = 0;

/// Accepted deviation from a nominal interval, in unit times
const TOLERANCE: f64 = 0.25;

static INFO: DecoderInfo = DecoderInfo {
    id: "miller",
    name: "Miller",
    longname: "Modified Miller encoding",
    desc: "Modified Miller encoding (ISO 14443-A reader to card).",
    inputs: &["logic"],
    outputs: &[],
    channels: &[ChannelSpec::new("data", "Data", "Data signal")],
    optional_channels: &[],
    options: &[
        OptionSpec {
            id: "baudrate",
            desc: "Baud rate",
            default: OptionValue::Int(106_000),
            values: &[],
        },
        OptionSpec {
            id: "edge",
            desc: "Edge marking a pause",
            default: OptionValue::str("falling"),
            values: &[OptionValue::str("falling"), OptionValue::str("rising")],
        },
    ],
    annotations: &[
        AnnotationClass::new("bit", "Bit"),
        AnnotationClass::new("sof", "Start of frame"),
        AnnotationClass::new("bitstring", "Bit string"),
        AnnotationClass::new("byte", "Byte"),
        AnnotationClass::new("frame-error", "Frame error"),
    ],
    annotation_rows: &[
        AnnotationRow {
            id: "bits",
            desc: "Bits",
            classes: &[ANN_BIT, ANN_SOF],
        },
        AnnotationRow {
            id: "bitstrings",
            desc: "Bit strings",
            classes: &[ANN_BITSTRING],
        },
        AnnotationRow {
            id: "bytes",
            desc: "Bytes",
            classes: &[ANN_BYTE],
        },
        AnnotationRow {
            id: "errors",
            desc: "Errors",
            classes: &[ANN_FRAME_ERROR],
        },
    ],
    binary: &[AnnotationClass::new("raw", "Raw frame bytes")],
};

/// Distance between two pauses, in unit times
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interval {
    One,
    OneAndHalf,
    Two,
}

impl Interval {
    fn classify(ratio: f64) -> Option<Self> {
        [
            (1.0, Interval::One),
            (1.5, Interval::OneAndHalf),
            (2.0, Interval::Two),
        ]
        .into_iter()
        .find(|(nominal, _)| (ratio - nominal).abs() <= TOLERANCE)
        .map(|(_, interval)| interval)
    }
}

/// Bit period holding the last pause: at its start (Z) or its middle (X)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sequence {
    Z,
    X,
}

impl Sequence {
    /// Bits implied by the next pause, and the sequence it lands in
    fn next(self, interval: Interval) -> Option<(&'static [bool], Sequence)> {
        match (self, interval) {
            (Sequence::Z, Interval::One) => Some((&[false], Sequence::Z)),
            (Sequence::Z, Interval::OneAndHalf) => Some((&[true], Sequence::X)),
            (Sequence::Z, Interval::Two) => None,
            (Sequence::X, Interval::One) => Some((&[true], Sequence::X)),
            (Sequence::X, Interval::OneAndHalf) => Some((&[false, false], Sequence::Z)),
            (Sequence::X, Interval::Two) => Some((&[false, true], Sequence::X)),
        }
    }
}

struct Frame {
    /// Sample of the start-of-frame pause
    start: u64,
    last_edge: u64,
    sequence: Sequence,
    bits: Vec<bool>,
}

#[derive(Debug, Clone, Copy)]
struct Streams {
    annotations: StreamId,
    binary: StreamId,
}

/// Modified Miller decoder
pub struct Miller {
    samplerate: Option<u64>,
    /// Samples per bit
    unit: f64,
    pause: Condition,
    frame: Option<Frame>,
    streams: Option<Streams>,
}

impl Miller {
    pub fn new() -> Self {
        Self {
            samplerate: None,
            unit: 1.0,
            pause: Condition::falling(DATA),
            frame: None,
            streams: None,
        }
    }

    fn timeout(&self) -> u64 {
        ((2.5 * self.unit).round() as u64).max(1)
    }

    /// Sample where bit `index` of a frame starting at `start` begins
    fn bit_start(&self, start: u64, index: usize) -> u64 {
        start + ((index + 1) as f64 * self.unit).round() as u64
    }

    fn start_frame(&mut self, out: &mut Outputs<()>, s: Streams, sample: u64) {
        trace!("Miller: start of frame at {}", sample);
        let end = self.bit_start(sample, 0);
        out.annotate(s.annotations, sample, end, ANN_SOF, &["Start of frame", "SOF", "S"]);
        self.frame = Some(Frame {
            start: sample,
            last_edge: sample,
            sequence: Sequence::Z,
            bits: Vec::new(),
        });
    }

    fn end_frame(&mut self, out: &mut Outputs<()>, s: Streams) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        if frame.bits.is_empty() {
            debug!("Miller: frame at {} without data bits", frame.start);
            return;
        }

        let starts: Vec<u64> = (0..=frame.bits.len())
            .map(|i| self.bit_start(frame.start, i))
            .collect();
        for (i, &bit) in frame.bits.iter().enumerate() {
            out.annotate(
                s.annotations,
                starts[i],
                starts[i + 1],
                ANN_BIT,
                &[(bit as u8).to_string()],
            );
        }

        let first = starts[0];
        let last = starts[frame.bits.len()];
        let bitstring: String = frame.bits.iter().map(|&b| if b { '1' } else { '0' }).collect();
        out.annotate(s.annotations, first, last, ANN_BITSTRING, &[bitstring.as_str()]);

        // LSB first; a trailing partial byte is kept
        let mut bytes = Vec::with_capacity(frame.bits.len().div_ceil(8));
        for (n, chunk) in frame.bits.chunks(8).enumerate() {
            let byte = chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &bit)| acc | ((bit as u8) << i));
            let from = starts[n * 8];
            let to = starts[n * 8 + chunk.len()];
            out.annotate(
                s.annotations,
                from,
                to,
                ANN_BYTE,
                &[format!("0x{:02X}", byte), format!("{:02X}", byte)],
            );
            bytes.push(byte);
        }
        debug!("Miller: frame of {} bits, {:02X?}", frame.bits.len(), bytes);
        out.put_binary(s.binary, first, last, BIN_RAW, bytes);
    }

    fn handle_pause(&mut self, out: &mut Outputs<()>, s: Streams, sample: u64) {
        let Some(frame) = self.frame.as_mut() else {
            self.start_frame(out, s, sample);
            return;
        };
        let delta = sample - frame.last_edge;
        let ratio = delta as f64 / self.unit;
        let next = Interval::classify(ratio).and_then(|interval| frame.sequence.next(interval));
        match next {
            Some((bits, sequence)) => {
                trace!("Miller: {:.2} unit times, bits {:?}", ratio, bits);
                frame.bits.extend_from_slice(bits);
                frame.sequence = sequence;
                frame.last_edge = sample;
            }
            None => {
                warn!(
                    "Miller: frame error, {} samples ({:.2} unit times) at {}",
                    delta, ratio, sample
                );
                out.annotate(
                    s.annotations,
                    frame.last_edge,
                    sample,
                    ANN_FRAME_ERROR,
                    &["Frame error", "Error", "E"],
                );
                self.frame = None;
                self.start_frame(out, s, sample);
            }
        }
    }
}

impl Default for Miller {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Miller {
    type Packet = ();

    fn info(&self) -> &'static DecoderInfo {
        &INFO
    }

    fn metadata(&mut self, metadata: &Metadata) {
        match *metadata {
            Metadata::Samplerate(rate) => self.samplerate = Some(rate),
        }
    }

    fn start(&mut self, ctx: &mut StartContext<'_, ()>) -> Result<(), SessionError> {
        let baudrate = ctx.options.positive_float("baudrate")?;
        let samplerate = self
            .samplerate
            .ok_or_else(|| SessionError::MissingSamplerate(INFO.id.to_string()))?;
        self.unit = samplerate as f64 / baudrate;
        if self.unit < 1.0 {
            return Err(SessionError::OptionRange {
                decoder: INFO.id.to_string(),
                option: "baudrate".to_string(),
                reason: format!("{} Bd is faster than the {} Hz sample rate", baudrate, samplerate),
            });
        }
        self.pause = match ctx.options.str("edge")? {
            "rising" => Condition::rising(DATA),
            _ => Condition::falling(DATA),
        };
        self.streams = Some(Streams {
            annotations: ctx.register(OutputKind::Annotation, "annotations")?,
            binary: ctx.register(OutputKind::Binary, "raw")?,
        });
        debug!("Miller: {:.2} samples per bit", self.unit);
        Ok(())
    }

    fn reset(&mut self) {
        self.frame = None;
    }
}

impl LogicDecoder for Miller {
    fn decode_step(&mut self, input: &mut LogicInput<'_>, out: &mut Outputs<()>) -> WorkResult<()> {
        let s = self
            .streams
            .ok_or_else(|| WorkError::Contract("miller: decode before start".into()))?;

        if self.frame.is_none() {
            let r = input.wait(std::slice::from_ref(&self.pause))?;
            self.start_frame(out, s, r.sample);
            return Ok(());
        }

        let r = input.wait(&[self.pause.clone(), Condition::skip(self.timeout())])?;
        if r.matched(0) {
            self.handle_pause(out, s, r.sample);
        } else {
            self.end_frame(out, s);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{
        ChunkSource, Emission, LogicSession, SessionConfig, SignalBuilder, StreamFilter,
    };

    /// 10 samples per bit at the default baud rate
    const SAMPLERATE: u64 = 1_060_000;

    /// Idle-high signal with a 2-sample pause at every offset in `pauses`
    fn signal(pauses: &[usize]) -> SignalBuilder {
        let mut signal = SignalBuilder::new(1);
        let mut at = 0;
        for &pause in pauses {
            signal.set(DATA, true).hold(pause - at);
            signal.set(DATA, false).hold(2);
            at = pause + 2;
        }
        signal.set(DATA, true).hold(60);
        signal
    }

    fn decode(pauses: &[usize]) -> Vec<Emission<()>> {
        let source = Box::new(ChunkSource::from_signal(&signal(pauses), 32));
        let config = SessionConfig::new()
            .channel("data", 0)
            .with_samplerate(SAMPLERATE);
        let mut session = LogicSession::new(Miller::new(), &config, source).unwrap();
        let rx = session.subscribe(StreamFilter::All);
        session.run().unwrap();
        rx.collect()
    }

    fn texts(emissions: &[Emission<()>], class: usize) -> Vec<String> {
        emissions
            .iter()
            .filter_map(|e| e.annotation())
            .filter(|a| a.class == class)
            .map(|a| a.text().to_string())
            .collect()
    }

    #[test]
    fn test_classify() {
        assert_eq!(Interval::classify(1.2), Some(Interval::One));
        assert_eq!(Interval::classify(1.6), Some(Interval::OneAndHalf));
        assert_eq!(Interval::classify(2.25), Some(Interval::Two));
        assert_eq!(Interval::classify(2.4), None);
        assert_eq!(Interval::classify(0.5), None);
    }

    #[test]
    fn test_unit_multiples() {
        // SOF, then 1.0, 1.5 and 2.0 unit times
        let emissions = decode(&[20, 30, 45, 65]);

        assert_eq!(texts(&emissions, ANN_SOF).len(), 1);
        assert_eq!(texts(&emissions, ANN_BIT), vec!["0", "1", "0", "1"]);
        assert_eq!(texts(&emissions, ANN_BITSTRING), vec!["0101"]);
        assert_eq!(texts(&emissions, ANN_BYTE), vec!["0x0A"]);
        assert!(texts(&emissions, ANN_FRAME_ERROR).is_empty());

        let raw: Vec<&Emission<()>> = emissions
            .iter()
            .filter(|e| e.payload.kind() == OutputKind::Binary)
            .collect();
        assert_eq!(raw.len(), 1);
        assert_eq!((raw[0].start, raw[0].end), (30, 70));
    }

    #[test]
    fn test_frame_error_resynchronises() {
        // 2.0 unit times straight after SOF is not a valid sequence
        let emissions = decode(&[20, 40, 50]);
        assert_eq!(texts(&emissions, ANN_FRAME_ERROR), vec!["Frame error"]);
        assert_eq!(texts(&emissions, ANN_SOF).len(), 2);
        assert_eq!(texts(&emissions, ANN_BITSTRING), vec!["0"]);
    }

    #[test]
    fn test_two_frames() {
        let emissions = decode(&[10, 20, 100, 115]);
        assert_eq!(texts(&emissions, ANN_BITSTRING), vec!["0", "1"]);
    }

    #[test]
    fn test_samplerate_required() {
        let source = Box::new(ChunkSource::from_signal(&signal(&[10]), 32));
        let config = SessionConfig::new().channel("data", 0);
        let err = LogicSession::new(Miller::new(), &config, source).err().unwrap();
        assert!(matches!(err, SessionError::MissingSamplerate(_)));
    }

    #[test]
    fn test_baudrate_must_be_positive() {
        let source = Box::new(ChunkSource::from_signal(&signal(&[10]), 32));
        let config = SessionConfig::new()
            .channel("data", 0)
            .with_samplerate(SAMPLERATE)
            .option("baudrate", 0i64);
        let err = LogicSession::new(Miller::new(), &config, source).err().unwrap();
        assert!(matches!(err, SessionError::OptionRange { .. }));
    }
}
