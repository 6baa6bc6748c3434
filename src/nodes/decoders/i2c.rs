//! I²C decoder
//!
//! Signal-level decoder over SCL/SDA. START and STOP are SDA transitions
//! while SCL is high; data bits are sampled on SCL rising edges, MSB first,
//! eight per byte followed by an ACK bit.
//!
//! Every event is annotated and also emitted as an [`I2cPacket`] on the
//! `"i2c"` packet stream for stacked decoders.

use crate::runtime::{
    AnnotationClass, AnnotationRow, ChannelSpec, Condition, Decoder, DecoderInfo, LogicDecoder,
    LogicInput, OptionSpec, OptionValue, OutputKind, Outputs, Predicate, SessionError,
    StartContext, StreamId, WorkError, WorkResult,
};
use tracing::{debug, trace, warn};

const SCL: usize = 0;
const SDA: usize = 1;

/// One I²C bus event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cPacket {
    Start,
    StartRepeat,
    Stop,
    Ack,
    Nack,
    /// Slave address of a read transfer
    AddressRead(u8),
    /// Slave address of a write transfer
    AddressWrite(u8),
    DataRead(u8),
    DataWrite(u8),
}

const ANN_START: usize = 0;
const ANN_REPEAT_START: usize = 1;
const ANN_STOP: usize = 2;
const ANN_ACK: usize = 3;
const ANN_NACK: usize = 4;
const ANN_BIT: usize = 5;
const ANN_ADDRESS_READ: usize = 6;
const ANN_ADDRESS_WRITE: usize = 7;
const ANN_DATA_READ: usize = 8;
const ANN_DATA_WRITE: usize = 9;
const ANN_WARNING: usize = 10;

static INFO: DecoderInfo = DecoderInfo {
    id: "i2c",
    name: "I²C",
    longname: "Inter-Integrated Circuit",
    desc: "Two-wire, multi-master, serial bus.",
    inputs: &["logic"],
    outputs: &["i2c"],
    channels: &[
        ChannelSpec::new("scl", "SCL", "Serial clock line"),
        ChannelSpec::new("sda", "SDA", "Serial data line"),
    ],
    optional_channels: &[],
    options: &[OptionSpec {
        id: "address_format",
        desc: "Displayed slave address format",
        default: OptionValue::str("shifted"),
        values: &[OptionValue::str("shifted"), OptionValue::str("unshifted")],
    }],
    annotations: &[
        AnnotationClass::new("start", "Start condition"),
        AnnotationClass::new("repeat-start", "Repeat start condition"),
        AnnotationClass::new("stop", "Stop condition"),
        AnnotationClass::new("ack", "ACK"),
        AnnotationClass::new("nack", "NACK"),
        AnnotationClass::new("bit", "Data/address bit"),
        AnnotationClass::new("address-read", "Address read"),
        AnnotationClass::new("address-write", "Address write"),
        AnnotationClass::new("data-read", "Data read"),
        AnnotationClass::new("data-write", "Data write"),
        AnnotationClass::new("warning", "Warning"),
    ],
    annotation_rows: &[
        AnnotationRow {
            id: "bits",
            desc: "Bits",
            classes: &[ANN_BIT],
        },
        AnnotationRow {
            id: "addr-data",
            desc: "Address/data",
            classes: &[
                ANN_START,
                ANN_REPEAT_START,
                ANN_STOP,
                ANN_ACK,
                ANN_NACK,
                ANN_ADDRESS_READ,
                ANN_ADDRESS_WRITE,
                ANN_DATA_READ,
                ANN_DATA_WRITE,
            ],
        },
        AnnotationRow {
            id: "warnings",
            desc: "Warnings",
            classes: &[ANN_WARNING],
        },
    ],
    binary: &[],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FindStart,
    FindAddress,
    FindData,
    FindAck,
}

#[derive(Debug, Clone, Copy)]
struct Streams {
    annotations: StreamId,
    packets: StreamId,
}

/// Signal-level I²C decoder
pub struct I2c {
    state: State,
    /// Show the 7-bit address without the R/W bit
    shifted: bool,
    is_read: bool,
    /// (level, sample) of each bit of the byte being received
    bits: Vec<(bool, u64)>,
    /// Width of the last bit, reused for the ACK bit
    bit_width: u64,
    streams: Option<Streams>,
}

impl I2c {
    pub fn new() -> Self {
        Self {
            state: State::FindStart,
            shifted: true,
            is_read: false,
            bits: Vec::with_capacity(8),
            bit_width: 1,
            streams: None,
        }
    }

    fn start_condition() -> Condition {
        Condition::high(SCL).and(SDA, Predicate::Falling)
    }

    fn stop_condition() -> Condition {
        Condition::high(SCL).and(SDA, Predicate::Rising)
    }

    fn put(out: &mut Outputs<I2cPacket>, s: Streams, start: u64, end: u64, packet: I2cPacket, class: usize, texts: &[String]) {
        out.annotate(s.annotations, start, end, class, texts);
        out.put_packet(s.packets, start, end, packet);
    }

    /// One SCL rise precedes every STOP and repeated START; anything longer
    /// is a byte cut short.
    fn drop_partial_byte(&mut self, out: &mut Outputs<I2cPacket>, s: Streams, sample: u64) {
        if self.bits.len() > 1 {
            let first = self.bits[0].1;
            warn!(
                "I2C: byte interrupted after {} bits at sample {}",
                self.bits.len(),
                sample
            );
            out.annotate(
                s.annotations,
                first,
                sample,
                ANN_WARNING,
                &["Incomplete byte, resynchronising", "Incomplete byte", "!"],
            );
        }
        self.bits.clear();
    }

    fn handle_start(&mut self, out: &mut Outputs<I2cPacket>, s: Streams, sample: u64) {
        let repeated = self.state != State::FindStart;
        self.drop_partial_byte(out, s, sample);
        if repeated {
            Self::put(out, s, sample, sample, I2cPacket::StartRepeat, ANN_REPEAT_START, &["Start repeat".into(), "Sr".into()]);
        } else {
            Self::put(out, s, sample, sample, I2cPacket::Start, ANN_START, &["Start".into(), "S".into()]);
        }
        debug!("I2C: {} at {}", if repeated { "repeated START" } else { "START" }, sample);
        self.state = State::FindAddress;
    }

    fn handle_stop(&mut self, out: &mut Outputs<I2cPacket>, s: Streams, sample: u64) {
        self.drop_partial_byte(out, s, sample);
        Self::put(out, s, sample, sample, I2cPacket::Stop, ANN_STOP, &["Stop".into(), "P".into()]);
        debug!("I2C: STOP at {}", sample);
        self.state = State::FindStart;
        self.is_read = false;
    }

    fn handle_bit(&mut self, out: &mut Outputs<I2cPacket>, s: Streams, level: bool, sample: u64) {
        self.bits.push((level, sample));
        trace!("I2C: bit {} = {} at {}", self.bits.len() - 1, level as u8, sample);
        if self.bits.len() < 8 {
            return;
        }

        let last = self.bits[7].1;
        self.bit_width = (last - self.bits[6].1).max(1);
        let byte_end = last + self.bit_width;
        let byte = self
            .bits
            .iter()
            .fold(0u8, |acc, &(bit, _)| (acc << 1) | bit as u8);

        for (i, &(bit, start)) in self.bits.iter().enumerate() {
            let end = self.bits.get(i + 1).map_or(byte_end, |&(_, next)| next);
            out.annotate(s.annotations, start, end, ANN_BIT, &[(bit as u8).to_string()]);
        }

        let first = self.bits[0].1;
        let (packet, class, texts) = if self.state == State::FindAddress {
            self.is_read = byte & 1 == 1;
            let address = if self.shifted { byte >> 1 } else { byte };
            if self.is_read {
                (
                    I2cPacket::AddressRead(address),
                    ANN_ADDRESS_READ,
                    [format!("Address read: {:02X}", address), format!("AR: {:02X}", address), format!("{:02X}", address)],
                )
            } else {
                (
                    I2cPacket::AddressWrite(address),
                    ANN_ADDRESS_WRITE,
                    [format!("Address write: {:02X}", address), format!("AW: {:02X}", address), format!("{:02X}", address)],
                )
            }
        } else if self.is_read {
            (
                I2cPacket::DataRead(byte),
                ANN_DATA_READ,
                [format!("Data read: {:02X}", byte), format!("DR: {:02X}", byte), format!("{:02X}", byte)],
            )
        } else {
            (
                I2cPacket::DataWrite(byte),
                ANN_DATA_WRITE,
                [format!("Data write: {:02X}", byte), format!("DW: {:02X}", byte), format!("{:02X}", byte)],
            )
        };
        Self::put(out, s, first, byte_end, packet, class, &texts);

        self.bits.clear();
        self.state = State::FindAck;
    }

    fn handle_ack(&mut self, out: &mut Outputs<I2cPacket>, s: Streams, level: bool, sample: u64) {
        let end = sample + self.bit_width;
        if level {
            Self::put(out, s, sample, end, I2cPacket::Nack, ANN_NACK, &["NACK".into(), "N".into()]);
        } else {
            Self::put(out, s, sample, end, I2cPacket::Ack, ANN_ACK, &["ACK".into(), "A".into()]);
        }
        self.state = State::FindData;
    }
}

impl Default for I2c {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for I2c {
    type Packet = I2cPacket;

    fn info(&self) -> &'static DecoderInfo {
        &INFO
    }

    fn start(&mut self, ctx: &mut StartContext<'_, I2cPacket>) -> Result<(), SessionError> {
        self.shifted = ctx.options.str("address_format")? == "shifted";
        self.streams = Some(Streams {
            annotations: ctx.register(OutputKind::Annotation, "annotations")?,
            packets: ctx.register(OutputKind::Packet, "i2c")?,
        });
        Ok(())
    }

    fn reset(&mut self) {
        self.state = State::FindStart;
        self.is_read = false;
        self.bits.clear();
    }
}

impl LogicDecoder for I2c {
    fn decode_step(
        &mut self,
        input: &mut LogicInput<'_>,
        out: &mut Outputs<I2cPacket>,
    ) -> WorkResult<()> {
        let s = self
            .streams
            .ok_or_else(|| WorkError::Contract("i2c: decode before start".into()))?;

        if self.state == State::FindStart {
            let r = input.wait(&[Self::start_condition()])?;
            self.handle_start(out, s, r.sample);
            return Ok(());
        }

        let r = input.wait(&[
            Self::start_condition(),
            Self::stop_condition(),
            Condition::rising(SCL),
        ])?;
        if r.matched(0) {
            self.handle_start(out, s, r.sample);
        } else if r.matched(1) {
            self.handle_stop(out, s, r.sample);
        } else {
            let level = r.levels.high(SDA);
            match self.state {
                State::FindAck => self.handle_ack(out, s, level, r.sample),
                _ => self.handle_bit(out, s, level, r.sample),
            }
        }
        Ok(())
    }
}
