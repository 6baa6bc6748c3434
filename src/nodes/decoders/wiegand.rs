//! Wiegand interface decoder
//!
//! A pulse on D0 is a 0 bit, a pulse on D1 a 1 bit. A word ends when no
//! pulse follows within the bit timeout. 26-bit words are checked for parity
//! and split into facility code and card number.

use crate::runtime::{
    AnnotationClass, AnnotationRow, ChannelSpec, Condition, Decoder, DecoderInfo, LogicDecoder,
    LogicInput, Metadata, OptionSpec, OptionValue, OutputKind, Outputs, SessionError,
    StartContext, StreamId, WorkError, WorkResult,
};
use tracing::{debug, trace, warn};

const D0: usize = 0;
const D1: usize = 1;

const ANN_BIT: usize = 0;
const ANN_WORD: usize = 1;
const ANN_FACILITY: usize = 2;
const ANN_CARD: usize = 3;
const ANN_WARNING: usize = 4;

static INFO: DecoderInfo = DecoderInfo {
    id: "wiegand",
    name: "Wiegand",
    longname: "Wiegand interface",
    desc: "Wiegand interface for electronic entry systems.",
    inputs: &["logic"],
    outputs: &[],
    channels: &[
        ChannelSpec::new("d0", "D0", "Data 0 line"),
        ChannelSpec::new("d1", "D1", "Data 1 line"),
    ],
    optional_channels: &[],
    options: &[
        OptionSpec {
            id: "active",
            desc: "Data lines active level",
            default: OptionValue::str("low"),
            values: &[OptionValue::str("low"), OptionValue::str("high")],
        },
        OptionSpec {
            id: "bitwidth_ms",
            desc: "Single bit width in milliseconds",
            default: OptionValue::Int(4),
            values: &[
                OptionValue::Int(1),
                OptionValue::Int(2),
                OptionValue::Int(4),
                OptionValue::Int(8),
                OptionValue::Int(16),
                OptionValue::Int(32),
            ],
        },
    ],
    annotations: &[
        AnnotationClass::new("bit", "Bit"),
        AnnotationClass::new("word", "Word"),
        AnnotationClass::new("facility", "Facility code"),
        AnnotationClass::new("card", "Card number"),
        AnnotationClass::new("warning", "Warning"),
    ],
    annotation_rows: &[
        AnnotationRow {
            id: "bits",
            desc: "Bits",
            classes: &[ANN_BIT],
        },
        AnnotationRow {
            id: "fields",
            desc: "Fields",
            classes: &[ANN_WORD, ANN_FACILITY, ANN_CARD],
        },
        AnnotationRow {
            id: "warnings",
            desc: "Warnings",
            classes: &[ANN_WARNING],
        },
    ],
    binary: &[],
};

/// Interpret `bits` MSB first
fn value_of(bits: &[(bool, u64)]) -> u64 {
    bits.iter().fold(0, |acc, &(bit, _)| (acc << 1) | bit as u64)
}

fn ones(bits: &[(bool, u64)]) -> usize {
    bits.iter().filter(|(bit, _)| *bit).count()
}

/// Wiegand decoder
pub struct Wiegand {
    samplerate: Option<u64>,
    active_high: bool,
    /// Samples without a pulse that end a word
    timeout: u64,
    /// (value, sample) of each bit of the current word
    bits: Vec<(bool, u64)>,
    annotations: Option<StreamId>,
}

impl Wiegand {
    pub fn new() -> Self {
        Self {
            samplerate: None,
            active_high: false,
            timeout: 1,
            bits: Vec::new(),
            annotations: None,
        }
    }

    fn active_edge(&self, channel: usize) -> Condition {
        if self.active_high {
            Condition::rising(channel)
        } else {
            Condition::falling(channel)
        }
    }

    fn end_word(&mut self, out: &mut Outputs<()>, stream: StreamId, end: u64) {
        let bits = std::mem::take(&mut self.bits);
        let Some(&(_, first)) = bits.first() else {
            return;
        };

        for (i, &(bit, start)) in bits.iter().enumerate() {
            let stop = bits.get(i + 1).map_or(end, |&(_, next)| next);
            out.annotate(stream, start, stop, ANN_BIT, &[(bit as u8).to_string()]);
        }

        let bitstring: String = bits.iter().map(|&(b, _)| if b { '1' } else { '0' }).collect();
        let word = if bits.len() <= 64 {
            format!("Word: 0x{:X} ({} bits)", value_of(&bits), bits.len())
        } else {
            format!("Word: {} ({} bits)", bitstring, bits.len())
        };
        debug!("Wiegand: {} bits {}", bits.len(), bitstring);
        out.annotate(stream, first, end, ANN_WORD, &[word, bitstring]);

        if bits.len() == 26 {
            self.annotate_26bit(out, stream, &bits, end);
        }
    }

    /// Even parity over bits 0-12, odd parity over bits 13-25
    fn annotate_26bit(&self, out: &mut Outputs<()>, stream: StreamId, bits: &[(bool, u64)], end: u64) {
        let even_ok = ones(&bits[..13]) % 2 == 0;
        let odd_ok = ones(&bits[13..]) % 2 == 1;
        if !(even_ok && odd_ok) {
            let which = match (even_ok, odd_ok) {
                (false, false) => "leading and trailing",
                (false, true) => "leading",
                _ => "trailing",
            };
            warn!("Wiegand: {} parity error in word at {}", which, bits[0].1);
            out.annotate(
                stream,
                bits[0].1,
                end,
                ANN_WARNING,
                &[format!("Parity error ({})", which), "Parity error".to_string()],
            );
        }

        let facility = value_of(&bits[1..9]);
        let card = value_of(&bits[9..25]);
        out.annotate(
            stream,
            bits[1].1,
            bits[9].1,
            ANN_FACILITY,
            &[format!("Facility: {}", facility), format!("F: {}", facility)],
        );
        out.annotate(
            stream,
            bits[9].1,
            bits[25].1,
            ANN_CARD,
            &[format!("Card: {}", card), format!("C: {}", card)],
        );
    }
}

impl Default for Wiegand {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Wiegand {
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
        let samplerate = self
            .samplerate
            .ok_or_else(|| SessionError::MissingSamplerate(INFO.id.to_string()))?;
        let bitwidth_ms = ctx.options.int("bitwidth_ms")? as u64;
        self.active_high = ctx.options.str("active")? == "high";
        self.timeout = (samplerate * bitwidth_ms / 1000).max(1);
        self.annotations = Some(ctx.register(OutputKind::Annotation, "annotations")?);
        debug!("Wiegand: word timeout {} samples", self.timeout);
        Ok(())
    }

    fn reset(&mut self) {
        self.bits.clear();
    }
}

impl LogicDecoder for Wiegand {
    fn decode_step(&mut self, input: &mut LogicInput<'_>, out: &mut Outputs<()>) -> WorkResult<()> {
        let stream = self
            .annotations
            .ok_or_else(|| WorkError::Contract("wiegand: decode before start".into()))?;

        let pulses = [self.active_edge(D0), self.active_edge(D1)];
        let r = if self.bits.is_empty() {
            input.wait(&pulses)?
        } else {
            let [d0, d1] = pulses;
            input.wait(&[d0, d1, Condition::skip(self.timeout)])?
        };

        if !r.matched(0) && !r.matched(1) {
            self.end_word(out, stream, r.sample);
            return Ok(());
        }

        let active = |ch: usize| r.levels.get(ch) == Some(self.active_high);
        if active(D0) && active(D1) {
            warn!("Wiegand: D0 and D1 both active at {}, dropping word", r.sample);
            let from = self.bits.first().map_or(r.sample, |&(_, s)| s);
            out.annotate(
                stream,
                from,
                r.sample,
                ANN_WARNING,
                &["Both lines active, resynchronising", "Framing error", "!"],
            );
            self.reset();
            return Ok(());
        }

        let bit = r.matched(1);
        trace!("Wiegand: bit {} = {} at {}", self.bits.len(), bit as u8, r.sample);
        self.bits.push((bit, r.sample));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{
        ChunkSource, Emission, LogicSession, SessionConfig, SignalBuilder, StreamFilter,
    };

    /// 1 ms timeout is 20 samples
    const SAMPLERATE: u64 = 20_000;

    /// Active-low bus, one pulse every 10 samples
    struct Reader {
        signal: SignalBuilder,
    }

    impl Reader {
        fn new() -> Self {
            let mut signal = SignalBuilder::new(2);
            signal.set(D0, true).set(D1, true).hold(10);
            Self { signal }
        }

        fn pulse(&mut self, d0: bool, d1: bool) -> &mut Self {
            self.signal.set(D0, !d0).set(D1, !d1).hold(2);
            self.signal.set(D0, true).set(D1, true).hold(8);
            self
        }

        fn bits(&mut self, bits: &[bool]) -> &mut Self {
            for &bit in bits {
                self.pulse(!bit, bit);
            }
            self
        }

        fn idle(&mut self) -> &mut Self {
            self.signal.hold(40);
            self
        }
    }

    /// 26-bit word with correct parity
    fn word26(facility: u8, card: u16) -> Vec<bool> {
        let mut bits = vec![false];
        bits.extend((0..8).rev().map(|i| (facility >> i) & 1 == 1));
        bits.extend((0..16).rev().map(|i| (card >> i) & 1 == 1));
        bits.push(false);
        bits[0] = bits[1..13].iter().filter(|b| **b).count() % 2 == 1;
        bits[25] = bits[13..25].iter().filter(|b| **b).count() % 2 == 0;
        bits
    }

    fn decode(reader: &Reader) -> Vec<Emission<()>> {
        let source = Box::new(ChunkSource::from_signal(&reader.signal, 64));
        let config = SessionConfig::new()
            .channel("d0", 0)
            .channel("d1", 1)
            .with_samplerate(SAMPLERATE)
            .option("bitwidth_ms", 1i64);
        let mut session = LogicSession::new(Wiegand::new(), &config, source).unwrap();
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
    fn test_26bit_word() {
        let mut reader = Reader::new();
        reader.bits(&word26(18, 4660)).idle();
        let emissions = decode(&reader);

        assert_eq!(texts(&emissions, ANN_BIT).len(), 26);
        assert_eq!(texts(&emissions, ANN_FACILITY), vec!["Facility: 18"]);
        assert_eq!(texts(&emissions, ANN_CARD), vec!["Card: 4660"]);
        assert!(texts(&emissions, ANN_WARNING).is_empty());
    }

    #[test]
    fn test_parity_error_keeps_fields() {
        let mut bits = word26(1, 2);
        bits[25] = !bits[25];
        let mut reader = Reader::new();
        reader.bits(&bits).idle();
        let emissions = decode(&reader);

        assert_eq!(texts(&emissions, ANN_WARNING), vec!["Parity error (trailing)"]);
        assert_eq!(texts(&emissions, ANN_CARD), vec!["Card: 2"]);
    }

    #[test]
    fn test_leading_parity_error() {
        let mut bits = word26(18, 4660);
        bits[0] = !bits[0];
        let mut reader = Reader::new();
        reader.bits(&bits).idle();
        let emissions = decode(&reader);

        assert_eq!(texts(&emissions, ANN_WARNING), vec!["Parity error (leading)"]);
        assert_eq!(texts(&emissions, ANN_FACILITY), vec!["Facility: 18"]);
    }

    #[test]
    fn test_both_parities_wrong() {
        let mut bits = word26(18, 4660);
        bits[0] = !bits[0];
        bits[25] = !bits[25];
        let mut reader = Reader::new();
        reader.bits(&bits).idle();
        let emissions = decode(&reader);

        assert_eq!(
            texts(&emissions, ANN_WARNING),
            vec!["Parity error (leading and trailing)"]
        );
        assert_eq!(texts(&emissions, ANN_FACILITY), vec!["Facility: 18"]);
        assert_eq!(texts(&emissions, ANN_CARD), vec!["Card: 4660"]);
    }

    #[test]
    fn test_short_word() {
        let mut reader = Reader::new();
        reader.bits(&[true, false, true, true]).idle();
        let emissions = decode(&reader);
        assert_eq!(texts(&emissions, ANN_WORD), vec!["Word: 0xB (4 bits)"]);
        assert!(texts(&emissions, ANN_CARD).is_empty());
    }

    #[test]
    fn test_both_lines_resynchronise() {
        let mut reader = Reader::new();
        reader
            .bits(&[true, false, true, false, true])
            .pulse(true, true)
            .idle()
            .bits(&word26(7, 99))
            .idle();
        let emissions = decode(&reader);

        assert_eq!(texts(&emissions, ANN_WARNING).len(), 1);
        assert_eq!(texts(&emissions, ANN_WORD).len(), 1);
        assert_eq!(texts(&emissions, ANN_CARD), vec!["Card: 99"]);
    }

    #[test]
    fn test_samplerate_required() {
        let reader = Reader::new();
        let source = Box::new(ChunkSource::from_signal(&reader.signal, 64));
        let config = SessionConfig::new().channel("d0", 0).channel("d1", 1);
        let err = LogicSession::new(Wiegand::new(), &config, source).err().unwrap();
        assert!(matches!(err, SessionError::MissingSamplerate(_)));
    }

    #[test]
    fn test_bitwidth_must_be_listed() {
        let reader = Reader::new();
        let source = Box::new(ChunkSource::from_signal(&reader.signal, 64));
        let config = SessionConfig::new()
            .channel("d0", 0)
            .channel("d1", 1)
            .with_samplerate(SAMPLERATE)
            .option("bitwidth_ms", 3i64);
        let err = LogicSession::new(Wiegand::new(), &config, source).err().unwrap();
        assert!(matches!(err, SessionError::InvalidOption { .. }));
    }
}
