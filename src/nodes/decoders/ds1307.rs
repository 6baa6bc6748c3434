//! DS1307 real-time clock decoder
//!
//! Stacked on [`I2c`](super::I2c). Follows register pointer writes and the
//! register reads/writes that follow them, annotating each register field.
//! A complete date/time (registers 0x00-0x06 in one transaction) is also
//! annotated as a whole at STOP.

use super::i2c::I2cPacket;
use crate::runtime::{
    AnnotationClass, AnnotationRow, Decoder, DecoderInfo, OutputKind, Outputs, Packet,
    SessionError, StackedDecoder, StartContext, StreamId, WorkError, WorkResult,
};
use tracing::{debug, trace};

/// 7-bit slave address of the DS1307
pub const DS1307_ADDRESS: u8 = 0x68;

const ANN_SECONDS: usize = 0;
const ANN_MINUTES: usize = 1;
const ANN_HOURS: usize = 2;
const ANN_DAY: usize = 3;
const ANN_DATE: usize = 4;
const ANN_MONTH: usize = 5;
const ANN_YEAR: usize = 6;
const ANN_CONTROL: usize = 7;
const ANN_RAM: usize = 8;
const ANN_READ_DATETIME: usize = 9;
const ANN_WRITE_DATETIME: usize = 10;
const ANN_WARNING: usize = 11;

static INFO: DecoderInfo = DecoderInfo {
    id: "rtc_ds1307",
    name: "DS1307",
    longname: "Dallas DS1307",
    desc: "Dallas DS1307 real-time clock.",
    inputs: &["i2c"],
    outputs: &[],
    channels: &[],
    optional_channels: &[],
    options: &[],
    annotations: &[
        AnnotationClass::new("seconds", "Seconds"),
        AnnotationClass::new("minutes", "Minutes"),
        AnnotationClass::new("hours", "Hours"),
        AnnotationClass::new("day", "Day of week"),
        AnnotationClass::new("date", "Date"),
        AnnotationClass::new("month", "Month"),
        AnnotationClass::new("year", "Year"),
        AnnotationClass::new("control", "Control register"),
        AnnotationClass::new("ram", "RAM"),
        AnnotationClass::new("read-datetime", "Read date/time"),
        AnnotationClass::new("write-datetime", "Write date/time"),
        AnnotationClass::new("warning", "Warning"),
    ],
    annotation_rows: &[
        AnnotationRow {
            id: "regs",
            desc: "Registers",
            classes: &[
                ANN_SECONDS,
                ANN_MINUTES,
                ANN_HOURS,
                ANN_DAY,
                ANN_DATE,
                ANN_MONTH,
                ANN_YEAR,
                ANN_CONTROL,
                ANN_RAM,
            ],
        },
        AnnotationRow {
            id: "date-time",
            desc: "Date/time",
            classes: &[ANN_READ_DATETIME, ANN_WRITE_DATETIME],
        },
        AnnotationRow {
            id: "warnings",
            desc: "Warnings",
            classes: &[ANN_WARNING],
        },
    ],
    binary: &[],
};

const DAYS_OF_WEEK: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const RATES: [&str; 4] = ["1Hz", "4096Hz", "8192Hz", "32768Hz"];

fn bcd2int(b: u8) -> Option<u8> {
    let (hi, lo) = (b >> 4, b & 0x0f);
    (hi <= 9 && lo <= 9).then_some(hi * 10 + lo)
}

/// Decoded register value
struct Field {
    class: usize,
    texts: Vec<String>,
}

impl Field {
    fn new(class: usize, long: String, short: String) -> Self {
        Self {
            class,
            texts: vec![long, short],
        }
    }
}

/// Register handler: decodes one byte and records date/time fields
type Handler = fn(&mut Ds1307, u8) -> Field;

/// Handlers for registers 0x00-0x07; 0x08-0x3f are battery-backed RAM
static REGISTERS: [(u8, Handler); 8] = [
    (0x00, Ds1307::handle_seconds),
    (0x01, Ds1307::handle_minutes),
    (0x02, Ds1307::handle_hours),
    (0x03, Ds1307::handle_day),
    (0x04, Ds1307::handle_date),
    (0x05, Ds1307::handle_month),
    (0x06, Ds1307::handle_year),
    (0x07, Ds1307::handle_control),
];

const RAM: std::ops::RangeInclusive<u8> = 0x08..=0x3f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    GetSlaveAddr,
    GetRegAddr,
    WriteRegs,
    ReadRegs,
}

/// Date/time as seen in the registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateTime {
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub day: u8,
    pub date: u8,
    pub month: u8,
    pub year: u8,
}

/// DS1307 register decoder
pub struct Ds1307 {
    state: State,
    reg: u8,
    datetime: DateTime,
    /// Bitmask of date/time registers touched in this transaction
    touched: u8,
    transaction_start: u64,
    annotations: Option<StreamId>,
}

impl Ds1307 {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            reg: 0,
            datetime: DateTime::default(),
            touched: 0,
            transaction_start: 0,
            annotations: None,
        }
    }

    /// Date/time last read or written
    pub fn datetime(&self) -> DateTime {
        self.datetime
    }

    fn bcd_field(&mut self, b: u8, class: usize, name: &str, short: &str) -> (Field, u8) {
        match bcd2int(b) {
            Some(v) => (
                Field::new(class, format!("{}: {}", name, v), format!("{}: {}", short, v)),
                v,
            ),
            None => (
                Field::new(
                    ANN_WARNING,
                    format!("{}: invalid BCD 0x{:02X}", name, b),
                    "Invalid BCD".to_string(),
                ),
                0,
            ),
        }
    }

    fn handle_seconds(&mut self, b: u8) -> Field {
        let halted = b & 0x80 != 0;
        let (mut field, v) = self.bcd_field(b & 0x7f, ANN_SECONDS, "Second", "S");
        self.datetime.seconds = v;
        if halted {
            field.texts[0].push_str(" (clock halted)");
        }
        field
    }

    fn handle_minutes(&mut self, b: u8) -> Field {
        let (field, v) = self.bcd_field(b & 0x7f, ANN_MINUTES, "Minute", "M");
        self.datetime.minutes = v;
        field
    }

    fn handle_hours(&mut self, b: u8) -> Field {
        if b & 0x40 != 0 {
            let pm = b & 0x20 != 0;
            let (mut field, v) = self.bcd_field(b & 0x1f, ANN_HOURS, "Hour", "H");
            self.datetime.hours = match (v, pm) {
                (12, false) => 0,
                (12, true) => 12,
                (v, true) => v + 12,
                (v, false) => v,
            };
            field.texts[0].push_str(if pm { " PM" } else { " AM" });
            field
        } else {
            let (field, v) = self.bcd_field(b & 0x3f, ANN_HOURS, "Hour", "H");
            self.datetime.hours = v;
            field
        }
    }

    fn handle_day(&mut self, b: u8) -> Field {
        let day = b & 0x07;
        self.datetime.day = day;
        match day.checked_sub(1).and_then(|i| DAYS_OF_WEEK.get(i as usize)) {
            Some(name) => Field::new(ANN_DAY, format!("Day of week: {}", name), format!("DoW: {}", day)),
            None => Field::new(
                ANN_WARNING,
                format!("Day of week: invalid value {}", day),
                "Invalid day".to_string(),
            ),
        }
    }

    fn handle_date(&mut self, b: u8) -> Field {
        let (field, v) = self.bcd_field(b & 0x3f, ANN_DATE, "Day", "D");
        self.datetime.date = v;
        field
    }

    fn handle_month(&mut self, b: u8) -> Field {
        let (field, v) = self.bcd_field(b & 0x1f, ANN_MONTH, "Month", "Mon");
        self.datetime.month = v;
        field
    }

    fn handle_year(&mut self, b: u8) -> Field {
        let (field, v) = self.bcd_field(b, ANN_YEAR, "Year", "Y");
        self.datetime.year = v;
        field
    }

    fn handle_control(&mut self, b: u8) -> Field {
        let out = b >> 7;
        let sqwe = if b & 0x10 != 0 { "enabled" } else { "disabled" };
        let rate = RATES[(b & 0x03) as usize];
        Field::new(
            ANN_CONTROL,
            format!("Control: OUT={}, SQWE={}, RS={}", out, sqwe, rate),
            format!("Ctrl: 0x{:02X}", b),
        )
    }

    /// Decode one register byte and advance the register pointer
    fn handle_reg(&mut self, b: u8) -> Field {
        let reg = self.reg;
        let field = if let Some((_, handler)) = REGISTERS.iter().find(|(id, _)| *id == reg) {
            self.touched |= 1 << reg;
            handler(self, b)
        } else if RAM.contains(&reg) {
            Field::new(
                ANN_RAM,
                format!("RAM 0x{:02X}: 0x{:02X}", reg, b),
                format!("0x{:02X}", b),
            )
        } else {
            Field::new(
                ANN_WARNING,
                format!("Unsupported register 0x{:02X}", reg),
                format!("Reg 0x{:02X}?", reg),
            )
        };
        // The pointer wraps from the last RAM byte back to 0x00
        self.reg = if reg >= *RAM.end() { 0 } else { reg + 1 };
        field
    }

    fn datetime_text(&self) -> String {
        let d = &self.datetime;
        let day = d
            .day
            .checked_sub(1)
            .and_then(|i| DAYS_OF_WEEK.get(i as usize))
            .unwrap_or(&"?");
        format!(
            "{}, {:02}.{:02}.{} {:02}:{:02}:{:02}",
            day,
            d.date,
            d.month,
            2000 + d.year as u16,
            d.hours,
            d.minutes,
            d.seconds
        )
    }

    fn begin_transaction(&mut self, start: u64) {
        self.transaction_start = start;
        self.touched = 0;
        self.state = State::GetSlaveAddr;
    }

    fn end_transaction(&mut self, out: &mut Outputs<()>, stream: StreamId, end: u64) {
        if self.touched & 0x7f == 0x7f {
            let (class, verb) = match self.state {
                State::ReadRegs => (ANN_READ_DATETIME, "Read"),
                _ => (ANN_WRITE_DATETIME, "Written"),
            };
            let text = self.datetime_text();
            debug!("DS1307: {} date/time {}", verb, text);
            out.annotate(
                stream,
                self.transaction_start,
                end,
                class,
                &[format!("{} date/time: {}", verb, text), text],
            );
        }
        self.touched = 0;
        self.state = State::Idle;
    }
}

impl Default for Ds1307 {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Ds1307 {
    type Packet = ();

    fn info(&self) -> &'static DecoderInfo {
        &INFO
    }

    fn start(&mut self, ctx: &mut StartContext<'_, ()>) -> Result<(), SessionError> {
        self.annotations = Some(ctx.register(OutputKind::Annotation, "annotations")?);
        Ok(())
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.touched = 0;
    }
}

impl StackedDecoder for Ds1307 {
    type Input = I2cPacket;

    fn decode_step(&mut self, packet: Packet<I2cPacket>, out: &mut Outputs<()>) -> WorkResult<()> {
        let stream = self
            .annotations
            .ok_or_else(|| WorkError::Contract("rtc_ds1307: decode before start".into()))?;
        trace!("DS1307: {:?} in {:?}", packet.data, self.state);

        match (self.state, packet.data) {
            (_, I2cPacket::Ack | I2cPacket::Nack) => {}
            (State::WriteRegs, I2cPacket::StartRepeat) => {
                // Pointer set, read follows
                self.state = State::GetSlaveAddr;
            }
            (state, I2cPacket::Start | I2cPacket::StartRepeat) => {
                if matches!(state, State::WriteRegs | State::ReadRegs) {
                    self.end_transaction(out, stream, packet.start);
                } else if state != State::Idle {
                    debug!("DS1307: transaction cut short in {:?}", state);
                }
                self.begin_transaction(packet.start);
            }
            (State::Idle, _) => {}
            (State::GetSlaveAddr, I2cPacket::AddressWrite(DS1307_ADDRESS)) => {
                self.state = State::GetRegAddr;
            }
            (State::GetSlaveAddr, I2cPacket::AddressRead(DS1307_ADDRESS)) => {
                self.state = State::ReadRegs;
            }
            (State::GetRegAddr, I2cPacket::DataWrite(reg)) => {
                self.reg = reg;
                self.state = State::WriteRegs;
            }
            (State::WriteRegs, I2cPacket::DataWrite(b)) | (State::ReadRegs, I2cPacket::DataRead(b)) => {
                let field = self.handle_reg(b);
                out.annotate(stream, packet.start, packet.end, field.class, &field.texts);
            }
            (State::WriteRegs | State::ReadRegs, I2cPacket::Stop) => {
                self.end_transaction(out, stream, packet.end);
            }
            (state, data) => {
                // Other slaves, or a transaction cut short
                debug!("DS1307: {:?} in {:?}, back to idle", data, state);
                self.reset();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::decoders::i2c::I2c;
    use crate::nodes::decoders::i2c::tests::{Bus, config};
    use crate::runtime::{
        ChunkSource, Emission, LogicSession, SessionConfig, StackedSession, StreamFilter,
    };

    fn run(bus: &Bus) -> (Vec<Emission<()>>, DateTime) {
        let source = Box::new(ChunkSource::from_signal(&bus.signal, 256));
        let mut i2c = LogicSession::new(I2c::new(), &config(), source).unwrap();
        let packets = i2c.subscribe(StreamFilter::Kind(OutputKind::Packet));
        i2c.run().unwrap();

        let mut rtc = StackedSession::new(Ds1307::new(), &SessionConfig::new(), packets).unwrap();
        let rx = rtc.subscribe(StreamFilter::All);
        while rtc.step().is_ok() {}
        let datetime = rtc.decoder().datetime();
        (rx.collect(), datetime)
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
    fn test_bcd() {
        assert_eq!(bcd2int(0x59), Some(59));
        assert_eq!(bcd2int(0x1a), None);
    }

    #[test]
    fn test_write_datetime() {
        let mut bus = Bus::new();
        // Register pointer 0, then 56s 34m 12h, Monday, 28.02.(20)23
        bus.write(DS1307_ADDRESS, &[0x00, 0x56, 0x34, 0x12, 0x02, 0x28, 0x02, 0x23]);
        let (emissions, datetime) = run(&bus);

        assert_eq!(texts(&emissions, ANN_SECONDS), vec!["Second: 56"]);
        assert_eq!(texts(&emissions, ANN_DAY), vec!["Day of week: Monday"]);
        assert_eq!(
            texts(&emissions, ANN_WRITE_DATETIME),
            vec!["Written date/time: Monday, 28.02.2023 12:34:56"]
        );
        assert_eq!(datetime.year, 23);
        assert!(texts(&emissions, ANN_WARNING).is_empty());
    }

    #[test]
    fn test_pointer_write_then_read() {
        let mut bus = Bus::new();
        bus.start().byte(DS1307_ADDRESS << 1, true).byte(0x07, true);
        bus.start()
            .byte((DS1307_ADDRESS << 1) | 1, true)
            .byte(0x92, true)
            .byte(0xab, false)
            .stop();
        let (emissions, _) = run(&bus);

        assert_eq!(
            texts(&emissions, ANN_CONTROL),
            vec!["Control: OUT=1, SQWE=enabled, RS=8192Hz"]
        );
        assert_eq!(texts(&emissions, ANN_RAM), vec!["RAM 0x08: 0xAB"]);
        assert!(texts(&emissions, ANN_READ_DATETIME).is_empty());
    }

    #[test]
    fn test_hours_12h_mode() {
        let mut rtc = Ds1307::new();
        // 12h mode, PM, 11 o'clock
        let field = rtc.handle_hours(0x40 | 0x20 | 0x11);
        assert_eq!(field.texts[0], "Hour: 11 PM");
        assert_eq!(rtc.datetime.hours, 23);
    }

    #[test]
    fn test_unsupported_register_and_wrap() {
        let mut rtc = Ds1307::new();
        rtc.reg = 0x3f;
        assert_eq!(rtc.handle_reg(0x00).class, ANN_RAM);
        assert_eq!(rtc.reg, 0x00);

        rtc.reg = 0x50;
        let field = rtc.handle_reg(0x01);
        assert_eq!(field.class, ANN_WARNING);
        assert_eq!(field.texts[0], "Unsupported register 0x50");
    }

    #[test]
    fn test_invalid_bcd_warns_and_keeps_going() {
        let mut bus = Bus::new();
        bus.write(DS1307_ADDRESS, &[0x01, 0x7a, 0x10]);
        let (emissions, _) = run(&bus);
        assert_eq!(texts(&emissions, ANN_WARNING).len(), 1);
        assert_eq!(texts(&emissions, ANN_HOURS), vec!["Hour: 10"]);
    }

    #[test]
    fn test_other_slave_ignored() {
        let mut bus = Bus::new();
        bus.write(0x50, &[0x00, 0x12]);
        bus.write(DS1307_ADDRESS, &[0x04, 0x31]);
        let (emissions, _) = run(&bus);
        assert_eq!(emissions.len(), 1);
        assert_eq!(texts(&emissions, ANN_DATE), vec!["Day: 31"]);
    }

    const DATETIME: [u8; 8] = [0x00, 0x56, 0x34, 0x12, 0x02, 0x28, 0x02, 0x23];

    #[test]
    fn test_read_cut_by_repeated_start_resynchronises() {
        let mut bus = Bus::new();
        bus.start()
            .byte((DS1307_ADDRESS << 1) | 1, true)
            .byte(0x45, false);
        // No STOP: the write below opens with a repeated START
        bus.write(DS1307_ADDRESS, &DATETIME);
        let (emissions, datetime) = run(&bus);

        assert!(texts(&emissions, ANN_READ_DATETIME).is_empty());
        assert_eq!(
            texts(&emissions, ANN_WRITE_DATETIME),
            vec!["Written date/time: Monday, 28.02.2023 12:34:56"]
        );
        assert_eq!(datetime.seconds, 56);
    }

    #[test]
    fn test_missing_register_pointer_resynchronises() {
        let mut bus = Bus::new();
        bus.start().byte(DS1307_ADDRESS << 1, true);
        bus.write(DS1307_ADDRESS, &DATETIME);
        let (emissions, _) = run(&bus);
        assert_eq!(texts(&emissions, ANN_WRITE_DATETIME).len(), 1);
        assert_eq!(texts(&emissions, ANN_SECONDS), vec!["Second: 56"]);
    }

    #[test]
    fn test_other_slave_then_repeated_start() {
        let mut bus = Bus::new();
        bus.start().byte((0x50 << 1) | 1, true).byte(0x00, false);
        bus.write(DS1307_ADDRESS, &[0x04, 0x15]);
        let (emissions, _) = run(&bus);
        assert_eq!(texts(&emissions, ANN_DATE), vec!["Day: 15"]);
    }
}
