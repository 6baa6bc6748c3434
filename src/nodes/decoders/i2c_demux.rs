//! I²C demultiplexer
//!
//! Stacked on [`I2c`](super::I2c). Buffers every transaction from START to
//! STOP and forwards it, in order, to a packet stream named after the slave
//! address of the transaction ("0x10"). A repeated START closes the segment
//! before it, so each segment goes to the slave it addressed. Streams are
//! opened the first time an address is seen.

use super::i2c::I2cPacket;
use crate::runtime::{
    Decoder, DecoderInfo, OutputKind, Outputs, Packet, SessionError, StackedDecoder,
    StartContext, WorkResult,
};
use tracing::{debug, trace};

static INFO: DecoderInfo = DecoderInfo {
    id: "i2cdemux",
    name: "I²C demux",
    longname: "I²C demultiplexer",
    desc: "Demux I²C packets into per-slave-address streams.",
    inputs: &["i2c"],
    outputs: &["i2c"],
    channels: &[],
    optional_channels: &[],
    options: &[],
    annotations: &[],
    annotation_rows: &[],
    binary: &[],
};

/// Per-address I²C stream splitter
#[derive(Default)]
pub struct I2cDemux {
    /// Packets of the open transaction
    buffer: Vec<Packet<I2cPacket>>,
    /// Slave address of the open transaction, once seen
    address: Option<u8>,
    in_transaction: bool,
}

impl I2cDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the stream carrying transactions for `address`
    pub fn stream_name(address: u8) -> String {
        format!("0x{:02x}", address)
    }

    /// Route the buffered segment to its slave's stream
    fn flush(&mut self, out: &mut Outputs<I2cPacket>) {
        let Some(address) = self.address.take() else {
            debug!(
                "i2cdemux: dropping {} packets of a segment without address",
                self.buffer.len()
            );
            self.buffer.clear();
            return;
        };
        let name = Self::stream_name(address);
        let stream = out.open_stream(OutputKind::Packet, &name);
        debug!("i2cdemux: {} packets to {}", self.buffer.len(), name);
        for packet in self.buffer.drain(..) {
            out.put_packet(stream, packet.start, packet.end, packet.data);
        }
    }
}

impl Decoder for I2cDemux {
    type Packet = I2cPacket;

    fn info(&self) -> &'static DecoderInfo {
        &INFO
    }

    fn start(&mut self, _ctx: &mut StartContext<'_, I2cPacket>) -> Result<(), SessionError> {
        Ok(())
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.address = None;
        self.in_transaction = false;
    }
}

impl StackedDecoder for I2cDemux {
    type Input = I2cPacket;

    fn decode_step(
        &mut self,
        packet: Packet<I2cPacket>,
        out: &mut Outputs<I2cPacket>,
    ) -> WorkResult<()> {
        trace!("i2cdemux: {:?}", packet.data);
        match packet.data {
            I2cPacket::Start => {
                if self.in_transaction {
                    debug!("i2cdemux: START inside a transaction, discarding it");
                    self.reset();
                }
                self.in_transaction = true;
                self.buffer.push(packet);
            }
            I2cPacket::StartRepeat if self.in_transaction => {
                self.flush(out);
                self.buffer.push(packet);
            }
            I2cPacket::Stop if self.in_transaction => {
                self.buffer.push(packet);
                self.flush(out);
                self.in_transaction = false;
            }
            I2cPacket::AddressRead(address) | I2cPacket::AddressWrite(address)
                if self.in_transaction =>
            {
                self.address.get_or_insert(address);
                self.buffer.push(packet);
            }
            _ if self.in_transaction => self.buffer.push(packet),
            _ => trace!("i2cdemux: {:?} outside a transaction", packet.data),
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

    fn demux(bus: &Bus) -> Vec<Emission<I2cPacket>> {
        let source = Box::new(ChunkSource::from_signal(&bus.signal, 128));
        let mut i2c = LogicSession::new(I2c::new(), &config(), source).unwrap();
        let packets = i2c.subscribe(StreamFilter::Kind(OutputKind::Packet));
        i2c.run().unwrap();

        let mut session = StackedSession::new(I2cDemux::new(), &SessionConfig::new(), packets).unwrap();
        let rx = session.subscribe(StreamFilter::All);
        session.run().unwrap();
        rx.collect()
    }

    fn stream(emissions: &[Emission<I2cPacket>], name: &str) -> Vec<(u64, I2cPacket)> {
        emissions
            .iter()
            .filter(|e| &*e.name == name)
            .map(|e| (e.start, *e.packet().unwrap()))
            .collect()
    }

    #[test]
    fn test_routes_by_address() {
        let mut bus = Bus::new();
        bus.write(0x10, &[0xaa]);
        bus.write(0x20, &[0xbb]);
        bus.write(0x10, &[0xcc]);
        let emissions = demux(&bus);

        let first = stream(&emissions, "0x10");
        let second = stream(&emissions, "0x20");
        assert_eq!(first.len() + second.len(), emissions.len());
        assert_eq!(first.len(), 12);
        assert_eq!(second.len(), 6);

        // Stream ids: "0x10" allocated first, "0x20" on first sight
        assert_eq!(emissions[0].stream.index(), 0);
        let id_20 = emissions.iter().find(|e| &*e.name == "0x20").unwrap().stream;
        assert_eq!(id_20.index(), 1);

        let packets: Vec<I2cPacket> = first.iter().map(|(_, p)| *p).collect();
        assert_eq!(
            &packets[..6],
            &[
                I2cPacket::Start,
                I2cPacket::AddressWrite(0x10),
                I2cPacket::Ack,
                I2cPacket::DataWrite(0xaa),
                I2cPacket::Ack,
                I2cPacket::Stop,
            ][..]
        );
        assert!(packets.contains(&I2cPacket::DataWrite(0xcc)));
        assert!(!packets.contains(&I2cPacket::DataWrite(0xbb)));
        assert!(first.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_repeated_start_splits_by_slave() {
        let mut bus = Bus::new();
        bus.start().byte(0x10 << 1, true).byte(0xaa, true);
        bus.start()
            .byte((0x20 << 1) | 1, true)
            .byte(0x55, false)
            .stop();
        let emissions = demux(&bus);

        let first: Vec<I2cPacket> = stream(&emissions, "0x10").into_iter().map(|(_, p)| p).collect();
        let second: Vec<I2cPacket> = stream(&emissions, "0x20").into_iter().map(|(_, p)| p).collect();
        assert_eq!(
            first,
            vec![
                I2cPacket::Start,
                I2cPacket::AddressWrite(0x10),
                I2cPacket::Ack,
                I2cPacket::DataWrite(0xaa),
                I2cPacket::Ack,
            ]
        );
        assert_eq!(
            second,
            vec![
                I2cPacket::StartRepeat,
                I2cPacket::AddressRead(0x20),
                I2cPacket::Ack,
                I2cPacket::DataRead(0x55),
                I2cPacket::Nack,
                I2cPacket::Stop,
            ]
        );
    }

    #[test]
    fn test_lost_stop_resynchronises() {
        let mut out: Outputs<I2cPacket> = Outputs::new("i2cdemux", 0, 0);
        let rx = out.subscribe(StreamFilter::All);
        let mut demux = I2cDemux::new();
        let packets = [
            I2cPacket::Start,
            I2cPacket::AddressWrite(0x10),
            I2cPacket::DataWrite(0x01),
            // STOP lost upstream
            I2cPacket::Start,
            I2cPacket::AddressWrite(0x20),
            I2cPacket::DataWrite(0x02),
            I2cPacket::Stop,
        ];
        for (i, data) in packets.into_iter().enumerate() {
            let at = i as u64;
            demux
                .decode_step(Packet { start: at, end: at, data }, &mut out)
                .unwrap();
        }
        out.close();

        let emissions: Vec<Emission<I2cPacket>> = rx.collect();
        assert_eq!(emissions.len(), 4);
        assert!(emissions.iter().all(|e| &*e.name == "0x20"));
        assert_eq!(emissions[0].start, 3);
        assert_eq!(out.stream_names().len(), 1);
    }

    #[test]
    fn test_transaction_without_address_is_dropped() {
        let mut out: Outputs<I2cPacket> = Outputs::new("i2cdemux", 0, 0);
        let rx = out.subscribe(StreamFilter::All);
        let mut demux = I2cDemux::new();
        for (i, data) in [I2cPacket::Start, I2cPacket::Stop, I2cPacket::Ack].into_iter().enumerate() {
            let at = i as u64;
            demux
                .decode_step(Packet { start: at, end: at, data }, &mut out)
                .unwrap();
        }
        out.close();
        assert_eq!(rx.count(), 0);
        assert!(out.stream_names().is_empty());
    }
}
