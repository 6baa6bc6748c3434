//! I²C decoder chain on the threaded scheduler:
//! source → i2c → {i2cdemux, rtc_ds1307}

use sigdecode::runtime::{
    ChunkSource, Emission, LogicSession, OutputKind, Scheduler, SessionConfig, SignalBuilder,
    SourceNode, StackedSession, StreamFilter,
};
use sigdecode::{Ds1307, I2c, I2cDemux, I2cPacket};

const SCL: usize = 0;
const SDA: usize = 1;

fn start(signal: &mut SignalBuilder) {
    signal.set(SDA, true).hold(2).set(SCL, true).hold(2);
    signal.set(SDA, false).hold(2).set(SCL, false).hold(2);
}

fn stop(signal: &mut SignalBuilder) {
    signal.set(SDA, false).hold(2).set(SCL, true).hold(2);
    signal.set(SDA, true).hold(4);
}

fn byte(signal: &mut SignalBuilder, value: u8) {
    for i in (0..8).rev() {
        signal.set(SDA, (value >> i) & 1 == 1).hold(2);
        signal.set(SCL, true).hold(2).set(SCL, false).hold(2);
    }
    // ACK
    signal.set(SDA, false).hold(2);
    signal.set(SCL, true).hold(2).set(SCL, false).hold(2);
}

fn write(signal: &mut SignalBuilder, address: u8, data: &[u8]) {
    start(signal);
    byte(signal, address << 1);
    for &b in data {
        byte(signal, b);
    }
    stop(signal);
}

fn capture() -> SignalBuilder {
    let mut signal = SignalBuilder::new(2);
    signal.set(SCL, true).set(SDA, true).hold(4);
    write(&mut signal, 0x68, &[0x00, 0x00, 0x30, 0x08, 0x05, 0x17, 0x10, 0x26]);
    write(&mut signal, 0x50, &[0x00, 0x42]);
    write(&mut signal, 0x68, &[0x08, 0x5a]);
    signal.hold(16);
    signal
}

#[test]
fn test_threaded_i2c_chain() {
    let signal = capture();
    let (source, samples) = SourceNode::channel("source", Box::new(ChunkSource::from_signal(&signal, 50)));

    let config = SessionConfig::new().channel("scl", 0).channel("sda", 1);
    let mut i2c = LogicSession::new(I2c::new(), &config, Box::new(samples)).unwrap();

    let mut demux = StackedSession::new(
        I2cDemux::new(),
        &SessionConfig::new(),
        i2c.subscribe(StreamFilter::Name("i2c".to_string())),
    )
    .unwrap();
    let mut rtc = StackedSession::new(
        Ds1307::new(),
        &SessionConfig::new(),
        i2c.subscribe(StreamFilter::Kind(OutputKind::Packet)),
    )
    .unwrap();

    let i2c_annotations = i2c.subscribe(StreamFilter::Kind(OutputKind::Annotation));
    let routed = demux.subscribe(StreamFilter::All);
    let registers = rtc.subscribe(StreamFilter::All);

    let mut scheduler = Scheduler::new();
    scheduler.start_process(Box::new(rtc));
    scheduler.start_process(Box::new(demux));
    scheduler.start_process(Box::new(i2c));
    scheduler.start_process(Box::new(source));
    assert_eq!(scheduler.num_threads(), 4);

    let reports = scheduler.wait();
    assert!(reports.iter().all(|r| r.is_ok()), "{:?}", reports);

    let routed: Vec<Emission<I2cPacket>> = routed.collect();
    let names: Vec<&str> = routed.iter().map(|e| &*e.name).collect();
    assert!(names.contains(&"0x68"));
    assert!(names.contains(&"0x50"));
    let rtc_packets: Vec<I2cPacket> = routed
        .iter()
        .filter(|e| &*e.name == "0x68")
        .filter_map(|e| e.packet().copied())
        .collect();
    assert!(rtc_packets.contains(&I2cPacket::DataWrite(0x5a)));
    assert!(!rtc_packets.contains(&I2cPacket::DataWrite(0x42)));

    let texts: Vec<String> = registers
        .map(|e| e.annotation().map(|a| a.text().to_string()).unwrap_or_default())
        .collect();
    assert!(texts.contains(&"Written date/time: Thursday, 17.10.2026 08:30:00".to_string()));
    assert!(texts.contains(&"RAM 0x08: 0x5A".to_string()));

    let warnings = i2c_annotations
        .filter(|e| e.annotation().is_some_and(|a| a.text().starts_with("Incomplete")))
        .count();
    assert_eq!(warnings, 0);
}
