//! Decode a DSLogic capture from the command line
//!
//! Usage:
//!   sigdecode --file capture.dsl --decoder i2c \
//!       --channel scl=0 --channel sda=1 \
//!       --stack i2cdemux --stack rtc_ds1307
//!
//!   sigdecode --file card.dsl --decoder wiegand \
//!       --channel d0=D0 --channel d1=D1 --option bitwidth_ms=2
//!
//!   sigdecode --list

use clap::Parser;
use sigdecode::nodes::decoders::{self, Ds1307, I2c, I2cDemux, I2cPacket, Miller, Wiegand};
use sigdecode::runtime::{
    Emission, LogicDecoder, LogicSession, ProcessNode, Receiver, SampleSource, Scheduler,
    SessionConfig, SourceNode, StackedDecoder, StackedSession, StreamFilter, WorkResult,
    parse_samplerate,
};
use sigdecode::DslCapture;
use std::fmt::Debug;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to DSL file
    #[arg(short, long, required_unless_present = "list")]
    file: Option<String>,

    /// Decoder id (see --list)
    #[arg(short, long, default_value = "i2c")]
    decoder: String,

    /// Channel mapping NAME=LINE, LINE being a probe number or probe name
    #[arg(short, long = "channel", value_name = "NAME=LINE")]
    channels: Vec<String>,

    /// Decoder option KEY=VALUE
    #[arg(short, long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Override the capture sample rate, e.g. "10 MHz"
    #[arg(short, long)]
    samplerate: Option<String>,

    /// Decoders stacked on the I²C packet stream (i2cdemux, rtc_ds1307)
    #[arg(long = "stack", value_name = "DECODER")]
    stack: Vec<String>,

    /// Number of emissions to print per decoder (0 = unlimited)
    #[arg(short, long, default_value = "0")]
    n: usize,

    /// List the built-in decoders and exit
    #[arg(long)]
    list: bool,
}

/// Sink that prints every emission of one decoder
struct Printer<P> {
    name: String,
    input: Receiver<Emission<P>>,
    count: usize,
    max: usize,
}

impl<P> Printer<P> {
    fn new(decoder: &str, input: Receiver<Emission<P>>, max: usize) -> Self {
        Self {
            name: format!("{}_printer", decoder),
            input,
            count: 0,
            max,
        }
    }
}

impl<P: Debug + Send> ProcessNode for Printer<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_stop(&self) -> bool {
        self.max > 0 && self.count >= self.max
    }

    fn work(&mut self) -> WorkResult<usize> {
        let emission = self.input.recv()?;
        self.count += 1;
        println!("{}", emission);
        if self.should_stop() {
            info!("[{}] Max emissions ({}) reached", self.name, self.max);
        }
        Ok(1)
    }
}

fn split_pair(arg: &str) -> Result<(&str, &str), String> {
    arg.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", arg))
}

fn build_config(args: &Args, capture: &DslCapture<std::fs::File>) -> Result<SessionConfig, String> {
    let mut config = SessionConfig::new();
    for arg in &args.channels {
        let (name, line) = split_pair(arg)?;
        let line = line
            .parse()
            .ok()
            .or_else(|| capture.probe_index(line))
            .ok_or_else(|| format!("no probe '{}' in capture", line))?;
        config = config.channel(name, line);
    }
    for arg in &args.options {
        let (key, value) = split_pair(arg)?;
        config = config.option(key, value);
    }
    if let Some(text) = &args.samplerate {
        let rate = parse_samplerate(text).ok_or_else(|| format!("invalid sample rate '{}'", text))?;
        config = config.with_samplerate(rate);
    }
    let rate = capture.samplerate();
    Ok(config.samplerate_or((rate > 0).then_some(rate)))
}

fn spawn_logic<D>(
    scheduler: &mut Scheduler,
    decoder: D,
    config: &SessionConfig,
    samples: Box<dyn SampleSource>,
    max: usize,
) -> Result<(), Box<dyn std::error::Error>>
where
    D: LogicDecoder + 'static,
    D::Packet: Debug,
{
    let mut session = LogicSession::new(decoder, config, samples)?;
    let id = session.decoder().info().id;
    scheduler.start_process(Box::new(Printer::new(id, session.subscribe(StreamFilter::All), max)));
    scheduler.start_process(Box::new(session));
    Ok(())
}

fn spawn_stacked<D>(
    scheduler: &mut Scheduler,
    decoder: D,
    input: Receiver<Emission<D::Input>>,
    max: usize,
) -> Result<(), Box<dyn std::error::Error>>
where
    D: StackedDecoder + 'static,
    D::Packet: Debug,
{
    let mut session = StackedSession::new(decoder, &SessionConfig::new(), input)?;
    let id = session.decoder().info().id;
    scheduler.start_process(Box::new(Printer::new(id, session.subscribe(StreamFilter::All), max)));
    scheduler.start_process(Box::new(session));
    Ok(())
}

fn list_decoders() {
    for info in decoders::decoders() {
        println!("{:<12} {} ({})", info.id, info.longname, info.inputs.join(", "));
        for channel in info.channels {
            println!("    channel  {:<14} {}", channel.id, channel.desc);
        }
        for channel in info.optional_channels {
            println!("    optional {:<14} {}", channel.id, channel.desc);
        }
        for option in info.options {
            println!("    option   {:<14} {} (default {})", option.id, option.desc, option.default);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.list {
        list_decoders();
        return Ok(());
    }
    let file = args.file.as_deref().ok_or("--file is required")?;

    info!("File: {}", file);
    let capture = DslCapture::open(file)?;
    info!(
        "{} probes, {} samples at {}",
        capture.header().total_probes,
        capture.header().total_samples,
        capture.header().samplerate
    );
    let config = build_config(&args, &capture)?;

    let (source, samples) = SourceNode::channel("source", Box::new(capture));
    let samples: Box<dyn SampleSource> = Box::new(samples);
    let mut scheduler = Scheduler::new();

    if !args.stack.is_empty() && args.decoder != "i2c" {
        return Err(format!("--stack needs --decoder i2c, got '{}'", args.decoder).into());
    }

    match args.decoder.as_str() {
        "i2c" => {
            let mut session = LogicSession::new(I2c::new(), &config, samples)?;
            for id in &args.stack {
                let packets = session.subscribe(StreamFilter::Name("i2c".to_string()));
                match id.as_str() {
                    "i2cdemux" => spawn_stacked(&mut scheduler, I2cDemux::new(), packets, args.n)?,
                    "rtc_ds1307" => spawn_stacked(&mut scheduler, Ds1307::new(), packets, args.n)?,
                    other => return Err(format!("'{}' cannot be stacked on i2c", other).into()),
                }
            }
            let all: Receiver<Emission<I2cPacket>> = session.subscribe(StreamFilter::All);
            scheduler.start_process(Box::new(Printer::new("i2c", all, args.n)));
            scheduler.start_process(Box::new(session));
        }
        "miller" => spawn_logic(&mut scheduler, Miller::new(), &config, samples, args.n)?,
        "wiegand" => spawn_logic(&mut scheduler, Wiegand::new(), &config, samples, args.n)?,
        other if decoders::find(other).is_some() => {
            return Err(format!("'{}' is a stacked decoder, use --stack", other).into());
        }
        other => return Err(format!("unknown decoder '{}', see --list", other).into()),
    }

    scheduler.start_process(Box::new(source));
    info!("Running {} nodes...", scheduler.num_threads());

    let reports = scheduler.wait();
    let failed: Vec<_> = reports.iter().filter(|r| !r.is_ok()).collect();
    for report in &failed {
        warn!(
            "[{}] failed: {}",
            report.name,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    if !failed.is_empty() {
        return Err(format!("{} node(s) failed", failed.len()).into());
    }

    info!("Done!");
    Ok(())
}
