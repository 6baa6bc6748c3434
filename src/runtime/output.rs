//! Annotation/output sink
//!
//! A decoder registers its output streams while it starts, then pushes
//! `(start, end, payload)` tuples onto them. Every emission is broadcast into
//! unbounded per-subscriber queues; `emit` never blocks and never fails.
//!
//! Demultiplexers whose streams are keyed by something only seen at runtime
//! (a slave address, a stream id) use [`Outputs::open_stream`] instead of
//! start-time registration.

use crossbeam_channel::unbounded;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use super::errors::SessionError;
use super::receiver::Receiver;
use super::sender::Sender;

/// Kind of an output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    /// Human-readable annotations for a renderer
    Annotation,
    /// Protocol packets for stacked decoders
    Packet,
    /// Raw binary blobs
    Binary,
    /// Reconstructed logic traces
    Logic,
    /// Numeric measurements
    Meta,
}

/// Identifier of a registered output stream, stable for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(usize);

impl StreamId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// An annotation: class index plus text variants, longest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub class: usize,
    pub texts: Vec<String>,
}

impl Annotation {
    pub fn new<S: AsRef<str>>(class: usize, texts: &[S]) -> Self {
        Self {
            class,
            texts: texts.iter().map(|t| t.as_ref().to_string()).collect(),
        }
    }

    /// Most verbose text variant
    pub fn text(&self) -> &str {
        self.texts.first().map(String::as_str).unwrap_or("")
    }
}

/// Payload of one emission
#[derive(Debug, Clone, PartialEq)]
pub enum OutputPayload<P> {
    Annotation(Annotation),
    Packet(P),
    Binary { class: usize, data: Vec<u8> },
    Logic { group: usize, level: bool },
    Meta(f64),
}

impl<P> OutputPayload<P> {
    pub fn kind(&self) -> OutputKind {
        match self {
            OutputPayload::Annotation(_) => OutputKind::Annotation,
            OutputPayload::Packet(_) => OutputKind::Packet,
            OutputPayload::Binary { .. } => OutputKind::Binary,
            OutputPayload::Logic { .. } => OutputKind::Logic,
            OutputPayload::Meta(_) => OutputKind::Meta,
        }
    }
}

/// One tuple pushed by a decoder. `start <= end` always holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission<P> {
    pub stream: StreamId,
    pub name: Arc<str>,
    pub start: u64,
    pub end: u64,
    pub payload: OutputPayload<P>,
}

impl<P> Emission<P> {
    pub fn annotation(&self) -> Option<&Annotation> {
        match &self.payload {
            OutputPayload::Annotation(a) => Some(a),
            _ => None,
        }
    }

    pub fn packet(&self) -> Option<&P> {
        match &self.payload {
            OutputPayload::Packet(p) => Some(p),
            _ => None,
        }
    }
}

impl<P: fmt::Debug> fmt::Display for Emission<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:>10}-{:<10} {}: ", self.start, self.end, self.name)?;
        match &self.payload {
            OutputPayload::Annotation(a) => write!(f, "[{}] {}", a.class, a.text()),
            OutputPayload::Packet(p) => write!(f, "{:?}", p),
            OutputPayload::Binary { class, data } => {
                write!(f, "<{}> {} bytes", class, data.len())
            }
            OutputPayload::Logic { group, level } => write!(f, "group {} = {}", group, *level as u8),
            OutputPayload::Meta(v) => write!(f, "{}", v),
        }
    }
}

/// Which emissions a subscriber receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFilter {
    All,
    Stream(StreamId),
    Kind(OutputKind),
    /// Match by stream name; useful for streams opened at runtime
    Name(String),
}

impl StreamFilter {
    fn accepts(&self, stream: StreamId, kind: OutputKind, name: &str) -> bool {
        match self {
            StreamFilter::All => true,
            StreamFilter::Stream(id) => *id == stream,
            StreamFilter::Kind(k) => *k == kind,
            StreamFilter::Name(n) => n == name,
        }
    }
}

#[derive(Debug)]
struct StreamInfo {
    kind: OutputKind,
    name: Arc<str>,
    emitted: u64,
}

struct Subscription<P> {
    filter: StreamFilter,
    sender: Sender<Emission<P>>,
}

/// Output streams of one decoder instance
pub struct Outputs<P> {
    decoder: &'static str,
    annotation_classes: usize,
    binary_classes: usize,
    streams: Vec<StreamInfo>,
    subscriptions: Vec<Subscription<P>>,
    sealed: bool,
}

impl<P: Clone> Outputs<P> {
    pub fn new(decoder: &'static str, annotation_classes: usize, binary_classes: usize) -> Self {
        Self {
            decoder,
            annotation_classes,
            binary_classes,
            streams: Vec::new(),
            subscriptions: Vec::new(),
            sealed: false,
        }
    }

    /// Register an output stream. Only allowed while the decoder starts.
    pub fn register(&mut self, kind: OutputKind, name: &str) -> Result<StreamId, SessionError> {
        if self.sealed {
            return Err(SessionError::Contract(format!(
                "decoder '{}' registered stream '{}' after start",
                self.decoder, name
            )));
        }
        if self.find(name).is_some() {
            return Err(SessionError::DuplicateStream(name.to_string()));
        }
        Ok(self.allocate(kind, name))
    }

    /// Get or allocate a stream keyed by a runtime-discovered attribute.
    ///
    /// # Panics
    ///
    /// If `name` already exists with a different kind.
    pub fn open_stream(&mut self, kind: OutputKind, name: &str) -> StreamId {
        if let Some(id) = self.find(name) {
            let existing = self.streams[id.0].kind;
            assert_eq!(
                existing, kind,
                "decoder '{}': stream '{}' reopened as {:?}, registered as {:?}",
                self.decoder, name, kind, existing
            );
            return id;
        }
        self.allocate(kind, name)
    }

    fn allocate(&mut self, kind: OutputKind, name: &str) -> StreamId {
        let id = StreamId(self.streams.len());
        self.streams.push(StreamInfo {
            kind,
            name: Arc::from(name),
            emitted: 0,
        });
        debug!(
            "Decoder '{}': stream {} '{}' ({:?})",
            self.decoder, id.0, name, kind
        );
        id
    }

    fn find(&self, name: &str) -> Option<StreamId> {
        self.streams
            .iter()
            .position(|s| &*s.name == name)
            .map(StreamId)
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    /// Look up a stream by name
    pub fn stream(&self, name: &str) -> Option<StreamId> {
        self.find(name)
    }

    pub fn kind(&self, stream: StreamId) -> Option<OutputKind> {
        self.streams.get(stream.0).map(|s| s.kind)
    }

    /// Names of all streams, in allocation order
    pub fn stream_names(&self) -> Vec<Arc<str>> {
        self.streams.iter().map(|s| Arc::clone(&s.name)).collect()
    }

    /// Number of emissions per stream, in allocation order
    pub fn counts(&self) -> Vec<(Arc<str>, u64)> {
        self.streams
            .iter()
            .map(|s| (Arc::clone(&s.name), s.emitted))
            .collect()
    }

    /// Subscribe to emissions matching `filter`.
    ///
    /// Only emissions pushed after this call are delivered.
    pub fn subscribe(&mut self, filter: StreamFilter) -> Receiver<Emission<P>> {
        let (tx, rx) = unbounded();
        match self.subscriptions.iter_mut().find(|s| s.filter == filter) {
            Some(subscription) => subscription.sender.attach(tx),
            None => {
                let mut sender = Sender::new();
                sender.attach(tx);
                self.subscriptions.push(Subscription { filter, sender });
            }
        }
        Receiver::new(rx)
    }

    /// Push one emission.
    ///
    /// # Panics
    ///
    /// On an unregistered stream, `start > end`, a payload that does not
    /// match the stream kind, or an undeclared annotation/binary class.
    pub fn emit(&mut self, stream: StreamId, start: u64, end: u64, payload: OutputPayload<P>) {
        let decoder = self.decoder;
        let Some(info) = self.streams.get_mut(stream.0) else {
            panic!("decoder '{}' emitted on unregistered stream {}", decoder, stream.0);
        };
        assert!(
            start <= end,
            "decoder '{}' emitted on '{}' with start {} > end {}",
            decoder,
            info.name,
            start,
            end
        );
        assert_eq!(
            payload.kind(),
            info.kind,
            "decoder '{}' emitted wrong payload kind on '{}'",
            decoder,
            info.name
        );
        match &payload {
            OutputPayload::Annotation(a) => assert!(
                a.class < self.annotation_classes,
                "decoder '{}' used undeclared annotation class {}",
                decoder,
                a.class
            ),
            OutputPayload::Binary { class, .. } => assert!(
                *class < self.binary_classes,
                "decoder '{}' used undeclared binary class {}",
                decoder,
                class
            ),
            _ => {}
        }

        info.emitted += 1;
        let kind = info.kind;
        let name = Arc::clone(&info.name);
        trace!("{} {}-{} on '{}'", decoder, start, end, name);

        let mut matching = self
            .subscriptions
            .iter_mut()
            .filter(|s| s.filter.accepts(stream, kind, &name))
            .peekable();
        if matching.peek().is_none() {
            return;
        }
        let emission = Emission {
            stream,
            name: Arc::clone(&name),
            start,
            end,
            payload,
        };
        for subscription in matching {
            subscription.sender.send(emission.clone());
        }
    }

    /// Emit an annotation with text variants from most to least verbose
    pub fn annotate<S: AsRef<str>>(
        &mut self,
        stream: StreamId,
        start: u64,
        end: u64,
        class: usize,
        texts: &[S],
    ) {
        self.emit(
            stream,
            start,
            end,
            OutputPayload::Annotation(Annotation::new(class, texts)),
        );
    }

    pub fn put_packet(&mut self, stream: StreamId, start: u64, end: u64, packet: P) {
        self.emit(stream, start, end, OutputPayload::Packet(packet));
    }

    pub fn put_binary(&mut self, stream: StreamId, start: u64, end: u64, class: usize, data: Vec<u8>) {
        self.emit(stream, start, end, OutputPayload::Binary { class, data });
    }

    /// Signal end-of-stream to every subscriber
    pub fn close(&mut self) {
        for subscription in &mut self.subscriptions {
            subscription.sender.close();
        }
        self.subscriptions.clear();
    }
}
