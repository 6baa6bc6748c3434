//! Core sample data types
//!
//! Captured logic data travels through the engine as [`LogicChunk`]s: a run of
//! consecutive sample positions with one packed bit vector per physical line.

use std::fmt;
use std::sync::Arc;

/// A block of consecutive samples across all physical lines of a capture
///
/// All lines share the same sample positions. Downstream consumers can
/// look up any line at any position in `[start, end)` in O(1).
///
/// ## Bit Packing Format
///
/// LSB-first within each byte: sample N of a line is at `data[N/8] >> (N%8) & 1`.
/// This matches the DSLogic on-disk block format, so blocks loaded from a
/// capture archive are used without transformation.
#[derive(Clone, Debug)]
pub struct LogicChunk {
    /// Position of the first sample in this chunk (global sample index)
    start: u64,
    /// Number of valid samples in this chunk
    num_samples: usize,
    /// Packed bits per physical line. Shared via Arc so chunks clone cheaply.
    lines: Vec<Arc<[u8]>>,
}

impl LogicChunk {
    /// Create a chunk from packed per-line bit vectors
    ///
    /// # Panics
    /// Panics if any line holds fewer than `num_samples` bits.
    pub fn new(start: u64, num_samples: usize, lines: Vec<Arc<[u8]>>) -> Self {
        for (i, line) in lines.iter().enumerate() {
            assert!(
                line.len() * 8 >= num_samples,
                "line {} holds {} bits, chunk needs {}",
                i,
                line.len() * 8,
                num_samples
            );
        }
        Self {
            start,
            num_samples,
            lines,
        }
    }

    /// Build a chunk from parallel sample words, bit N of each word being line N
    pub fn from_words(start: u64, words: &[u32], num_lines: usize) -> Self {
        let num_bytes = words.len().div_ceil(8);
        let lines = (0..num_lines)
            .map(|line| {
                let mut packed = vec![0u8; num_bytes];
                for (i, word) in words.iter().enumerate() {
                    if (word >> line) & 1 == 1 {
                        packed[i / 8] |= 1 << (i % 8);
                    }
                }
                Arc::<[u8]>::from(packed)
            })
            .collect();
        Self::new(start, words.len(), lines)
    }

    /// Global index of the first sample
    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Global index one past the last sample
    #[inline]
    pub fn end(&self) -> u64 {
        self.start + self.num_samples as u64
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.num_samples
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    /// Number of physical lines carried by this chunk
    #[inline]
    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    /// Whether `position` falls inside this chunk
    #[inline]
    pub fn contains(&self, position: u64) -> bool {
        position >= self.start && position < self.end()
    }

    /// O(1) level lookup of one line at a global sample position.
    ///
    /// `position` must be in `[start, end)` and `line < num_lines()`.
    #[inline]
    pub fn level(&self, line: usize, position: u64) -> bool {
        let local = (position - self.start) as usize;
        (self.lines[line][local / 8] >> (local % 8)) & 1 == 1
    }
}

impl fmt::Display for LogicChunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "LogicChunk[start={}, samples={}, lines={}]",
            self.start,
            self.num_samples,
            self.lines.len()
        )
    }
}

/// Builder for synthetic captures
///
/// Tracks the current level of every line; `hold(n)` appends `n` samples at
/// those levels. Handy for feeding decoders with exact edge timing.
///
/// ```
/// use sigdecode::runtime::SignalBuilder;
///
/// let mut signal = SignalBuilder::new(2);
/// signal.set(0, true).hold(10).set(1, true).hold(5);
/// let chunks = signal.chunks(4);
/// assert_eq!(chunks.len(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct SignalBuilder {
    num_lines: usize,
    current: u32,
    words: Vec<u32>,
}

impl SignalBuilder {
    /// Create a builder with all lines low
    ///
    /// # Panics
    /// Panics if `num_lines` is 0 or more than 32.
    pub fn new(num_lines: usize) -> Self {
        assert!(
            (1..=32).contains(&num_lines),
            "SignalBuilder supports 1-32 lines, got {}",
            num_lines
        );
        Self {
            num_lines,
            current: 0,
            words: Vec::new(),
        }
    }

    /// Set the level of one line for subsequent samples
    pub fn set(&mut self, line: usize, level: bool) -> &mut Self {
        assert!(line < self.num_lines, "line {} out of range", line);
        if level {
            self.current |= 1 << line;
        } else {
            self.current &= !(1 << line);
        }
        self
    }

    /// Append `samples` samples at the current levels
    pub fn hold(&mut self, samples: usize) -> &mut Self {
        self.words
            .extend(std::iter::repeat_n(self.current, samples));
        self
    }

    /// Number of samples generated so far, which is also the index of the
    /// next sample to be appended
    pub fn position(&self) -> u64 {
        self.words.len() as u64
    }

    pub fn num_lines(&self) -> usize {
        self.num_lines
    }

    /// Split the capture into chunks of at most `chunk_size` samples
    pub fn chunks(&self, chunk_size: usize) -> Vec<LogicChunk> {
        assert!(chunk_size > 0, "chunk size must be positive");
        self.words
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, words)| {
                LogicChunk::from_words((i * chunk_size) as u64, words, self.num_lines)
            })
            .collect()
    }
}
