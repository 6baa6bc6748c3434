//! Sample cursor over a [`SampleSource`]
//!
//! The cursor owns the current absolute sample index and the levels of every
//! physical line at that index, plus the levels one sample earlier so the
//! wait engine can detect edges. It only ever moves forward.

use tracing::{debug, trace};

use super::errors::{SessionError, WorkError, WorkResult};
use super::sample::LogicChunk;
use super::source::SampleSource;
use crate::CaptureError;

pub struct SampleCursor {
    source: Box<dyn SampleSource>,
    num_lines: usize,
    chunk: Option<LogicChunk>,
    /// `None` until the first sample has been read
    position: Option<u64>,
    levels: Vec<bool>,
    previous: Vec<bool>,
    exhausted: bool,
}

impl SampleCursor {
    pub fn new(source: Box<dyn SampleSource>) -> Self {
        let num_lines = source.num_lines();
        Self {
            source,
            num_lines,
            chunk: None,
            position: None,
            levels: vec![false; num_lines],
            previous: vec![false; num_lines],
            exhausted: false,
        }
    }

    /// Number of physical lines in the capture
    pub fn num_lines(&self) -> usize {
        self.num_lines
    }

    /// Absolute index of the current sample, `None` before the first read
    pub fn current_index(&self) -> Option<u64> {
        self.position
    }

    /// Level of a physical line at the current sample
    pub fn level(&self, line: usize) -> Option<bool> {
        self.position.map(|_| self.levels[line])
    }

    /// Level of a physical line one sample before the current one.
    /// `None` at the first sample, where no edge can be observed.
    pub fn previous_level(&self, line: usize) -> Option<bool> {
        match self.position {
            Some(p) if p > 0 => Some(self.previous[line]),
            _ => None,
        }
    }

    /// Move to the next sample.
    ///
    /// Returns `WorkError::EndOfStream` once the source is exhausted; the
    /// cursor then stays on the last sample.
    pub fn advance(&mut self) -> WorkResult<u64> {
        let next = self.position.map_or(0, |p| p + 1);

        if !self.chunk.as_ref().is_some_and(|c| c.contains(next)) {
            self.load_chunk(next)?;
        }
        let chunk = match self.chunk.as_ref() {
            Some(chunk) => chunk,
            None => return Err(WorkError::EndOfStream),
        };

        std::mem::swap(&mut self.levels, &mut self.previous);
        for (line, level) in self.levels.iter_mut().enumerate() {
            *level = chunk.level(line, next);
        }
        self.position = Some(next);
        Ok(next)
    }

    fn load_chunk(&mut self, expected_start: u64) -> WorkResult<()> {
        if self.exhausted {
            return Err(WorkError::EndOfStream);
        }
        loop {
            let chunk = self.source.next_chunk().map_err(SessionError::from)?;
            let Some(chunk) = chunk else {
                debug!("Sample source exhausted at sample {}", expected_start);
                self.exhausted = true;
                return Err(WorkError::EndOfStream);
            };
            if chunk.is_empty() {
                continue;
            }
            if chunk.start() != expected_start {
                return Err(SessionError::from(CaptureError::Discontinuity {
                    expected: expected_start,
                    got: chunk.start(),
                })
                .into());
            }
            if chunk.num_lines() != self.num_lines {
                return Err(SessionError::from(CaptureError::LineCount {
                    expected: self.num_lines,
                    got: chunk.num_lines(),
                })
                .into());
            }
            trace!("Cursor loaded {}", chunk);
            self.chunk = Some(chunk);
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sample::SignalBuilder;
    use crate::runtime::source::ChunkSource;

    fn cursor_over(signal: &SignalBuilder, chunk_size: usize) -> SampleCursor {
        SampleCursor::new(Box::new(ChunkSource::from_signal(signal, chunk_size)))
    }

    #[test]
    fn test_starts_before_first_sample() {
        let mut signal = SignalBuilder::new(1);
        signal.set(0, true).hold(2);
        let mut cursor = cursor_over(&signal, 8);

        assert_eq!(cursor.current_index(), None);
        assert_eq!(cursor.level(0), None);

        assert_eq!(cursor.advance().unwrap(), 0);
        assert_eq!(cursor.level(0), Some(true));
        assert_eq!(cursor.previous_level(0), None);
    }

    #[test]
    fn test_advance_across_chunk_boundaries() {
        let mut signal = SignalBuilder::new(2);
        signal.hold(3).set(1, true).hold(3);
        let mut cursor = cursor_over(&signal, 2);

        let mut seen = Vec::new();
        while let Ok(index) = cursor.advance() {
            seen.push((index, cursor.level(1).unwrap(), cursor.previous_level(1)));
        }
        assert_eq!(
            seen,
            vec![
                (0, false, None),
                (1, false, Some(false)),
                (2, false, Some(false)),
                (3, true, Some(false)),
                (4, true, Some(true)),
                (5, true, Some(true)),
            ]
        );
    }

    #[test]
    fn test_end_of_stream_is_sticky() {
        let mut signal = SignalBuilder::new(1);
        signal.hold(1);
        let mut cursor = cursor_over(&signal, 4);

        cursor.advance().unwrap();
        assert!(cursor.advance().unwrap_err().is_end_of_stream());
        assert!(cursor.advance().unwrap_err().is_end_of_stream());
        assert_eq!(cursor.current_index(), Some(0));
    }

    #[test]
    fn test_discontiguous_chunks_rejected() {
        let chunks = vec![
            LogicChunk::from_words(0, &[0, 0], 1),
            LogicChunk::from_words(5, &[0, 0], 1),
        ];
        let mut cursor = SampleCursor::new(Box::new(ChunkSource::new(1, chunks)));
        cursor.advance().unwrap();
        cursor.advance().unwrap();
        let err = cursor.advance().unwrap_err();
        assert!(matches!(
            err,
            WorkError::Session(SessionError::Capture(CaptureError::Discontinuity {
                expected: 2,
                got: 5
            }))
        ));
    }
}
