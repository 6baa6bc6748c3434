//! Edge-wait engine
//!
//! [`wait`] is the only suspension point of a logic decoder: it moves the
//! cursor forward until at least one [`Condition`] holds and reports every
//! condition that holds at that sample.
//!
//! - A condition is an AND of per-channel [`Term`]s, optionally with a skip
//!   count. A pure `skip(n)` condition matches exactly `n` samples after the
//!   sample current at call time.
//! - Scanning starts at the sample after the current one, so every call
//!   advances by at least one sample.
//! - An empty condition list advances exactly one sample.
//! - Edges compare against the previous sample; the very first sample of a
//!   capture has no previous sample and never shows an edge.

use super::channels::ChannelBinding;
use super::cursor::SampleCursor;
use super::errors::{WorkError, WorkResult};

/// Per-channel predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// 0 → 1 transition
    Rising,
    /// 1 → 0 transition
    Falling,
    /// Either transition
    Edge,
    /// Level is 1
    High,
    /// Level is 0
    Low,
}

impl Predicate {
    #[inline]
    fn holds(self, previous: Option<bool>, current: bool) -> bool {
        match self {
            Predicate::Rising => previous == Some(false) && current,
            Predicate::Falling => previous == Some(true) && !current,
            Predicate::Edge => previous.is_some_and(|p| p != current),
            Predicate::High => current,
            Predicate::Low => !current,
        }
    }
}

/// One predicate on one logical channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Term {
    pub channel: usize,
    pub predicate: Predicate,
}

/// A set of terms that must hold together, plus an optional skip count
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Condition {
    terms: Vec<Term>,
    skip: Option<u64>,
}

impl Condition {
    fn single(channel: usize, predicate: Predicate) -> Self {
        Self {
            terms: vec![Term { channel, predicate }],
            skip: None,
        }
    }

    pub fn rising(channel: usize) -> Self {
        Self::single(channel, Predicate::Rising)
    }

    pub fn falling(channel: usize) -> Self {
        Self::single(channel, Predicate::Falling)
    }

    pub fn edge(channel: usize) -> Self {
        Self::single(channel, Predicate::Edge)
    }

    pub fn high(channel: usize) -> Self {
        Self::single(channel, Predicate::High)
    }

    pub fn low(channel: usize) -> Self {
        Self::single(channel, Predicate::Low)
    }

    /// Matches once `samples` samples have elapsed since the wait started
    pub fn skip(samples: u64) -> Self {
        Self {
            terms: Vec::new(),
            skip: Some(samples),
        }
    }

    /// Add a term that must hold at the same sample
    pub fn and(mut self, channel: usize, predicate: Predicate) -> Self {
        self.terms.push(Term { channel, predicate });
        self
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn skip_count(&self) -> Option<u64> {
        self.skip
    }
}

/// Levels of every logical channel at the halted sample.
/// Unbound optional channels read as `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Levels(Vec<Option<bool>>);

impl Levels {
    pub(crate) fn capture(cursor: &SampleCursor, binding: &ChannelBinding) -> Self {
        Self(
            (0..binding.len())
                .map(|ch| binding.line(ch).and_then(|line| cursor.level(line)))
                .collect(),
        )
    }

    pub fn get(&self, channel: usize) -> Option<bool> {
        self.0.get(channel).copied().flatten()
    }

    /// Level of a channel; unbound channels read low
    pub fn high(&self, channel: usize) -> bool {
        self.get(channel).unwrap_or(false)
    }

    pub fn as_slice(&self) -> &[Option<bool>] {
        &self.0
    }
}

/// Result of one [`wait`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitResult {
    /// Absolute index of the sample where the wait halted
    pub sample: u64,
    pub levels: Levels,
    /// Parallel to the condition list; more than one entry may be true
    pub matched: Vec<bool>,
}

impl WaitResult {
    pub fn matched(&self, index: usize) -> bool {
        self.matched.get(index).copied().unwrap_or(false)
    }
}

/// Reject condition lists that could never be satisfied as intended.
fn validate(conditions: &[Condition], binding: &ChannelBinding) -> WorkResult<()> {
    if conditions.is_empty() && binding.bound_count() == 0 {
        return Err(WorkError::Contract(
            "wait with no conditions and no bound channels".into(),
        ));
    }

    let mut skips = 0;
    for (i, condition) in conditions.iter().enumerate() {
        match condition.skip {
            Some(0) => {
                return Err(WorkError::Contract(format!(
                    "condition {}: skip count must be at least 1",
                    i
                )));
            }
            Some(_) => skips += 1,
            None if condition.terms.is_empty() => {
                return Err(WorkError::Contract(format!("condition {} is empty", i)));
            }
            None => {}
        }
        for term in &condition.terms {
            if !binding.is_bound(term.channel) {
                return Err(WorkError::Contract(format!(
                    "condition {}: channel {} is not bound",
                    i, term.channel
                )));
            }
        }
    }
    if skips > 1 {
        return Err(WorkError::Contract(format!(
            "{} skip conditions in one wait, at most one allowed",
            skips
        )));
    }
    Ok(())
}

/// Advance `cursor` to the first sample where any condition holds.
///
/// Returns `WorkError::EndOfStream` if the capture ends first.
pub fn wait(
    cursor: &mut SampleCursor,
    binding: &ChannelBinding,
    conditions: &[Condition],
) -> WorkResult<WaitResult> {
    validate(conditions, binding)?;

    if conditions.is_empty() {
        let sample = cursor.advance()?;
        return Ok(WaitResult {
            sample,
            levels: Levels::capture(cursor, binding),
            matched: Vec::new(),
        });
    }

    // A skip of n lands on `current + n`; before the first sample the
    // current index is conceptually -1.
    let skip_target = conditions
        .iter()
        .find_map(|c| c.skip)
        .map(|n| cursor.current_index().map_or(n - 1, |current| current + n));

    let holds = |cursor: &SampleCursor, condition: &Condition, sample: u64| -> bool {
        if let Some(target) = skip_target
            && condition.skip.is_some()
            && sample < target
        {
            return false;
        }
        condition.terms.iter().all(|term| {
            let line = binding.line(term.channel).unwrap_or_default();
            let current = cursor.level(line).unwrap_or(false);
            term.predicate.holds(cursor.previous_level(line), current)
        })
    };

    loop {
        let sample = cursor.advance()?;
        let current: &SampleCursor = cursor;
        if conditions.iter().any(|c| holds(current, c, sample)) {
            let matched = conditions.iter().map(|c| holds(current, c, sample)).collect();
            return Ok(WaitResult {
                sample,
                levels: Levels::capture(current, binding),
                matched,
            });
        }
    }
}
