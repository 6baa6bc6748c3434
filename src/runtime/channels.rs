//! Channel binding
//!
//! Decoders declare logical channels (required first, then optional). A
//! session maps each logical channel name to a physical capture line once,
//! before decoding starts. Logical channel indices follow declaration order,
//! so a decoder with channels `[scl, sda]` refers to SDA as channel 1.

use std::collections::BTreeMap;
use tracing::debug;

use super::errors::SessionError;

/// Declaration of one logical input channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub desc: &'static str,
}

impl ChannelSpec {
    pub const fn new(id: &'static str, name: &'static str, desc: &'static str) -> Self {
        Self { id, name, desc }
    }
}

/// Resolved logical → physical mapping for one session
#[derive(Debug, Clone)]
pub struct ChannelBinding {
    ids: Vec<&'static str>,
    lines: Vec<Option<usize>>,
}

impl ChannelBinding {
    /// Resolve a name → line mapping against a decoder's declared channels.
    ///
    /// Fails if a required channel is unbound, a name is not declared, a line
    /// does not exist in the capture, or two channels share one line.
    pub fn bind(
        decoder: &str,
        required: &[ChannelSpec],
        optional: &[ChannelSpec],
        mapping: &BTreeMap<String, usize>,
        available_lines: usize,
    ) -> Result<Self, SessionError> {
        let declared: Vec<&ChannelSpec> = required.iter().chain(optional.iter()).collect();

        for name in mapping.keys() {
            if !declared.iter().any(|spec| spec.id == name) {
                return Err(SessionError::UnknownChannel {
                    decoder: decoder.to_string(),
                    channel: name.clone(),
                });
            }
        }

        let mut used: BTreeMap<usize, &'static str> = BTreeMap::new();
        let mut lines = Vec::with_capacity(declared.len());
        for spec in &declared {
            let line = mapping.get(spec.id).copied();
            if let Some(line) = line {
                if line >= available_lines {
                    return Err(SessionError::ChannelOutOfRange {
                        channel: spec.id.to_string(),
                        line,
                        available: available_lines,
                    });
                }
                if let Some(first) = used.insert(line, spec.id) {
                    return Err(SessionError::DuplicateBinding {
                        first: first.to_string(),
                        second: spec.id.to_string(),
                        line,
                    });
                }
            }
            lines.push(line);
        }

        if let Some(missing) = required
            .iter()
            .zip(lines.iter())
            .find(|(_, line)| line.is_none())
            .map(|(spec, _)| spec)
        {
            return Err(SessionError::MissingChannel {
                decoder: decoder.to_string(),
                channel: missing.id.to_string(),
            });
        }

        let binding = Self {
            ids: declared.iter().map(|spec| spec.id).collect(),
            lines,
        };
        debug!("Decoder '{}' channels bound: {:?}", decoder, binding.describe());
        Ok(binding)
    }

    /// Binding for decoders that take no logic input (stacked decoders)
    pub fn empty() -> Self {
        Self {
            ids: Vec::new(),
            lines: Vec::new(),
        }
    }

    /// Whether the named logical channel resolved to a physical line
    pub fn has_channel(&self, id: &str) -> bool {
        self.index_of(id).is_some_and(|index| self.is_bound(index))
    }

    /// Whether the logical channel at `index` resolved to a physical line
    pub fn is_bound(&self, index: usize) -> bool {
        self.lines.get(index).is_some_and(Option::is_some)
    }

    /// Logical index of a channel name
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|&c| c == id)
    }

    /// Physical line of a logical channel
    pub fn line(&self, index: usize) -> Option<usize> {
        self.lines.get(index).copied().flatten()
    }

    /// Number of declared logical channels
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of logical channels that resolved to a line
    pub fn bound_count(&self) -> usize {
        self.lines.iter().filter(|l| l.is_some()).count()
    }

    fn describe(&self) -> Vec<String> {
        self.ids
            .iter()
            .zip(self.lines.iter())
            .map(|(id, line)| match line {
                Some(line) => format!("{}=D{}", id, line),
                None => format!("{}=-", id),
            })
            .collect()
    }
}
