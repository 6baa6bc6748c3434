//! DSL capture loader
//!
//! Reads DSLogic `.dsl` capture archives. An archive is a zip file holding a
//! `header` ini file plus one entry per probe and block, `L-{probe}/{block}`,
//! each a packed LSB-first bit vector. Blocks are handed to the cursor as
//! they are, one [`LogicChunk`] per block index.

use crate::CaptureError;
use crate::runtime::{LogicChunk, SampleSource, parse_samplerate};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use zip::ZipArchive;

/// Header information from a DSL file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DslHeader {
    /// Total number of probes/channels
    pub total_probes: usize,
    /// Sample rate as written in the file (e.g., "50 MHz")
    pub samplerate: String,
    /// Sample rate in Hz
    pub samplerate_hz: u64,
    /// Total number of samples captured
    pub total_samples: u64,
    /// Total number of data blocks per probe
    pub total_blocks: u64,
    /// Probe names indexed by probe number (0-based)
    pub probe_names: Vec<String>,
}

impl DslHeader {
    fn parse(content: &str) -> Result<Self, CaptureError> {
        let mut total_probes: Option<usize> = None;
        let mut samplerate: Option<String> = None;
        let mut total_samples: Option<u64> = None;
        let mut total_blocks: Option<u64> = None;
        let mut probe_names_map: HashMap<usize, String> = HashMap::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('[') {
                continue;
            }

            if let Some(value) = line.strip_prefix("total probes = ") {
                total_probes = value.parse().ok();
            } else if let Some(value) = line.strip_prefix("samplerate = ") {
                samplerate = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("total samples = ") {
                total_samples = value.parse().ok();
            } else if let Some(value) = line.strip_prefix("total blocks = ") {
                total_blocks = value.parse().ok();
            } else if line.starts_with("probe")
                && let Some((probe_part, name)) = line.split_once(" = ")
                && let Some(num_str) = probe_part.strip_prefix("probe")
                && let Ok(probe_num) = num_str.parse::<usize>()
            {
                probe_names_map.insert(probe_num, name.to_string());
            }
        }

        let total_probes =
            total_probes.ok_or_else(|| CaptureError::MissingField("total probes".to_string()))?;
        let samplerate =
            samplerate.ok_or_else(|| CaptureError::MissingField("samplerate".to_string()))?;
        let total_samples =
            total_samples.ok_or_else(|| CaptureError::MissingField("total samples".to_string()))?;
        let total_blocks =
            total_blocks.ok_or_else(|| CaptureError::MissingField("total blocks".to_string()))?;

        let samplerate_hz = parse_samplerate(&samplerate).ok_or_else(|| {
            CaptureError::ParseHeader(format!("Invalid sample rate: {}", samplerate))
        })?;

        if let Some(&probe) = probe_names_map.keys().find(|&&p| p >= total_probes) {
            return Err(CaptureError::InvalidProbe(probe));
        }
        let probe_names = (0..total_probes)
            .map(|i| {
                probe_names_map
                    .remove(&i)
                    .unwrap_or_else(|| format!("Probe{}", i))
            })
            .collect();

        Ok(Self {
            total_probes,
            samplerate,
            samplerate_hz,
            total_samples,
            total_blocks,
            probe_names,
        })
    }
}

/// A `.dsl` capture read block by block
pub struct DslCapture<R> {
    archive: ZipArchive<R>,
    header: DslHeader,
    next_block: u64,
    position: u64,
}

impl DslCapture<File> {
    /// Open a capture file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        info!("Opening DSL capture {}", path.display());
        Self::from_reader(File::open(path)?)
    }
}

impl<R: Read + Seek> DslCapture<R> {
    /// Read a capture from any seekable reader
    pub fn from_reader(reader: R) -> Result<Self, CaptureError> {
        let mut archive = ZipArchive::new(reader)?;

        let mut content = String::new();
        archive
            .by_name("header")
            .map_err(|e| CaptureError::ParseHeader(format!("Cannot find header file: {}", e)))?
            .read_to_string(&mut content)?;
        let header = DslHeader::parse(&content)?;

        info!(
            "DSL capture: {} probes, {} samples in {} blocks at {}",
            header.total_probes, header.total_samples, header.total_blocks, header.samplerate
        );

        Ok(Self {
            archive,
            header,
            next_block: 0,
            position: 0,
        })
    }

    pub fn header(&self) -> &DslHeader {
        &self.header
    }

    /// Sample rate in Hz, for the session's metadata
    pub fn samplerate(&self) -> u64 {
        self.header.samplerate_hz
    }

    /// Probe number of a named probe
    pub fn probe_index(&self, name: &str) -> Option<usize> {
        self.header.probe_names.iter().position(|p| p == name)
    }

    fn read_block(&mut self, probe: usize, block: u64) -> Result<Vec<u8>, CaptureError> {
        let mut file = self
            .archive
            .by_name(&format!("L-{}/{}", probe, block))
            .map_err(|_| CaptureError::InvalidBlock(block))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }
}

impl<R: Read + Seek + Send> SampleSource for DslCapture<R> {
    fn num_lines(&self) -> usize {
        self.header.total_probes
    }

    fn next_chunk(&mut self) -> Result<Option<LogicChunk>, CaptureError> {
        if self.next_block >= self.header.total_blocks || self.position >= self.header.total_samples
        {
            return Ok(None);
        }
        let block = self.next_block;

        let mut lines = Vec::with_capacity(self.header.total_probes);
        let mut block_bits = None;
        for probe in 0..self.header.total_probes {
            let data = self.read_block(probe, block)?;
            let bits = data.len() as u64 * 8;
            match block_bits {
                None => block_bits = Some(bits),
                Some(expected) if expected != bits => return Err(CaptureError::InvalidBlock(block)),
                Some(_) => {}
            }
            lines.push(Arc::<[u8]>::from(data));
        }

        let remaining = self.header.total_samples - self.position;
        let num_samples = block_bits.unwrap_or(0).min(remaining);
        if num_samples == 0 {
            return Err(CaptureError::InvalidBlock(block));
        }

        debug!(
            "Loaded block {} ({} samples at {})",
            block, num_samples, self.position
        );
        let chunk = LogicChunk::new(self.position, num_samples as usize, lines);
        self.position += num_samples;
        self.next_block += 1;
        Ok(Some(chunk))
    }
}
