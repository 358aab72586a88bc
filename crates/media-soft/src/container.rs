//! Sample container file format.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! "DTSC" | version u16 | table_len u32 | track table (JSON array of TrackFormat)
//! { track u32 | flags u32 | pts_us i64 | size u32 | payload }*
//! ```
//!
//! The header is written on `start()`, samples are appended as they arrive,
//! so a file cut short by a crash still yields every complete record.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{ContainerReader, ContainerWriter, SampleFlags, SampleInfo, TrackFormat};

use crate::ResourceLedger;

const MAGIC: &[u8; 4] = b"DTSC";
const VERSION: u16 = 1;
const RECORD_HEADER_LEN: usize = 4 + 4 + 8 + 4;

/// Whether `path` starts with the sample container magic.
pub fn is_sample_file(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut magic))
        .is_ok()
        && &magic == MAGIC
}

/// Append-only writer for the sample container.
pub struct SampleFileWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    tracks: Vec<TrackFormat>,
    started: bool,
    stopped: bool,
    samples_written: u64,
    ledger: Arc<ResourceLedger>,
}

impl SampleFileWriter {
    /// Create the file, truncating any existing content.
    pub fn create(path: &Path, ledger: Arc<ResourceLedger>) -> DuotrackResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path).map_err(|e| {
            DuotrackError::container(format!("Failed to create {}: {e}", path.display()))
        })?;
        ledger.writer_opened();
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            tracks: Vec::new(),
            started: false,
            stopped: false,
            samples_written: 0,
            ledger,
        })
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    fn writer(&mut self) -> DuotrackResult<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| DuotrackError::container("writer already released"))
    }
}

impl ContainerWriter for SampleFileWriter {
    fn add_track(&mut self, format: &TrackFormat) -> DuotrackResult<usize> {
        if self.started {
            return Err(DuotrackError::container(
                "cannot add a track after the writer started",
            ));
        }
        self.tracks.push(format.clone());
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> DuotrackResult<()> {
        if self.started {
            return Err(DuotrackError::container("writer already started"));
        }
        if self.tracks.is_empty() {
            return Err(DuotrackError::container("no tracks added"));
        }
        let table = serde_json::to_vec(&self.tracks)?;
        let writer = self.writer()?;
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&(table.len() as u32).to_le_bytes())?;
        writer.write_all(&table)?;
        self.started = true;
        tracing::debug!(path = %self.path.display(), tracks = self.tracks.len(), "Container started");
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started
    }

    fn write_sample(
        &mut self,
        track: usize,
        data: &[u8],
        info: &SampleInfo,
    ) -> DuotrackResult<()> {
        if !self.started || self.stopped {
            return Err(DuotrackError::container("writer is not accepting samples"));
        }
        if track >= self.tracks.len() {
            return Err(DuotrackError::container(format!("unknown track {track}")));
        }
        let size = info.size.min(data.len());
        let writer = self.writer()?;
        writer.write_all(&(track as u32).to_le_bytes())?;
        writer.write_all(&info.flags.bits().to_le_bytes())?;
        writer.write_all(&info.pts_us.to_le_bytes())?;
        writer.write_all(&(size as u32).to_le_bytes())?;
        writer.write_all(&data[..size])?;
        self.samples_written += 1;
        Ok(())
    }

    fn stop(&mut self) -> DuotrackResult<()> {
        if !self.started {
            return Err(DuotrackError::container("writer was never started"));
        }
        if self.stopped {
            return Ok(());
        }
        let writer = self.writer()?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        self.stopped = true;
        tracing::debug!(
            path = %self.path.display(),
            samples = self.samples_written,
            "Container finalized"
        );
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
            self.ledger.writer_released();
        }
    }
}

impl Drop for SampleFileWriter {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Debug, Clone, Copy)]
struct Record {
    track: usize,
    info: SampleInfo,
    offset: usize,
}

/// Reader for the sample container. Loads the whole file on open.
pub struct SampleFileReader {
    tracks: Vec<TrackFormat>,
    records: Vec<Record>,
    payload: Vec<u8>,
    selected: Vec<bool>,
    cursor: usize,
    released: bool,
    ledger: Arc<ResourceLedger>,
}

impl SampleFileReader {
    pub fn open(path: &Path, ledger: Arc<ResourceLedger>) -> DuotrackResult<Self> {
        if !path.exists() {
            return Err(DuotrackError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        let (tracks, records, payload) = parse(&bytes).map_err(|message| {
            DuotrackError::container(format!("{}: {message}", path.display()))
        })?;
        ledger.reader_opened();
        Ok(Self {
            selected: vec![false; tracks.len()],
            tracks,
            records,
            payload,
            cursor: 0,
            released: false,
            ledger,
        })
    }

    fn current(&self) -> Option<usize> {
        (self.cursor..self.records.len()).find(|&i| self.selected[self.records[i].track])
    }
}

fn parse(bytes: &[u8]) -> Result<(Vec<TrackFormat>, Vec<Record>, Vec<u8>), String> {
    if bytes.len() < 10 || &bytes[..4] != MAGIC {
        return Err("not a sample container".to_string());
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(format!("unsupported container version {version}"));
    }
    let table_len = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    let table_end = 10 + table_len;
    if bytes.len() < table_end {
        return Err("truncated track table".to_string());
    }
    let tracks: Vec<TrackFormat> =
        serde_json::from_slice(&bytes[10..table_end]).map_err(|e| e.to_string())?;

    let mut records = Vec::new();
    let mut payload = Vec::new();
    let mut pos = table_end;
    while pos + RECORD_HEADER_LEN <= bytes.len() {
        let field = |at: usize, len: usize| &bytes[pos + at..pos + at + len];
        let track = u32::from_le_bytes(field(0, 4).try_into().unwrap_or_default()) as usize;
        let flags = u32::from_le_bytes(field(4, 4).try_into().unwrap_or_default());
        let pts_us = i64::from_le_bytes(field(8, 8).try_into().unwrap_or_default());
        let size = u32::from_le_bytes(field(16, 4).try_into().unwrap_or_default()) as usize;
        let data_start = pos + RECORD_HEADER_LEN;
        if data_start + size > bytes.len() {
            tracing::warn!(offset = pos, "Truncated sample record, ignoring tail");
            break;
        }
        if track >= tracks.len() {
            return Err(format!("record references unknown track {track}"));
        }
        records.push(Record {
            track,
            info: SampleInfo {
                pts_us,
                size,
                flags: SampleFlags::from_bits(flags),
            },
            offset: payload.len(),
        });
        payload.extend_from_slice(&bytes[data_start..data_start + size]);
        pos = data_start + size;
    }
    Ok((tracks, records, payload))
}

impl ContainerReader for SampleFileReader {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Option<&TrackFormat> {
        self.tracks.get(index)
    }

    fn select_track(&mut self, index: usize) -> DuotrackResult<()> {
        let slot = self
            .selected
            .get_mut(index)
            .ok_or_else(|| DuotrackError::container(format!("unknown track {index}")))?;
        *slot = true;
        self.cursor = 0;
        Ok(())
    }

    fn unselect_track(&mut self, index: usize) {
        if let Some(slot) = self.selected.get_mut(index) {
            *slot = false;
        }
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> DuotrackResult<Option<SampleInfo>> {
        if self.released {
            return Err(DuotrackError::container("reader already released"));
        }
        let Some(index) = self.current() else {
            return Ok(None);
        };
        let record = self.records[index];
        buf.clear();
        buf.extend_from_slice(&self.payload[record.offset..record.offset + record.info.size]);
        Ok(Some(record.info))
    }

    fn advance(&mut self) -> bool {
        match self.current() {
            Some(index) => {
                self.cursor = index + 1;
                self.current().is_some()
            }
            None => false,
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.payload = Vec::new();
            self.ledger.reader_released();
        }
    }
}

impl Drop for SampleFileReader {
    fn drop(&mut self) {
        self.release();
    }
}
