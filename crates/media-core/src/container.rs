//! Container muxer and demuxer contracts.

use duotrack_common::error::DuotrackResult;

use crate::format::{SampleInfo, TrackFormat};

/// Writes encoded samples of one or more tracks into a container file.
///
/// Tracks are added before [`ContainerWriter::start`]; samples may only be
/// written after it.
pub trait ContainerWriter: Send {
    /// Register a track and return its index.
    fn add_track(&mut self, format: &TrackFormat) -> DuotrackResult<usize>;

    fn start(&mut self) -> DuotrackResult<()>;

    fn is_started(&self) -> bool;

    fn write_sample(&mut self, track: usize, data: &[u8], info: &SampleInfo)
        -> DuotrackResult<()>;

    /// Finalize the file.
    fn stop(&mut self) -> DuotrackResult<()>;

    /// Free the underlying handle. Idempotent.
    fn release(&mut self);
}

/// Reads samples out of a container file.
///
/// Only selected tracks are read. [`ContainerReader::read_sample`] returns the
/// current sample without moving; [`ContainerReader::advance`] moves to the
/// next one.
pub trait ContainerReader: Send {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> Option<&TrackFormat>;

    fn select_track(&mut self, index: usize) -> DuotrackResult<()>;

    fn unselect_track(&mut self, index: usize);

    /// Copy the current sample into `buf`. Returns `None` at end of data.
    fn read_sample(&mut self, buf: &mut Vec<u8>) -> DuotrackResult<Option<SampleInfo>>;

    /// Move to the next sample. Returns false when no samples remain.
    fn advance(&mut self) -> bool;

    /// Free the underlying handle. Idempotent.
    fn release(&mut self);
}
