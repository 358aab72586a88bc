use std::path::Path;

use duotrack_common::error::DuotrackResult;

use crate::codec::Encoder;
use crate::container::{ContainerReader, ContainerWriter};
use crate::format::TrackFormat;
use crate::source::{MicrophoneConfig, MicrophoneSource};

/// Abstract interface for the platform's codec, container and capture facilities.
pub trait MediaBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Configure an encoder session for `format`.
    fn create_encoder(&self, format: &TrackFormat) -> DuotrackResult<Box<dyn Encoder>>;

    /// Open a container writer at `path`, truncating any existing file.
    fn create_writer(&self, path: &Path) -> DuotrackResult<Box<dyn ContainerWriter>>;

    /// Open a container reader on an existing file.
    fn open_reader(&self, path: &Path) -> DuotrackResult<Box<dyn ContainerReader>>;

    /// Open the microphone.
    fn open_microphone(&self, config: &MicrophoneConfig)
        -> DuotrackResult<Box<dyn MicrophoneSource>>;
}
