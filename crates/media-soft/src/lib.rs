//! duotrack software media backend.
//!
//! A deterministic implementation of every media contract:
//! pass-through encoders, a simple sample container file, a CPU graphics
//! context and a synthetic microphone. It drives the recording engine in
//! tests and in the CLI demo, and can inject the hardware faults the engine
//! must survive (rejected configurations, mid-session encoder errors, an
//! encoder that never signals end-of-stream).

pub mod container;
pub mod encoder;
pub mod graphics;
pub mod microphone;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use duotrack_common::error::DuotrackResult;
use duotrack_media_core::{
    ContainerReader, ContainerWriter, Encoder, MediaBackend, MicrophoneConfig, MicrophoneSource,
    TrackFormat,
};
use parking_lot::Mutex;

pub use container::{is_sample_file, SampleFileReader, SampleFileWriter};
pub use encoder::{SoftwareAudioEncoder, SoftwareVideoEncoder};
pub use graphics::SoftwareGraphics;
pub use microphone::{MicrophoneSignal, SyntheticMicrophone};

/// Hardware faults to simulate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Video encoder configuration fails.
    pub reject_video_config: bool,
    /// Audio encoder configuration fails.
    pub reject_audio_config: bool,
    /// Microphone cannot be opened.
    pub microphone_unavailable: bool,
    /// Video encoder errors once this many frames were encoded.
    pub fail_video_after_frames: Option<u64>,
    /// Video encoder never reports end-of-stream.
    pub stall_video_eos: bool,
}

/// Counts of open/released handles, for leak checks.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    encoders: Counter,
    writers: Counter,
    readers: Counter,
    microphones: Counter,
    surfaces: Counter,
}

#[derive(Debug, Default)]
struct Counter {
    opened: AtomicUsize,
    released: AtomicUsize,
}

impl Counter {
    fn open(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn outstanding(&self) -> usize {
        self.opened
            .load(Ordering::SeqCst)
            .saturating_sub(self.released.load(Ordering::SeqCst))
    }
}

/// Outstanding handles at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub encoders_open: usize,
    pub writers_open: usize,
    pub readers_open: usize,
    pub microphones_open: usize,
    pub surfaces_open: usize,
    pub encoders_created: usize,
}

impl LedgerSnapshot {
    /// Whether every handle ever opened has been released.
    pub fn all_released(&self) -> bool {
        self.encoders_open == 0
            && self.writers_open == 0
            && self.readers_open == 0
            && self.microphones_open == 0
            && self.surfaces_open == 0
    }
}

impl ResourceLedger {
    pub(crate) fn encoder_opened(&self) {
        self.encoders.open();
    }
    pub(crate) fn encoder_released(&self) {
        self.encoders.release();
    }
    pub(crate) fn writer_opened(&self) {
        self.writers.open();
    }
    pub(crate) fn writer_released(&self) {
        self.writers.release();
    }
    pub(crate) fn reader_opened(&self) {
        self.readers.open();
    }
    pub(crate) fn reader_released(&self) {
        self.readers.release();
    }
    pub(crate) fn microphone_opened(&self) {
        self.microphones.open();
    }
    pub(crate) fn microphone_released(&self) {
        self.microphones.release();
    }
    pub(crate) fn surface_opened(&self) {
        self.surfaces.open();
    }
    pub(crate) fn surface_released(&self) {
        self.surfaces.release();
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            encoders_open: self.encoders.outstanding(),
            writers_open: self.writers.outstanding(),
            readers_open: self.readers.outstanding(),
            microphones_open: self.microphones.outstanding(),
            surfaces_open: self.surfaces.outstanding(),
            encoders_created: self.encoders.opened.load(Ordering::SeqCst),
        }
    }
}

/// [`MediaBackend`] built from the software components.
pub struct SoftwareBackend {
    faults: Mutex<FaultPlan>,
    signal: Mutex<MicrophoneSignal>,
    ledger: Arc<ResourceLedger>,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            faults: Mutex::new(FaultPlan::default()),
            signal: Mutex::new(MicrophoneSignal::default()),
            ledger: Arc::new(ResourceLedger::default()),
        }
    }

    pub fn with_faults(self, faults: FaultPlan) -> Self {
        *self.faults.lock() = faults;
        self
    }

    pub fn with_microphone(self, signal: MicrophoneSignal) -> Self {
        *self.signal.lock() = signal;
        self
    }

    /// Replace the fault plan for encoders created from now on.
    pub fn set_faults(&self, faults: FaultPlan) {
        *self.faults.lock() = faults;
    }

    /// Graphics context sharing this backend's ledger.
    pub fn graphics(&self) -> SoftwareGraphics {
        SoftwareGraphics::new(self.ledger.clone())
    }

    pub fn ledger(&self) -> Arc<ResourceLedger> {
        self.ledger.clone()
    }
}

impl MediaBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn create_encoder(&self, format: &TrackFormat) -> DuotrackResult<Box<dyn Encoder>> {
        let faults = self.faults.lock().clone();
        match format {
            TrackFormat::Video(_) => Ok(Box::new(SoftwareVideoEncoder::configure(
                format,
                faults,
                self.ledger.clone(),
            )?)),
            TrackFormat::Audio(_) => Ok(Box::new(SoftwareAudioEncoder::configure(
                format,
                faults,
                self.ledger.clone(),
            )?)),
        }
    }

    fn create_writer(&self, path: &Path) -> DuotrackResult<Box<dyn ContainerWriter>> {
        Ok(Box::new(SampleFileWriter::create(path, self.ledger.clone())?))
    }

    fn open_reader(&self, path: &Path) -> DuotrackResult<Box<dyn ContainerReader>> {
        Ok(Box::new(SampleFileReader::open(path, self.ledger.clone())?))
    }

    fn open_microphone(
        &self,
        config: &MicrophoneConfig,
    ) -> DuotrackResult<Box<dyn MicrophoneSource>> {
        if self.faults.lock().microphone_unavailable {
            return Err(duotrack_common::error::DuotrackError::audio(
                "microphone is in use by another client",
            ));
        }
        let signal = *self.signal.lock();
        Ok(Box::new(SyntheticMicrophone::open(
            config,
            signal,
            self.ledger.clone(),
        )?))
    }
}
