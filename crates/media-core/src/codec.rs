//! Encoder session contract.
//!
//! Mirrors the lifecycle of a hardware codec: the session is configured by
//! [`MediaBackend::create_encoder`](crate::MediaBackend::create_encoder),
//! started, fed through an input surface (video) or input buffers (audio),
//! and drained by polling [`Encoder::dequeue_output`] until it reports a
//! chunk flagged [`SampleFlags::END_OF_STREAM`].

use std::time::Duration;

use duotrack_common::error::{DuotrackError, DuotrackResult};

use crate::format::{SampleFlags, SampleInfo, TrackFormat};
use crate::graphics::InputSurface;

/// One encoded access unit handed out by the encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    pub info: SampleInfo,
}

impl EncodedChunk {
    pub fn is_codec_config(&self) -> bool {
        self.info.flags.contains(SampleFlags::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.info.flags.contains(SampleFlags::END_OF_STREAM)
    }
}

/// Result of polling the encoder's output side.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderOutput {
    /// Nothing is ready within the timeout.
    TryAgainLater,
    /// The output format is now known; a muxer track can be added.
    FormatChanged(TrackFormat),
    /// An encoded chunk (possibly empty and flagged end-of-stream).
    Chunk(EncodedChunk),
}

/// A configured codec session.
pub trait Encoder: Send {
    /// The format the session was configured with.
    fn format(&self) -> &TrackFormat;

    /// Create the surface that feeds rendered frames into a video encoder.
    /// Must be called before [`Encoder::start`].
    fn create_input_surface(&mut self) -> DuotrackResult<InputSurface> {
        Err(DuotrackError::unsupported(
            "encoder does not accept surface input",
        ))
    }

    /// Begin accepting input.
    fn start(&mut self) -> DuotrackResult<()>;

    /// Queue a raw input buffer (buffer-input encoders only). An empty
    /// buffer flagged end-of-stream terminates the input.
    fn queue_input(&mut self, _data: &[u8], _pts_us: i64, _flags: SampleFlags) -> DuotrackResult<()> {
        Err(DuotrackError::unsupported(
            "encoder does not accept buffer input",
        ))
    }

    /// Signal end of input for surface-fed encoders.
    fn signal_end_of_input(&mut self) -> DuotrackResult<()>;

    /// Poll for output, waiting up to `timeout`.
    fn dequeue_output(&mut self, timeout: Duration) -> DuotrackResult<EncoderOutput>;

    /// Stop the session and free its hardware resources. Idempotent.
    fn release(&mut self);
}
