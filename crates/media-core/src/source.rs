//! Microphone capture contract.

use duotrack_common::error::DuotrackResult;

use crate::format::ChannelLayout;

/// Parameters used to open the microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicrophoneConfig {
    pub sample_rate: u32,
    pub channels: ChannelLayout,
    /// Capture buffer size in bytes.
    pub buffer_size: usize,
}

/// A source of interleaved little-endian 16-bit PCM.
pub trait MicrophoneSource: Send {
    fn start(&mut self) -> DuotrackResult<()>;

    /// Read up to `buf.len()` bytes. `Ok(0)` means nothing is available yet.
    fn read(&mut self, buf: &mut [u8]) -> DuotrackResult<usize>;

    /// Stop capturing and free the device. Idempotent.
    fn release(&mut self);
}
