//! Software encoders.
//!
//! Both encoders are pass-through: the "bitstream" is the raw input payload
//! wrapped in encoder output chunks. What they reproduce faithfully is the
//! codec session protocol: format change before the first chunk, a
//! codec-config chunk, key-frame flags, and an end-of-stream chunk.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{
    EncodedChunk, Encoder, EncoderOutput, FrameSink, InputSurface, RenderedFrame, SampleFlags,
    SampleInfo, TrackFormat,
};
use parking_lot::{Condvar, Mutex};

use crate::{FaultPlan, ResourceLedger};

/// Codec-specific data emitted by the software AVC encoder.
const AVC_CODEC_CONFIG: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x1f];

/// Codec-specific data emitted by the software AAC encoder (AAC-LC, 44.1 kHz, stereo).
const AAC_CODEC_CONFIG: &[u8] = &[0x12, 0x10];

#[derive(Default)]
struct FrameQueue {
    frames: Mutex<VecDeque<RenderedFrame>>,
    available: Condvar,
}

impl FrameSink for FrameQueue {
    fn submit(&self, frame: RenderedFrame) -> DuotrackResult<()> {
        self.frames.lock().push_back(frame);
        self.available.notify_one();
        Ok(())
    }
}

impl FrameQueue {
    fn pop(&self, timeout: Duration) -> Option<RenderedFrame> {
        let mut frames = self.frames.lock();
        if frames.is_empty() && !timeout.is_zero() {
            self.available.wait_for(&mut frames, timeout);
        }
        frames.pop_front()
    }
}

/// Where an encoder is in its output protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputPhase {
    AnnounceFormat,
    CodecConfig,
    Streaming,
    Ended,
}

/// Surface-input video encoder.
pub struct SoftwareVideoEncoder {
    format: TrackFormat,
    queue: Arc<FrameQueue>,
    surface_created: bool,
    started: bool,
    input_ended: bool,
    phase: OutputPhase,
    frames_encoded: u64,
    key_interval: u64,
    faults: FaultPlan,
    released: bool,
    ledger: Arc<ResourceLedger>,
}

impl SoftwareVideoEncoder {
    pub(crate) fn configure(
        format: &TrackFormat,
        faults: FaultPlan,
        ledger: Arc<ResourceLedger>,
    ) -> DuotrackResult<Self> {
        let video = format
            .as_video()
            .ok_or_else(|| DuotrackError::configuration("video encoder needs a video format"))?;
        if faults.reject_video_config {
            return Err(DuotrackError::configuration(format!(
                "encoder rejected {}x{} @ {} bps",
                video.width, video.height, video.bit_rate
            )));
        }
        if video.width == 0 || video.height == 0 || video.width % 2 != 0 || video.height % 2 != 0 {
            return Err(DuotrackError::configuration(format!(
                "unsupported dimensions {}x{}",
                video.width, video.height
            )));
        }
        if video.frame_rate == 0 {
            return Err(DuotrackError::configuration("frame rate must be positive"));
        }
        let key_interval = (video.frame_rate as u64 * video.i_frame_interval.max(1) as u64).max(1);
        ledger.encoder_opened();
        Ok(Self {
            format: format.clone(),
            queue: Arc::new(FrameQueue::default()),
            surface_created: false,
            started: false,
            input_ended: false,
            phase: OutputPhase::AnnounceFormat,
            frames_encoded: 0,
            key_interval,
            faults,
            released: false,
            ledger,
        })
    }

    fn output_format(&self) -> TrackFormat {
        let mut format = self.format.clone();
        if let TrackFormat::Video(video) = &mut format {
            video.codec_config = AVC_CODEC_CONFIG.to_vec();
        }
        format
    }
}

impl Encoder for SoftwareVideoEncoder {
    fn format(&self) -> &TrackFormat {
        &self.format
    }

    fn create_input_surface(&mut self) -> DuotrackResult<InputSurface> {
        if self.started {
            return Err(DuotrackError::encoder(
                "input surface must be created before start",
            ));
        }
        let (width, height) = self
            .format
            .as_video()
            .map(|v| (v.width, v.height))
            .unwrap_or_default();
        self.surface_created = true;
        Ok(InputSurface::new(self.queue.clone(), width, height))
    }

    fn start(&mut self) -> DuotrackResult<()> {
        if !self.surface_created {
            return Err(DuotrackError::encoder("no input surface configured"));
        }
        self.started = true;
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> DuotrackResult<()> {
        if !self.started {
            return Err(DuotrackError::encoder("encoder not started"));
        }
        self.input_ended = true;
        Ok(())
    }

    fn dequeue_output(&mut self, timeout: Duration) -> DuotrackResult<EncoderOutput> {
        if self.released || !self.started {
            return Err(DuotrackError::encoder("encoder is not running"));
        }
        match self.phase {
            OutputPhase::AnnounceFormat => {
                self.phase = OutputPhase::CodecConfig;
                return Ok(EncoderOutput::FormatChanged(self.output_format()));
            }
            OutputPhase::CodecConfig => {
                self.phase = OutputPhase::Streaming;
                return Ok(EncoderOutput::Chunk(EncodedChunk {
                    data: AVC_CODEC_CONFIG.to_vec(),
                    info: SampleInfo {
                        pts_us: 0,
                        size: AVC_CODEC_CONFIG.len(),
                        flags: SampleFlags::CODEC_CONFIG,
                    },
                }));
            }
            OutputPhase::Ended => return Ok(EncoderOutput::TryAgainLater),
            OutputPhase::Streaming => {}
        }

        if let Some(limit) = self.faults.fail_video_after_frames {
            if self.frames_encoded >= limit {
                return Err(DuotrackError::encoder(format!(
                    "hardware encoder fault after {limit} frames"
                )));
            }
        }

        if let Some(frame) = self.queue.pop(timeout) {
            let flags = if self.frames_encoded % self.key_interval == 0 {
                SampleFlags::KEY_FRAME
            } else {
                SampleFlags::NONE
            };
            self.frames_encoded += 1;
            let mut data = Vec::with_capacity(12 + frame.pixels.len());
            data.extend_from_slice(&frame.texture.0.to_le_bytes());
            data.extend_from_slice(&frame.width.to_le_bytes());
            data.extend_from_slice(&frame.height.to_le_bytes());
            data.extend_from_slice(&frame.pixels);
            return Ok(EncoderOutput::Chunk(EncodedChunk {
                info: SampleInfo {
                    pts_us: frame.presentation_time_ns / 1_000,
                    size: data.len(),
                    flags,
                },
                data,
            }));
        }

        if self.input_ended && !self.faults.stall_video_eos {
            self.phase = OutputPhase::Ended;
            return Ok(EncoderOutput::Chunk(EncodedChunk {
                data: Vec::new(),
                info: SampleInfo {
                    pts_us: 0,
                    size: 0,
                    flags: SampleFlags::END_OF_STREAM,
                },
            }));
        }
        Ok(EncoderOutput::TryAgainLater)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.queue.frames.lock().clear();
            self.ledger.encoder_released();
        }
    }
}

impl Drop for SoftwareVideoEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Buffer-input audio encoder.
pub struct SoftwareAudioEncoder {
    format: TrackFormat,
    max_input_size: usize,
    pending: VecDeque<EncodedChunk>,
    started: bool,
    input_ended: bool,
    phase: OutputPhase,
    released: bool,
    ledger: Arc<ResourceLedger>,
}

impl SoftwareAudioEncoder {
    pub(crate) fn configure(
        format: &TrackFormat,
        faults: FaultPlan,
        ledger: Arc<ResourceLedger>,
    ) -> DuotrackResult<Self> {
        let audio = format
            .as_audio()
            .ok_or_else(|| DuotrackError::configuration("audio encoder needs an audio format"))?;
        if faults.reject_audio_config {
            return Err(DuotrackError::configuration(format!(
                "encoder rejected {} Hz x{} @ {} bps",
                audio.sample_rate, audio.channel_count, audio.bit_rate
            )));
        }
        if audio.sample_rate == 0 || audio.channel_count == 0 || audio.max_input_size == 0 {
            return Err(DuotrackError::configuration(format!(
                "unsupported audio format {} Hz x{}",
                audio.sample_rate, audio.channel_count
            )));
        }
        ledger.encoder_opened();
        Ok(Self {
            max_input_size: audio.max_input_size,
            format: format.clone(),
            pending: VecDeque::new(),
            started: false,
            input_ended: false,
            phase: OutputPhase::AnnounceFormat,
            released: false,
            ledger,
        })
    }

    fn output_format(&self) -> TrackFormat {
        let mut format = self.format.clone();
        if let TrackFormat::Audio(audio) = &mut format {
            audio.codec_config = AAC_CODEC_CONFIG.to_vec();
        }
        format
    }
}

impl Encoder for SoftwareAudioEncoder {
    fn format(&self) -> &TrackFormat {
        &self.format
    }

    fn start(&mut self) -> DuotrackResult<()> {
        self.started = true;
        Ok(())
    }

    fn queue_input(&mut self, data: &[u8], pts_us: i64, flags: SampleFlags) -> DuotrackResult<()> {
        if !self.started || self.released {
            return Err(DuotrackError::encoder("encoder is not running"));
        }
        if self.input_ended {
            return Err(DuotrackError::encoder("input already ended"));
        }
        if data.len() > self.max_input_size {
            return Err(DuotrackError::encoder(format!(
                "input of {} bytes exceeds max input size {}",
                data.len(),
                self.max_input_size
            )));
        }
        if flags.contains(SampleFlags::END_OF_STREAM) {
            self.input_ended = true;
        }
        if !data.is_empty() {
            self.pending.push_back(EncodedChunk {
                data: data.to_vec(),
                info: SampleInfo {
                    pts_us,
                    size: data.len(),
                    flags: SampleFlags::KEY_FRAME,
                },
            });
        }
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> DuotrackResult<()> {
        Err(DuotrackError::unsupported(
            "buffer-input encoders end with an empty end-of-stream buffer",
        ))
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> DuotrackResult<EncoderOutput> {
        if self.released || !self.started {
            return Err(DuotrackError::encoder("encoder is not running"));
        }
        match self.phase {
            OutputPhase::AnnounceFormat => {
                self.phase = OutputPhase::CodecConfig;
                Ok(EncoderOutput::FormatChanged(self.output_format()))
            }
            OutputPhase::CodecConfig => {
                self.phase = OutputPhase::Streaming;
                Ok(EncoderOutput::Chunk(EncodedChunk {
                    data: AAC_CODEC_CONFIG.to_vec(),
                    info: SampleInfo {
                        pts_us: 0,
                        size: AAC_CODEC_CONFIG.len(),
                        flags: SampleFlags::CODEC_CONFIG,
                    },
                }))
            }
            OutputPhase::Streaming => match self.pending.pop_front() {
                Some(chunk) => Ok(EncoderOutput::Chunk(chunk)),
                None if self.input_ended => {
                    self.phase = OutputPhase::Ended;
                    Ok(EncoderOutput::Chunk(EncodedChunk {
                        data: Vec::new(),
                        info: SampleInfo {
                            pts_us: 0,
                            size: 0,
                            flags: SampleFlags::END_OF_STREAM,
                        },
                    }))
                }
                None => Ok(EncoderOutput::TryAgainLater),
            },
            OutputPhase::Ended => Ok(EncoderOutput::TryAgainLater),
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.pending.clear();
            self.ledger.encoder_released();
        }
    }
}

impl Drop for SoftwareAudioEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duotrack_media_core::{
        AudioFormat, AvcLevel, AvcProfile, TextureId, VideoFormat, MIME_AUDIO_AAC, MIME_VIDEO_AVC,
    };

    fn video_format() -> TrackFormat {
        TrackFormat::Video(VideoFormat {
            mime: MIME_VIDEO_AVC.to_string(),
            width: 720,
            height: 1280,
            bit_rate: 6_000_000,
            frame_rate: 2,
            i_frame_interval: 1,
            profile: AvcProfile::High,
            level: AvcLevel::Level31,
            codec_config: Vec::new(),
        })
    }

    fn frame(ts_ns: i64) -> RenderedFrame {
        RenderedFrame {
            width: 720,
            height: 1280,
            texture: TextureId(3),
            presentation_time_ns: ts_ns,
            pixels: vec![0xAB; 4],
        }
    }

    #[test]
    fn video_session_follows_codec_protocol() {
        let ledger = Arc::new(ResourceLedger::default());
        let mut encoder =
            SoftwareVideoEncoder::configure(&video_format(), FaultPlan::default(), ledger.clone())
                .unwrap();
        let surface = encoder.create_input_surface().unwrap();
        encoder.start().unwrap();
        for i in 0..3 {
            surface.submit(frame((i + 1) * 1_000_000)).unwrap();
        }

        let timeout = Duration::ZERO;
        assert!(matches!(
            encoder.dequeue_output(timeout).unwrap(),
            EncoderOutput::FormatChanged(TrackFormat::Video(ref v)) if !v.codec_config.is_empty()
        ));
        match encoder.dequeue_output(timeout).unwrap() {
            EncoderOutput::Chunk(chunk) => assert!(chunk.is_codec_config()),
            other => panic!("expected codec config, got {other:?}"),
        }

        let mut key_frames = Vec::new();
        for _ in 0..3 {
            match encoder.dequeue_output(timeout).unwrap() {
                EncoderOutput::Chunk(chunk) => {
                    key_frames.push(chunk.info.flags.contains(SampleFlags::KEY_FRAME))
                }
                other => panic!("expected frame, got {other:?}"),
            }
        }
        assert_eq!(key_frames, vec![true, false, true]);
        assert_eq!(encoder.dequeue_output(timeout).unwrap(), EncoderOutput::TryAgainLater);

        encoder.signal_end_of_input().unwrap();
        match encoder.dequeue_output(timeout).unwrap() {
            EncoderOutput::Chunk(chunk) => assert!(chunk.is_end_of_stream()),
            other => panic!("expected end of stream, got {other:?}"),
        }
        encoder.release();
        assert_eq!(ledger.snapshot().encoders_open, 0);
    }

    #[test]
    fn odd_dimensions_are_rejected() {
        let mut format = video_format();
        if let TrackFormat::Video(v) = &mut format {
            v.width = 721;
        }
        let result = SoftwareVideoEncoder::configure(
            &format,
            FaultPlan::default(),
            Arc::new(ResourceLedger::default()),
        );
        assert!(matches!(result, Err(DuotrackError::Configuration { .. })));
    }

    #[test]
    fn audio_input_larger_than_max_is_rejected() {
        let format = TrackFormat::Audio(AudioFormat {
            mime: MIME_AUDIO_AAC.to_string(),
            sample_rate: 44_100,
            channel_count: 2,
            bit_rate: 128_000,
            max_input_size: 8,
            codec_config: Vec::new(),
        });
        let mut encoder = SoftwareAudioEncoder::configure(
            &format,
            FaultPlan::default(),
            Arc::new(ResourceLedger::default()),
        )
        .unwrap();
        encoder.start().unwrap();
        assert!(encoder.queue_input(&[0; 9], 0, SampleFlags::NONE).is_err());
        encoder.queue_input(&[0; 8], 0, SampleFlags::NONE).unwrap();
        encoder.queue_input(&[], 45, SampleFlags::END_OF_STREAM).unwrap();
        assert!(encoder.queue_input(&[0; 2], 90, SampleFlags::NONE).is_err());
    }
}
