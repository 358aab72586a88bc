//! Playback-speed resampling of 16-bit PCM.
//!
//! A speed factor `s` is a resampling ratio of `1 / s` at an unchanged
//! sample rate: the stream gets shorter (`s > 1`) or longer (`s < 1`).
//! Input is split into planar `f32` channels and handed to a band-limited
//! sinc resampler in fixed-size chunks, so the result depends only on the
//! PCM stream and never on how the capture loop happened to slice it.

use duotrack_common::error::{DuotrackError, DuotrackResult};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const BYTES_PER_SAMPLE: usize = 2;

/// Frames handed to the resampler per call.
const CHUNK_FRAMES: usize = 1024;

const SAMPLE_SCALE: f32 = 32768.0;

fn resampler_params() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    }
}

pub struct SpeedTranscoder {
    /// `None` at speed 1.0.
    resampler: Option<SincFixedIn<f32>>,
    ratio: f64,
    channels: usize,
    /// Planar input not yet resampled.
    planar: Vec<Vec<f32>>,
    /// Trailing bytes of an incomplete frame.
    partial: Vec<u8>,
    /// Leading resampler output still to discard.
    delay_frames: usize,
    frames_in: u64,
    frames_out: u64,
    output: Vec<u8>,
    ended: bool,
}

impl SpeedTranscoder {
    pub fn new(sample_rate: u32, channels: u16, speed: f64) -> DuotrackResult<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(DuotrackError::configuration(format!(
                "invalid transcoder input {sample_rate} Hz x{channels}"
            )));
        }
        if !speed.is_finite() || speed <= 0.0 {
            return Err(DuotrackError::configuration(format!(
                "invalid speed factor {speed}"
            )));
        }
        let ratio = 1.0 / speed;
        let resampler = if speed == 1.0 {
            None
        } else {
            let resampler = SincFixedIn::<f32>::new(
                ratio,
                1.0,
                resampler_params(),
                CHUNK_FRAMES,
                channels as usize,
            )
            .map_err(|e| DuotrackError::configuration(format!("Resampler error: {e}")))?;
            Some(resampler)
        };
        let delay_frames = resampler.as_ref().map_or(0, |r| r.output_delay());
        tracing::debug!(sample_rate, channels, speed, delay_frames, "Speed transcoder configured");
        Ok(Self {
            resampler,
            ratio,
            channels: channels as usize,
            planar: vec![Vec::new(); channels as usize],
            partial: Vec::new(),
            delay_frames,
            frames_in: 0,
            frames_out: 0,
            output: Vec::new(),
            ended: false,
        })
    }

    fn frame_bytes(&self) -> usize {
        self.channels * BYTES_PER_SAMPLE
    }

    /// Append little-endian interleaved PCM.
    pub fn queue_input(&mut self, pcm: &[u8]) -> DuotrackResult<()> {
        if self.ended {
            return Err(DuotrackError::audio("transcoder input already ended"));
        }
        if self.resampler.is_none() {
            self.output.extend_from_slice(pcm);
            return Ok(());
        }

        self.partial.extend_from_slice(pcm);
        let whole = self.partial.len() / self.frame_bytes() * self.frame_bytes();
        for (i, b) in self.partial[..whole].chunks_exact(BYTES_PER_SAMPLE).enumerate() {
            let sample = i16::from_le_bytes([b[0], b[1]]);
            self.planar[i % self.channels].push(sample as f32 / SAMPLE_SCALE);
        }
        self.frames_in += (whole / self.frame_bytes()) as u64;
        self.partial.drain(..whole);
        self.process_chunks()
    }

    /// Move all produced PCM into `out`. Returns the number of bytes moved.
    pub fn get_output(&mut self, out: &mut Vec<u8>) -> usize {
        let n = self.output.len();
        out.append(&mut self.output);
        n
    }

    /// No more input will arrive; emit the tail.
    pub fn end_of_stream(&mut self) -> DuotrackResult<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };

        let expected = (self.frames_in as f64 * self.ratio).round() as u64;
        let tail = std::mem::replace(&mut self.planar, vec![Vec::new(); self.channels]);
        let produced = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(resample_error)?;
        self.emit(&produced, expected);
        while self.frames_out < expected {
            let Some(resampler) = self.resampler.as_mut() else {
                break;
            };
            let produced = resampler
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(resample_error)?;
            if produced.first().map_or(true, Vec::is_empty) {
                break;
            }
            self.emit(&produced, expected);
        }
        self.partial.clear();
        Ok(())
    }

    /// Discard everything buffered and accept input again.
    pub fn flush(&mut self) {
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
            self.delay_frames = resampler.output_delay();
        }
        self.planar.iter_mut().for_each(Vec::clear);
        self.partial.clear();
        self.output.clear();
        self.frames_in = 0;
        self.frames_out = 0;
        self.ended = false;
    }

    fn process_chunks(&mut self) -> DuotrackResult<()> {
        loop {
            let Some(resampler) = self.resampler.as_mut() else {
                return Ok(());
            };
            let needed = resampler.input_frames_next();
            if self.planar[0].len() < needed {
                return Ok(());
            }
            let chunk: Vec<&[f32]> = self.planar.iter().map(|c| &c[..needed]).collect();
            let produced = resampler.process(&chunk, None).map_err(resample_error)?;
            self.planar.iter_mut().for_each(|c| {
                c.drain(..needed);
            });
            self.emit(&produced, u64::MAX);
        }
    }

    /// Interleave resampler output after the initial delay, up to `limit`
    /// frames in total.
    fn emit(&mut self, planar: &[Vec<f32>], limit: u64) {
        let frames = planar.first().map_or(0, Vec::len);
        let skip = self.delay_frames.min(frames);
        self.delay_frames -= skip;
        for frame in skip..frames {
            if self.frames_out >= limit {
                break;
            }
            for channel in planar {
                let sample = (channel[frame] * SAMPLE_SCALE)
                    .round()
                    .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                self.output.extend_from_slice(&sample.to_le_bytes());
            }
            self.frames_out += 1;
        }
    }
}

fn resample_error(e: rubato::ResampleError) -> DuotrackError {
    DuotrackError::audio(format!("Resample failed: {e}"))
}
