//! Encoder sessions backed by `appsrc ! <encoder> ! <parser> ! appsink`.
//!
//! Video frames arrive through the input surface as RGBA pixels; audio
//! arrives as interleaved S16LE buffers. The appsink hands back parsed
//! access units, which are replayed through the codec contract: a format
//! change carrying the codec data, one codec-config chunk, the samples,
//! and an empty end-of-stream chunk once the sink has drained.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{
    AudioFormat, EncodedChunk, Encoder, EncoderOutput, FrameSink, InputSurface, RenderedFrame,
    SampleFlags, SampleInfo, TrackFormat, VideoFormat,
};
use gstreamer as gst;
use gstreamer_app as gst_app;

use crate::caps::{profile_name, with_codec_config};
use crate::pipeline::{clock_from_duration, clock_from_us, timed_buffer, LaunchedPipeline};

const BYTES_PER_PIXEL: usize = 4;

/// Encoder element with its rate-control and key-frame properties.
pub fn video_encoder_fragment(element: &str, format: &VideoFormat) -> String {
    let kbps = (format.bit_rate / 1000).max(1);
    let gop = (format.frame_rate * format.i_frame_interval).max(1);
    match element {
        "x264enc" => format!(
            "x264enc bitrate={kbps} key-int-max={gop} tune=zerolatency speed-preset=veryfast \
             ! video/x-h264,profile={}",
            profile_name(format.profile)
        ),
        "openh264enc" => format!("openh264enc bitrate={} gop-size={gop}", format.bit_rate),
        "nvh264enc" | "qsvh264enc" | "mfh264enc" => {
            format!("{element} bitrate={kbps} gop-size={gop}")
        }
        "vah264enc" => format!("vah264enc bitrate={kbps} key-int-max={gop}"),
        "vaapih264enc" => format!("vaapih264enc bitrate={kbps} keyframe-period={gop}"),
        "vtenc_h264" => format!("vtenc_h264 bitrate={kbps} max-keyframe-interval={gop}"),
        other => other.to_string(),
    }
}

pub fn audio_encoder_fragment(element: &str, format: &AudioFormat) -> String {
    match element {
        "fdkaacenc" | "avenc_aac" | "voaacenc" | "faac" => {
            format!("{element} bitrate={}", format.bit_rate)
        }
        other => other.to_string(),
    }
}

pub fn video_encoder_launch(element: &str, format: &VideoFormat) -> String {
    format!(
        "appsrc name=src format=time is-live=false \
         caps=\"video/x-raw,format=RGBA,width={w},height={h},framerate={fps}/1\" \
         ! videoconvert ! {enc} ! h264parse config-interval=-1 \
         ! video/x-h264,stream-format=avc,alignment=au ! appsink name=sink sync=false",
        w = format.width,
        h = format.height,
        fps = format.frame_rate.max(1),
        enc = video_encoder_fragment(element, format),
    )
}

pub fn audio_encoder_launch(element: &str, format: &AudioFormat) -> String {
    format!(
        "appsrc name=src format=time is-live=false \
         caps=\"audio/x-raw,format=S16LE,layout=interleaved,rate={rate},channels={ch}\" \
         ! audioconvert ! audioresample ! {enc} ! aacparse \
         ! audio/mpeg,mpegversion=4,stream-format=raw ! appsink name=sink sync=false",
        rate = format.sample_rate,
        ch = format.channel_count,
        enc = audio_encoder_fragment(element, format),
    )
}

/// Pushes presented frames into the encoder's appsrc.
struct AppSrcFrameSink {
    appsrc: gst_app::AppSrc,
    frame_bytes: usize,
}

impl FrameSink for AppSrcFrameSink {
    fn submit(&self, frame: RenderedFrame) -> DuotrackResult<()> {
        if frame.pixels.len() != self.frame_bytes {
            return Err(DuotrackError::graphics(format!(
                "frame has {} bytes of pixels, encoder expects {}",
                frame.pixels.len(),
                self.frame_bytes
            )));
        }
        let pts = gst::ClockTime::from_nseconds(frame.presentation_time_ns.max(0) as u64);
        self.appsrc
            .push_buffer(timed_buffer(&frame.pixels, pts, true))
            .map_err(|e| DuotrackError::encoder(format!("Video input rejected: {e:?}")))?;
        Ok(())
    }
}

pub struct GstEncoder {
    format: TrackFormat,
    element: String,
    pipeline: LaunchedPipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    pending: VecDeque<EncoderOutput>,
    format_announced: bool,
    input_ended: bool,
    released: bool,
}

impl GstEncoder {
    /// Build the session for `format` around the encoder element `element`.
    pub fn configure(element: &str, format: &TrackFormat) -> DuotrackResult<Self> {
        let launch = match format {
            TrackFormat::Video(v) => video_encoder_launch(element, v),
            TrackFormat::Audio(a) => audio_encoder_launch(element, a),
        };
        let pipeline =
            LaunchedPipeline::from_launch("encoder", &launch, |m| DuotrackError::encoder(m))?;
        let appsrc = pipeline.element::<gst_app::AppSrc>("src")?;
        let appsink = pipeline.element::<gst_app::AppSink>("sink")?;
        tracing::info!(element, mime = format.mime(), "Encoder configured");
        Ok(Self {
            format: format.clone(),
            element: element.to_string(),
            pipeline,
            appsrc,
            appsink,
            pending: VecDeque::new(),
            format_announced: false,
            input_ended: false,
            released: false,
        })
    }

    fn ensure_live(&self) -> DuotrackResult<()> {
        if self.released {
            return Err(DuotrackError::encoder("encoder released"));
        }
        Ok(())
    }

    fn end_input(&mut self) -> DuotrackResult<()> {
        self.ensure_live()?;
        if !self.input_ended {
            self.input_ended = true;
            self.appsrc
                .end_of_stream()
                .map_err(|e| DuotrackError::encoder(format!("End of input rejected: {e:?}")))?;
        }
        Ok(())
    }

    /// Turn a parsed access unit into outputs, announcing the format first.
    fn enqueue_sample(&mut self, sample: &gst::Sample) -> DuotrackResult<()> {
        if !self.format_announced {
            let caps = sample
                .caps()
                .ok_or_else(|| DuotrackError::encoder("encoder output has no caps"))?;
            let format = with_codec_config(&self.format, caps);
            let config = match &format {
                TrackFormat::Video(v) => v.codec_config.clone(),
                TrackFormat::Audio(a) => a.codec_config.clone(),
            };
            self.pending.push_back(EncoderOutput::FormatChanged(format));
            if !config.is_empty() {
                self.pending.push_back(EncoderOutput::Chunk(EncodedChunk {
                    info: SampleInfo {
                        pts_us: 0,
                        size: config.len(),
                        flags: SampleFlags::CODEC_CONFIG,
                    },
                    data: config,
                }));
            }
            self.format_announced = true;
        }

        let buffer = sample
            .buffer()
            .ok_or_else(|| DuotrackError::encoder("encoder output sample has no buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|e| DuotrackError::encoder(format!("Unreadable encoder output: {e}")))?;
        let pts_us = buffer.pts().map_or(0, |t| t.useconds() as i64);
        let flags = if buffer.flags().contains(gst::BufferFlags::DELTA_UNIT) {
            SampleFlags::NONE
        } else {
            SampleFlags::KEY_FRAME
        };
        self.pending.push_back(EncoderOutput::Chunk(EncodedChunk {
            data: map.as_slice().to_vec(),
            info: SampleInfo {
                pts_us,
                size: map.as_slice().len(),
                flags,
            },
        }));
        Ok(())
    }
}

impl Encoder for GstEncoder {
    fn format(&self) -> &TrackFormat {
        &self.format
    }

    fn create_input_surface(&mut self) -> DuotrackResult<InputSurface> {
        self.ensure_live()?;
        let TrackFormat::Video(v) = &self.format else {
            return Err(DuotrackError::unsupported(
                "encoder does not accept surface input",
            ));
        };
        let sink = AppSrcFrameSink {
            appsrc: self.appsrc.clone(),
            frame_bytes: v.width as usize * v.height as usize * BYTES_PER_PIXEL,
        };
        Ok(InputSurface::new(Arc::new(sink), v.width, v.height))
    }

    fn start(&mut self) -> DuotrackResult<()> {
        self.ensure_live()?;
        self.pipeline.play()
    }

    fn queue_input(&mut self, data: &[u8], pts_us: i64, flags: SampleFlags) -> DuotrackResult<()> {
        self.ensure_live()?;
        if !matches!(self.format, TrackFormat::Audio(_)) {
            return Err(DuotrackError::unsupported(
                "encoder does not accept buffer input",
            ));
        }
        if !data.is_empty() {
            self.appsrc
                .push_buffer(timed_buffer(data, clock_from_us(pts_us), true))
                .map_err(|e| DuotrackError::encoder(format!("Audio input rejected: {e:?}")))?;
        }
        if flags.contains(SampleFlags::END_OF_STREAM) {
            self.end_input()?;
        }
        Ok(())
    }

    fn signal_end_of_input(&mut self) -> DuotrackResult<()> {
        self.end_input()
    }

    fn dequeue_output(&mut self, timeout: Duration) -> DuotrackResult<EncoderOutput> {
        self.ensure_live()?;
        if let Some(output) = self.pending.pop_front() {
            return Ok(output);
        }
        self.pipeline.check_bus()?;

        match self.appsink.try_pull_sample(clock_from_duration(timeout)) {
            Some(sample) => {
                self.enqueue_sample(&sample)?;
                Ok(self
                    .pending
                    .pop_front()
                    .unwrap_or(EncoderOutput::TryAgainLater))
            }
            None if self.appsink.is_eos() => Ok(EncoderOutput::Chunk(EncodedChunk {
                data: Vec::new(),
                info: SampleInfo {
                    pts_us: 0,
                    size: 0,
                    flags: SampleFlags::END_OF_STREAM,
                },
            })),
            None => Ok(EncoderOutput::TryAgainLater),
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.pending.clear();
            self.pipeline.shut_down();
            tracing::debug!(element = %self.element, "Encoder released");
        }
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duotrack_media_core::{AvcLevel, AvcProfile, MIME_AUDIO_AAC, MIME_VIDEO_AVC};

    fn video() -> VideoFormat {
        VideoFormat {
            mime: MIME_VIDEO_AVC.to_string(),
            width: 320,
            height: 240,
            bit_rate: 2_000_000,
            frame_rate: 30,
            i_frame_interval: 1,
            profile: AvcProfile::High,
            level: AvcLevel::Level31,
            codec_config: Vec::new(),
        }
    }

    fn audio() -> AudioFormat {
        AudioFormat {
            mime: MIME_AUDIO_AAC.to_string(),
            sample_rate: 44_100,
            channel_count: 2,
            bit_rate: 128_000,
            max_input_size: 8192,
            codec_config: Vec::new(),
        }
    }

    fn have(elements: &[&str]) -> bool {
        crate::probe::init_gstreamer().is_ok()
            && elements
                .iter()
                .all(|e| gst::ElementFactory::find(e).is_some())
    }

    #[test]
    fn x264_rate_control_is_in_kbps() {
        let fragment = video_encoder_fragment("x264enc", &video());
        assert!(fragment.starts_with("x264enc bitrate=2000 key-int-max=30"));
        assert!(fragment.ends_with("video/x-h264,profile=high"));
    }

    #[test]
    fn aac_rate_control_is_in_bps() {
        assert_eq!(
            audio_encoder_fragment("avenc_aac", &audio()),
            "avenc_aac bitrate=128000"
        );
        assert_eq!(audio_encoder_fragment("someaacenc", &audio()), "someaacenc");
    }

    #[test]
    fn launch_strings_frame_the_encoder_with_appsrc_and_appsink() {
        let launch = video_encoder_launch("vah264enc", &video());
        assert!(launch.starts_with("appsrc name=src format=time"));
        assert!(launch.contains("format=RGBA,width=320,height=240,framerate=30/1"));
        assert!(launch.contains("vah264enc bitrate=2000 key-int-max=30"));
        assert!(launch.ends_with("appsink name=sink sync=false"));

        let launch = audio_encoder_launch("fdkaacenc", &audio());
        assert!(launch.contains("rate=44100,channels=2"));
        assert!(launch.contains("stream-format=raw"));
    }

    #[test]
    fn audio_encoder_announces_format_then_reaches_end_of_stream() {
        if !have(&["appsrc", "appsink", "audioconvert", "audioresample", "avenc_aac", "aacparse"]) {
            return;
        }
        let format = TrackFormat::Audio(audio());
        let mut encoder = GstEncoder::configure("avenc_aac", &format).unwrap();
        encoder.start().unwrap();
        let second = vec![0u8; 44_100 * 4];
        encoder.queue_input(&second, 0, SampleFlags::NONE).unwrap();
        encoder
            .queue_input(&[], 1_000_000, SampleFlags::END_OF_STREAM)
            .unwrap();

        let mut outputs = Vec::new();
        loop {
            match encoder.dequeue_output(Duration::from_secs(5)).unwrap() {
                EncoderOutput::TryAgainLater => panic!("encoder stalled"),
                EncoderOutput::Chunk(chunk) if chunk.is_end_of_stream() => break,
                other => outputs.push(other),
            }
        }
        assert!(matches!(outputs[0], EncoderOutput::FormatChanged(_)));
        let samples = outputs
            .iter()
            .filter(|o| matches!(o, EncoderOutput::Chunk(c) if !c.is_codec_config()))
            .count();
        assert!(samples > 30, "{samples} AAC frames");
        encoder.release();
        assert!(encoder.dequeue_output(Duration::ZERO).is_err());
    }

    #[test]
    fn surface_rejects_frames_of_the_wrong_size() {
        if !have(&["appsrc", "appsink", "videoconvert", "x264enc", "h264parse"]) {
            return;
        }
        let mut encoder = GstEncoder::configure("x264enc", &TrackFormat::Video(video())).unwrap();
        let surface = encoder.create_input_surface().unwrap();
        let frame = RenderedFrame {
            width: 320,
            height: 240,
            texture: duotrack_media_core::TextureId(1),
            presentation_time_ns: 0,
            pixels: vec![0; 4],
        };
        assert!(surface.submit(frame).is_err());
        encoder.release();
    }
}
