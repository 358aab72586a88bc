//! [`MediaBackend`] over GStreamer elements found in the GStreamer registry.

use std::path::Path;

use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{
    ContainerReader, ContainerWriter, Encoder, MediaBackend, MicrophoneConfig, MicrophoneSource,
    TrackFormat, TrackType,
};

use crate::container::{Mp4Reader, Mp4Writer};
use crate::encoder::GstEncoder;
use crate::microphone::{GstMicrophone, MicrophoneInput};
use crate::probe::{init_gstreamer, probe_encoders, ProbeReport};

pub struct GstBackend {
    video_encoder: Option<String>,
    audio_encoder: Option<String>,
    microphone: MicrophoneInput,
}

impl GstBackend {
    /// Use the preferred encoders of `report`. Fails when either track has none.
    pub fn from_report(report: &ProbeReport) -> DuotrackResult<Self> {
        let pick = |track: TrackType| {
            report
                .preferred(track)
                .map(|e| e.element.clone())
                .ok_or_else(|| {
                    DuotrackError::unsupported(format!("no GStreamer {track} encoder available"))
                })
        };
        let video = pick(TrackType::Video)?;
        let audio = pick(TrackType::Audio)?;
        tracing::info!(
            %video,
            %audio,
            hardware_video = report.has_hardware_video(),
            "GStreamer backend selected"
        );
        Ok(Self {
            video_encoder: Some(video),
            audio_encoder: Some(audio),
            microphone: MicrophoneInput::default(),
        })
    }

    /// Backend for reading and writing MP4 files only; encoders are refused.
    pub fn containers_only() -> DuotrackResult<Self> {
        init_gstreamer()?;
        Ok(Self {
            video_encoder: None,
            audio_encoder: None,
            microphone: MicrophoneInput::default(),
        })
    }

    /// Search the registry and build a backend from the result.
    pub fn detect() -> DuotrackResult<Self> {
        Self::from_report(&probe_encoders()?)
    }

    pub fn with_microphone(mut self, input: MicrophoneInput) -> Self {
        self.microphone = input;
        self
    }

    pub fn video_encoder(&self) -> Option<&str> {
        self.video_encoder.as_deref()
    }

    pub fn audio_encoder(&self) -> Option<&str> {
        self.audio_encoder.as_deref()
    }
}

impl MediaBackend for GstBackend {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn create_encoder(&self, format: &TrackFormat) -> DuotrackResult<Box<dyn Encoder>> {
        let element = match format {
            TrackFormat::Video(_) => self.video_encoder(),
            TrackFormat::Audio(_) => self.audio_encoder(),
        }
        .ok_or_else(|| {
            DuotrackError::unsupported(format!("no encoder configured for {}", format.mime()))
        })?;
        Ok(Box::new(GstEncoder::configure(element, format)?))
    }

    fn create_writer(&self, path: &Path) -> DuotrackResult<Box<dyn ContainerWriter>> {
        Ok(Box::new(Mp4Writer::create(path)?))
    }

    fn open_reader(&self, path: &Path) -> DuotrackResult<Box<dyn ContainerReader>> {
        Ok(Box::new(Mp4Reader::open(path)?))
    }

    fn open_microphone(
        &self,
        config: &MicrophoneConfig,
    ) -> DuotrackResult<Box<dyn MicrophoneSource>> {
        Ok(Box::new(GstMicrophone::open(self.microphone, config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::collect_available;

    #[test]
    fn hardware_encoder_wins_when_present() {
        let report = collect_available("GStreamer 1.24.0", |name| match name {
            "x264enc" | "nvh264enc" | "avenc_aac" => Some(name.to_string()),
            _ => None,
        });
        let backend = GstBackend::from_report(&report).unwrap();
        assert_eq!(backend.video_encoder(), Some("nvh264enc"));
        assert_eq!(backend.audio_encoder(), Some("avenc_aac"));
        assert_eq!(backend.name(), "gstreamer");
    }

    #[test]
    fn missing_audio_encoder_is_unsupported() {
        let report = collect_available("GStreamer 1.24.0", |name| {
            (name == "x264enc").then(|| name.to_string())
        });
        assert!(matches!(
            GstBackend::from_report(&report),
            Err(DuotrackError::Unsupported { .. })
        ));
    }

    #[test]
    fn container_only_backend_refuses_encoders() {
        let Ok(backend) = GstBackend::containers_only() else {
            return;
        };
        let format = TrackFormat::Audio(duotrack_media_core::AudioFormat {
            mime: duotrack_media_core::MIME_AUDIO_AAC.to_string(),
            sample_rate: 44_100,
            channel_count: 2,
            bit_rate: 128_000,
            max_input_size: 8192,
            codec_config: Vec::new(),
        });
        assert!(matches!(
            backend.create_encoder(&format),
            Err(DuotrackError::Unsupported { .. })
        ));
    }
}
