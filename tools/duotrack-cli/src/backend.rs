//! Media backend selection.

use std::path::Path;
use std::sync::Arc;

use clap::ValueEnum;
use duotrack_media_core::{GraphicsContext, MediaBackend};
use duotrack_media_soft::{is_sample_file, MicrophoneSignal, SoftwareBackend};
use duotrack_platform_gst::{probe_encoders, GstBackend, MicrophoneInput, RasterGraphics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendChoice {
    /// GStreamer when both an H.264 and an AAC encoder are found
    Auto,
    Gstreamer,
    Software,
}

/// Where the recording's microphone PCM comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MicrophoneChoice {
    Device,
    Tone(f32),
    Silence,
}

/// A backend plus the graphics context its encoder surfaces accept.
pub struct Recording {
    pub backend: Arc<dyn MediaBackend>,
    pub graphics: Arc<dyn GraphicsContext>,
}

pub fn for_recording(choice: BackendChoice, microphone: MicrophoneChoice) -> anyhow::Result<Recording> {
    if let Some(backend) = gstreamer_backend(choice)? {
        let input = match microphone {
            MicrophoneChoice::Device => MicrophoneInput::Device,
            MicrophoneChoice::Tone(hz) => MicrophoneInput::Tone(hz as f64),
            MicrophoneChoice::Silence => MicrophoneInput::Silence,
        };
        return Ok(Recording {
            backend: Arc::new(backend.with_microphone(input)),
            graphics: Arc::new(RasterGraphics),
        });
    }

    let tone_hz = match microphone {
        MicrophoneChoice::Device => {
            anyhow::bail!("--mic needs the GStreamer backend; the software backend only synthesizes PCM")
        }
        MicrophoneChoice::Tone(hz) => Some(hz),
        MicrophoneChoice::Silence => None,
    };
    let backend = SoftwareBackend::new().with_microphone(MicrophoneSignal {
        duration_us: None,
        tone_hz,
        paced: true,
    });
    let graphics = Arc::new(backend.graphics());
    Ok(Recording {
        backend: Arc::new(backend),
        graphics,
    })
}

/// Backend able to read `path`. With `Auto`, sample container files go to
/// the software backend and everything else to GStreamer.
pub fn for_file(choice: BackendChoice, path: &Path) -> anyhow::Result<Box<dyn MediaBackend>> {
    let software = match choice {
        BackendChoice::Software => true,
        BackendChoice::Gstreamer => false,
        BackendChoice::Auto => is_sample_file(path),
    };
    if software {
        return Ok(Box::new(SoftwareBackend::new()));
    }
    let backend = GstBackend::containers_only()
        .map_err(|e| anyhow::anyhow!("GStreamer unavailable for {}: {e}", path.display()))?;
    Ok(Box::new(backend))
}

fn gstreamer_backend(choice: BackendChoice) -> anyhow::Result<Option<GstBackend>> {
    match choice {
        BackendChoice::Software => Ok(None),
        BackendChoice::Gstreamer => Ok(Some(GstBackend::detect()?)),
        BackendChoice::Auto => match probe_encoders().and_then(|report| GstBackend::from_report(&report)) {
            Ok(backend) => Ok(Some(backend)),
            Err(e) => {
                tracing::info!(error = %e, "GStreamer encoders unavailable, using software backend");
                Ok(None)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_choice_never_touches_gstreamer() {
        let recording = for_recording(BackendChoice::Software, MicrophoneChoice::Tone(440.0)).unwrap();
        assert_eq!(recording.backend.name(), "software");
    }

    #[test]
    fn real_microphone_needs_gstreamer() {
        assert!(for_recording(BackendChoice::Software, MicrophoneChoice::Device).is_err());
    }

    #[test]
    fn sample_files_are_read_in_software() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.tmp");
        let backend = SoftwareBackend::new();
        let mut writer = backend.create_writer(&path).unwrap();
        writer
            .add_track(&duotrack_media_core::TrackFormat::Audio(
                duotrack_media_core::AudioFormat {
                    mime: duotrack_media_core::MIME_AUDIO_AAC.to_string(),
                    sample_rate: 44_100,
                    channel_count: 2,
                    bit_rate: 128_000,
                    max_input_size: 8192,
                    codec_config: Vec::new(),
                },
            ))
            .unwrap();
        writer.start().unwrap();
        writer.stop().unwrap();
        writer.release();

        assert_eq!(for_file(BackendChoice::Auto, &path).unwrap().name(), "software");
    }
}
