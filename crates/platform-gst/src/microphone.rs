//! Microphone capture through an appsink.

use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{MicrophoneConfig, MicrophoneSource};
use gstreamer as gst;
use gstreamer_app as gst_app;
use serde::{Deserialize, Serialize};

use crate::pipeline::LaunchedPipeline;

/// Where microphone PCM comes from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MicrophoneInput {
    /// The platform's default capture device.
    Device,
    /// A live sine tone at the given frequency.
    Tone(f64),
    #[default]
    Silence,
}

impl MicrophoneInput {
    pub fn source_fragment(self) -> String {
        match self {
            Self::Device => "autoaudiosrc".to_string(),
            Self::Tone(hz) => format!("audiotestsrc is-live=true wave=sine freq={hz}"),
            Self::Silence => "audiotestsrc is-live=true wave=silence".to_string(),
        }
    }
}

pub fn microphone_launch(input: MicrophoneInput, config: &MicrophoneConfig) -> String {
    format!(
        "{} ! audioconvert ! audioresample \
         ! audio/x-raw,format=S16LE,layout=interleaved,rate={},channels={} \
         ! appsink name=sink sync=false",
        input.source_fragment(),
        config.sample_rate,
        config.channels.channel_count(),
    )
}

pub struct GstMicrophone {
    pipeline: LaunchedPipeline,
    appsink: gst_app::AppSink,
    /// Pulled PCM not yet handed to `read`.
    leftover: Vec<u8>,
    started: bool,
    released: bool,
}

impl GstMicrophone {
    pub fn open(input: MicrophoneInput, config: &MicrophoneConfig) -> DuotrackResult<Self> {
        let pipeline = LaunchedPipeline::from_launch(
            "microphone",
            &microphone_launch(input, config),
            |m| DuotrackError::audio(m),
        )?;
        let appsink = pipeline.element::<gst_app::AppSink>("sink")?;
        tracing::info!(?input, sample_rate = config.sample_rate, "Microphone opened");
        Ok(Self {
            pipeline,
            appsink,
            leftover: Vec::with_capacity(config.buffer_size),
            started: false,
            released: false,
        })
    }
}

impl MicrophoneSource for GstMicrophone {
    fn start(&mut self) -> DuotrackResult<()> {
        if self.released {
            return Err(DuotrackError::audio("microphone released"));
        }
        self.pipeline.play()?;
        self.started = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> DuotrackResult<usize> {
        if self.released || !self.started {
            return Err(DuotrackError::audio("microphone is not capturing"));
        }
        if self.leftover.is_empty() {
            self.pipeline.check_bus()?;
            let Some(sample) = self.appsink.try_pull_sample(gst::ClockTime::ZERO) else {
                return Ok(0);
            };
            let buffer = sample
                .buffer()
                .ok_or_else(|| DuotrackError::audio("capture sample has no buffer"))?;
            let map = buffer
                .map_readable()
                .map_err(|e| DuotrackError::audio(format!("Unreadable capture buffer: {e}")))?;
            self.leftover.extend_from_slice(map.as_slice());
        }
        let n = buf.len().min(self.leftover.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.drain(..n);
        Ok(n)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.leftover.clear();
            self.pipeline.shut_down();
        }
    }
}

impl Drop for GstMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duotrack_media_core::ChannelLayout;

    fn config() -> MicrophoneConfig {
        MicrophoneConfig {
            sample_rate: 48_000,
            channels: ChannelLayout::Mono,
            buffer_size: 8192,
        }
    }

    #[test]
    fn launch_pins_the_capture_format() {
        let launch = microphone_launch(MicrophoneInput::Tone(440.0), &config());
        assert!(launch.starts_with("audiotestsrc is-live=true wave=sine freq=440"));
        assert!(launch.contains("format=S16LE,layout=interleaved,rate=48000,channels=1"));
        assert_eq!(MicrophoneInput::Device.source_fragment(), "autoaudiosrc");
    }

    #[test]
    fn silent_source_delivers_zeroed_pcm() {
        let ready = crate::probe::init_gstreamer().is_ok()
            && ["audiotestsrc", "audioconvert", "audioresample", "appsink"]
                .iter()
                .all(|e| gst::ElementFactory::find(e).is_some());
        if !ready {
            return;
        }
        let mut microphone = GstMicrophone::open(MicrophoneInput::Silence, &config()).unwrap();
        let mut buf = vec![1u8; 960];
        assert!(microphone.read(&mut buf).is_err());
        microphone.start().unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut total = 0;
        while total < 9600 && std::time::Instant::now() < deadline {
            let n = microphone.read(&mut buf).unwrap();
            assert!(buf[..n].iter().all(|&b| b == 0));
            total += n;
            if n == 0 {
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
        }
        assert!(total >= 9600, "read {total} bytes");
        microphone.release();
        assert!(microphone.read(&mut buf).is_err());
    }
}
