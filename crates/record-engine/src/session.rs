//! Recording session data.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use duotrack_common::clock::RecordingClock;
use duotrack_common::config::RecordingDefaults;
use duotrack_media_core::{ChannelLayout, GraphicsContext, TrackType};
use serde::{Deserialize, Serialize};

use crate::barrier::{FinishBarrier, StartBarrier};

/// Token identifying one recording attempt. Events carrying another
/// session's token are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Playback speed applied to both tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedMode {
    ExtraSlow,
    Slow,
    #[default]
    Normal,
    Fast,
    ExtraFast,
}

impl SpeedMode {
    /// Playback-speed multiplier.
    pub fn factor(self) -> f64 {
        match self {
            Self::ExtraSlow => 1.0 / 3.0,
            Self::Slow => 0.5,
            Self::Normal => 1.0,
            Self::Fast => 2.0,
            Self::ExtraFast => 3.0,
        }
    }
}

impl std::str::FromStr for SpeedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extra-slow" | "extra_slow" => Ok(Self::ExtraSlow),
            "slow" => Ok(Self::Slow),
            "normal" => Ok(Self::Normal),
            "fast" => Ok(Self::Fast),
            "extra-fast" | "extra_fast" => Ok(Self::ExtraFast),
            other => Err(format!("unknown speed mode: {other}")),
        }
    }
}

/// Video track parameters.
#[derive(Clone)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub bit_rate: u32,
    /// Auto-stop once the recorded duration reaches this (0 = unlimited).
    pub max_duration_us: i64,
    pub speed_mode: SpeedMode,
    /// Renderer context the encoder's input surface is bound to.
    pub graphics: Arc<dyn GraphicsContext>,
    /// Intermediate video-only file.
    pub output_path: PathBuf,
}

impl VideoParams {
    pub fn from_defaults(
        defaults: &RecordingDefaults,
        graphics: Arc<dyn GraphicsContext>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            width: defaults.width,
            height: defaults.height,
            bit_rate: defaults.video_bit_rate,
            max_duration_us: defaults.max_duration_us,
            speed_mode: SpeedMode::Normal,
            graphics,
            output_path: output_path.into(),
        }
    }
}

impl fmt::Debug for VideoParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoParams")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bit_rate", &self.bit_rate)
            .field("max_duration_us", &self.max_duration_us)
            .field("speed_mode", &self.speed_mode)
            .field("output_path", &self.output_path)
            .finish_non_exhaustive()
    }
}

/// Audio track parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: ChannelLayout,
    pub bit_rate: u32,
    pub max_duration_us: i64,
    pub speed_mode: SpeedMode,
    /// Intermediate audio-only file.
    pub output_path: PathBuf,
}

impl AudioParams {
    pub fn from_defaults(defaults: &RecordingDefaults, output_path: impl Into<PathBuf>) -> Self {
        Self {
            sample_rate: defaults.audio_sample_rate,
            channels: if defaults.audio_stereo {
                ChannelLayout::Stereo
            } else {
                ChannelLayout::Mono
            },
            bit_rate: defaults.audio_bit_rate,
            max_duration_us: defaults.max_duration_us,
            speed_mode: SpeedMode::Normal,
            output_path: output_path.into(),
        }
    }
}

/// What one pipeline produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordInfo {
    pub file_path: PathBuf,
    pub duration_us: i64,
    pub track_type: TrackType,
    /// The pipeline aborted at runtime; `duration_us` is zero.
    #[serde(default)]
    pub failed: bool,
}

/// The finished artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub file_path: PathBuf,
    pub duration_us: i64,
}

/// One recording attempt. Created on start and dropped once the attempt
/// completes or fails.
#[derive(Debug)]
pub struct RecordingSession {
    pub id: SessionId,
    pub video: VideoParams,
    pub audio: AudioParams,
    pub audio_enabled: bool,
    pub start: StartBarrier,
    pub finish: FinishBarrier,
    pub clock: RecordingClock,
}

impl RecordingSession {
    pub fn new(id: SessionId, video: VideoParams, audio: AudioParams, audio_enabled: bool) -> Self {
        Self {
            id,
            video,
            audio,
            audio_enabled,
            start: StartBarrier::new(audio_enabled),
            finish: FinishBarrier::new(audio_enabled),
            clock: RecordingClock::start(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_factors() {
        assert_eq!(SpeedMode::Normal.factor(), 1.0);
        assert_eq!(SpeedMode::Fast.factor(), 2.0);
        assert_eq!(SpeedMode::Slow.factor(), 0.5);
        assert!((SpeedMode::ExtraSlow.factor() * 3.0 - 1.0).abs() < 1e-12);
        assert_eq!("extra-fast".parse::<SpeedMode>().unwrap(), SpeedMode::ExtraFast);
        assert!("warp".parse::<SpeedMode>().is_err());
    }

    #[test]
    fn audio_params_follow_defaults() {
        let defaults = RecordingDefaults {
            audio_stereo: false,
            ..RecordingDefaults::default()
        };
        let audio = AudioParams::from_defaults(&defaults, "/tmp/a.tmp");
        assert_eq!(audio.channels, ChannelLayout::Mono);
        assert_eq!(audio.sample_rate, 44_100);
    }
}
