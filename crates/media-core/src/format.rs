//! Track formats and per-sample metadata.

use serde::{Deserialize, Serialize};

/// MIME type of the AVC (H.264) video encoder.
pub const MIME_VIDEO_AVC: &str = "video/avc";

/// MIME type of the AAC audio encoder.
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";

/// Which kind of media a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    Audio,
    Video,
}

impl std::fmt::Display for TrackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => f.write_str("audio"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Microphone channel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLayout {
    Mono,
    #[default]
    Stereo,
}

impl ChannelLayout {
    /// Number of interleaved channels.
    pub fn channel_count(self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
        }
    }
}

/// AVC profile requested from the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvcProfile {
    Baseline,
    Main,
    High,
}

/// AVC level requested from the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AvcLevel {
    #[serde(rename = "3.1")]
    Level31,
    #[serde(rename = "4")]
    Level4,
}

/// Video encoder / track format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub bit_rate: u32,
    pub frame_rate: u32,
    /// Seconds between key frames.
    pub i_frame_interval: u32,
    pub profile: AvcProfile,
    pub level: AvcLevel,
    /// Codec-specific data, filled in by the encoder on its format change.
    #[serde(default)]
    pub codec_config: Vec<u8>,
}

/// Audio encoder / track format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub mime: String,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bit_rate: u32,
    /// Largest input buffer the encoder accepts, in bytes.
    pub max_input_size: usize,
    /// Codec-specific data, filled in by the encoder on its format change.
    #[serde(default)]
    pub codec_config: Vec<u8>,
}

/// Format of one track inside a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

impl TrackFormat {
    pub fn mime(&self) -> &str {
        match self {
            Self::Video(v) => &v.mime,
            Self::Audio(a) => &a.mime,
        }
    }

    /// Media type derived from the MIME prefix, the way demuxed tracks are classified.
    pub fn track_type(&self) -> Option<TrackType> {
        let mime = self.mime();
        if mime.starts_with("audio/") {
            Some(TrackType::Audio)
        } else if mime.starts_with("video/") {
            Some(TrackType::Video)
        } else {
            None
        }
    }

    pub fn as_video(&self) -> Option<&VideoFormat> {
        match self {
            Self::Video(v) => Some(v),
            Self::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioFormat> {
        match self {
            Self::Audio(a) => Some(a),
            Self::Video(_) => None,
        }
    }
}

/// Bit set describing an encoded sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const NONE: Self = Self(0);
    pub const KEY_FRAME: Self = Self(1);
    pub const CODEC_CONFIG: Self = Self(1 << 1);
    pub const END_OF_STREAM: Self = Self(1 << 2);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn remove(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl std::ops::BitOr for SampleFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Metadata for one encoded sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SampleInfo {
    /// Presentation timestamp in microseconds.
    pub pts_us: i64,
    /// Payload size in bytes.
    pub size: usize,
    pub flags: SampleFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_type_follows_mime_prefix() {
        let audio = TrackFormat::Audio(AudioFormat {
            mime: MIME_AUDIO_AAC.to_string(),
            sample_rate: 44_100,
            channel_count: 2,
            bit_rate: 128_000,
            max_input_size: 8192,
            codec_config: Vec::new(),
        });
        assert_eq!(audio.track_type(), Some(TrackType::Audio));
        assert!(audio.as_video().is_none());
    }

    #[test]
    fn flags_combine_and_strip() {
        let flags = SampleFlags::KEY_FRAME | SampleFlags::END_OF_STREAM;
        assert!(flags.contains(SampleFlags::KEY_FRAME));
        assert!(!flags.contains(SampleFlags::CODEC_CONFIG));
        assert!(!flags.contains(SampleFlags::NONE));
        let stripped = flags.remove(SampleFlags::END_OF_STREAM);
        assert_eq!(stripped, SampleFlags::KEY_FRAME);
    }
}
