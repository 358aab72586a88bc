//! Conversion between track formats and GStreamer caps.

use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{
    AudioFormat, AvcLevel, AvcProfile, TrackFormat, VideoFormat, MIME_AUDIO_AAC, MIME_VIDEO_AVC,
};
use gstreamer as gst;

pub(crate) const H264_CAPS: &str = "video/x-h264";
pub(crate) const AAC_CAPS: &str = "audio/mpeg";

/// Caps of an encoded track as muxers expect them.
pub(crate) fn track_caps(format: &TrackFormat) -> DuotrackResult<gst::Caps> {
    let structure = match format {
        TrackFormat::Video(v) if v.mime == MIME_VIDEO_AVC => {
            let mut s = gst::Structure::builder(H264_CAPS)
                .field("stream-format", "avc")
                .field("alignment", "au")
                .field("width", v.width as i32)
                .field("height", v.height as i32)
                .build();
            if v.frame_rate > 0 {
                s.set("framerate", gst::Fraction::new(v.frame_rate as i32, 1));
            }
            if !v.codec_config.is_empty() {
                s.set("codec_data", gst::Buffer::from_slice(v.codec_config.clone()));
            }
            s
        }
        TrackFormat::Audio(a) if a.mime == MIME_AUDIO_AAC => {
            let mut s = gst::Structure::builder(AAC_CAPS)
                .field("mpegversion", 4i32)
                .field("stream-format", "raw")
                .field("rate", a.sample_rate as i32)
                .field("channels", a.channel_count as i32)
                .build();
            if !a.codec_config.is_empty() {
                s.set("codec_data", gst::Buffer::from_slice(a.codec_config.clone()));
            }
            s
        }
        other => {
            return Err(DuotrackError::container(format!(
                "no caps for track type {}",
                other.mime()
            )))
        }
    };
    Ok(gst::Caps::builder_full().structure(structure).build())
}

/// Track format described by demuxer or parser caps. `None` for anything
/// other than H.264 and AAC.
pub(crate) fn format_from_caps(caps: &gst::CapsRef) -> Option<TrackFormat> {
    let s = caps.structure(0)?;
    let codec_config = codec_data(s);
    match s.name().as_str() {
        H264_CAPS => {
            let frame_rate = s
                .get::<gst::Fraction>("framerate")
                .ok()
                .filter(|f| f.denom() > 0)
                .map_or(0, |f| (f.numer() as f64 / f.denom() as f64).round() as u32);
            Some(TrackFormat::Video(VideoFormat {
                mime: MIME_VIDEO_AVC.to_string(),
                width: s.get::<i32>("width").unwrap_or(0).max(0) as u32,
                height: s.get::<i32>("height").unwrap_or(0).max(0) as u32,
                bit_rate: 0,
                frame_rate,
                i_frame_interval: 0,
                profile: s.get::<&str>("profile").map_or(AvcProfile::High, parse_profile),
                level: s.get::<&str>("level").map_or(AvcLevel::Level31, parse_level),
                codec_config,
            }))
        }
        AAC_CAPS if s.get::<i32>("mpegversion").unwrap_or(4) == 4 => {
            Some(TrackFormat::Audio(AudioFormat {
                mime: MIME_AUDIO_AAC.to_string(),
                sample_rate: s.get::<i32>("rate").unwrap_or(0).max(0) as u32,
                channel_count: s.get::<i32>("channels").unwrap_or(0).max(0) as u16,
                bit_rate: 0,
                max_input_size: 0,
                codec_config,
            }))
        }
        _ => None,
    }
}

/// `format` with the codec data the encoder announced in `caps`.
pub(crate) fn with_codec_config(format: &TrackFormat, caps: &gst::CapsRef) -> TrackFormat {
    let codec_config = caps.structure(0).map(codec_data).unwrap_or_default();
    let mut format = format.clone();
    match &mut format {
        TrackFormat::Video(v) => v.codec_config = codec_config,
        TrackFormat::Audio(a) => a.codec_config = codec_config,
    }
    format
}

fn codec_data(s: &gst::StructureRef) -> Vec<u8> {
    s.get::<gst::Buffer>("codec_data")
        .ok()
        .and_then(|buffer| buffer.map_readable().ok().map(|map| map.as_slice().to_vec()))
        .unwrap_or_default()
}

pub(crate) fn parse_profile(profile: &str) -> AvcProfile {
    match profile {
        "baseline" | "constrained-baseline" => AvcProfile::Baseline,
        "main" => AvcProfile::Main,
        _ => AvcProfile::High,
    }
}

pub(crate) fn parse_level(level: &str) -> AvcLevel {
    let major = level
        .split('.')
        .next()
        .and_then(|m| m.parse::<u32>().ok())
        .unwrap_or(0);
    if major >= 4 {
        AvcLevel::Level4
    } else {
        AvcLevel::Level31
    }
}

pub(crate) fn profile_name(profile: AvcProfile) -> &'static str {
    match profile {
        AvcProfile::Baseline => "baseline",
        AvcProfile::Main => "main",
        AvcProfile::High => "high",
    }
}
