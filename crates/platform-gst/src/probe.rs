//! Hardware encoder discovery.
//!
//! Looks up a fixed table of known encoder element factories in the
//! GStreamer registry. Hardware elements are listed first within each
//! track type so the first available entry is the preferred one.

use std::sync::OnceLock;

use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::TrackType;
use gstreamer as gst;
use serde::{Deserialize, Serialize};

/// A known encoder element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderCandidate {
    pub element: &'static str,
    pub track: TrackType,
    pub hardware: bool,
    pub api: &'static str,
}

const fn candidate(
    element: &'static str,
    track: TrackType,
    hardware: bool,
    api: &'static str,
) -> EncoderCandidate {
    EncoderCandidate {
        element,
        track,
        hardware,
        api,
    }
}

/// Known encoders in preference order.
pub const ENCODER_CANDIDATES: &[EncoderCandidate] = &[
    candidate("nvh264enc", TrackType::Video, true, "NVENC"),
    candidate("vah264enc", TrackType::Video, true, "VA"),
    candidate("vaapih264enc", TrackType::Video, true, "VA-API"),
    candidate("qsvh264enc", TrackType::Video, true, "Quick Sync"),
    candidate("v4l2h264enc", TrackType::Video, true, "V4L2 M2M"),
    candidate("vtenc_h264", TrackType::Video, true, "VideoToolbox"),
    candidate("mfh264enc", TrackType::Video, true, "Media Foundation"),
    candidate("x264enc", TrackType::Video, false, "x264"),
    candidate("openh264enc", TrackType::Video, false, "OpenH264"),
    candidate("fdkaacenc", TrackType::Audio, false, "FDK AAC"),
    candidate("avenc_aac", TrackType::Audio, false, "FFmpeg AAC"),
    candidate("voaacenc", TrackType::Audio, false, "VisualOn AAC"),
    candidate("faac", TrackType::Audio, false, "FAAC"),
];

/// An encoder element found on this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableEncoder {
    pub element: String,
    pub track: TrackType,
    pub hardware: bool,
    pub api: String,
    pub long_name: String,
}

/// Result of probing the GStreamer registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub gstreamer_version: String,
    pub encoders: Vec<AvailableEncoder>,
}

impl ProbeReport {
    /// First available encoder for `track`, in preference order.
    pub fn preferred(&self, track: TrackType) -> Option<&AvailableEncoder> {
        self.encoders.iter().find(|e| e.track == track)
    }

    pub fn has_hardware_video(&self) -> bool {
        self.encoders
            .iter()
            .any(|e| e.track == TrackType::Video && e.hardware)
    }
}

/// Build a report from the candidates accepted by `lookup`, which returns
/// the element's long name when the factory exists.
pub fn collect_available(
    version: impl Into<String>,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> ProbeReport {
    let encoders = ENCODER_CANDIDATES
        .iter()
        .filter_map(|c| {
            lookup(c.element).map(|long_name| AvailableEncoder {
                element: c.element.to_string(),
                track: c.track,
                hardware: c.hardware,
                api: c.api.to_string(),
                long_name,
            })
        })
        .collect();
    ProbeReport {
        gstreamer_version: version.into(),
        encoders,
    }
}

/// Probe the GStreamer registry for known H.264 and AAC encoders.
pub fn probe_encoders() -> DuotrackResult<ProbeReport> {
    init_gstreamer()?;
    let report = collect_available(gst::version_string().to_string(), |name| {
        gst::ElementFactory::find(name).map(|factory| factory.longname().to_string())
    });
    tracing::info!(
        version = %report.gstreamer_version,
        found = report.encoders.len(),
        hardware_video = report.has_hardware_video(),
        "Probed GStreamer encoders"
    );
    for encoder in &report.encoders {
        tracing::debug!(
            element = %encoder.element,
            track = %encoder.track,
            hardware = encoder.hardware,
            "Encoder available"
        );
    }
    Ok(report)
}

pub(crate) fn init_gstreamer() -> DuotrackResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(DuotrackError::unsupported(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_video_encoders_precede_software_ones() {
        let videos: Vec<_> = ENCODER_CANDIDATES
            .iter()
            .filter(|c| c.track == TrackType::Video)
            .collect();
        let first_software = videos.iter().position(|c| !c.hardware).unwrap();
        assert!(videos[first_software..].iter().all(|c| !c.hardware));
    }

    #[test]
    fn preferred_follows_table_order() {
        let report = collect_available("GStreamer 1.24.0", |name| match name {
            "x264enc" | "vaapih264enc" | "avenc_aac" => Some(format!("{name} long")),
            _ => None,
        });
        assert_eq!(report.encoders.len(), 3);
        assert_eq!(
            report.preferred(TrackType::Video).unwrap().element,
            "vaapih264enc"
        );
        assert_eq!(
            report.preferred(TrackType::Audio).unwrap().element,
            "avenc_aac"
        );
        assert!(report.has_hardware_video());
    }

    #[test]
    fn software_only_host_has_no_hardware_video() {
        let report = collect_available("GStreamer 1.24.0", |name| {
            (name == "x264enc").then(|| "x264 H.264 Encoder".to_string())
        });
        assert!(!report.has_hardware_video());
        assert!(report.preferred(TrackType::Audio).is_none());
    }

    #[test]
    fn report_serializes_track_as_snake_case() {
        let report = collect_available("v", |name| {
            (name == "fdkaacenc").then(|| "FDK AAC".to_string())
        });
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"track\":\"audio\""));
    }
}
