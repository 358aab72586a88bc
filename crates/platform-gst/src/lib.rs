//! GStreamer integration for duotrack.
//!
//! Encoder discovery, plus a [`MediaBackend`](duotrack_media_core::MediaBackend)
//! that runs the recorder on real elements: the preferred H.264 and AAC
//! encoders behind appsrc/appsink, `mp4mux` and `qtdemux` for containers,
//! and an appsink-fed microphone.

pub mod backend;
mod caps;
pub mod container;
pub mod encoder;
pub mod graphics;
pub mod microphone;
mod pipeline;
pub mod probe;

pub use backend::GstBackend;
pub use container::{Mp4Reader, Mp4Writer};
pub use encoder::GstEncoder;
pub use graphics::RasterGraphics;
pub use microphone::{GstMicrophone, MicrophoneInput};
pub use probe::{probe_encoders, AvailableEncoder, EncoderCandidate, ProbeReport};
