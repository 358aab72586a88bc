//! duotrack media contracts.
//!
//! This crate contains the interfaces the recording engine consumes without
//! coupling to a concrete codec, container or graphics implementation:
//!
//! - [`format`]: track formats, sample metadata and flags
//! - [`codec`]: encoder sessions (surface input for video, buffer input for audio)
//! - [`container`]: muxer/demuxer contracts
//! - [`graphics`]: the shared rendering context that draws into encoder surfaces
//! - [`source`]: microphone PCM capture
//! - [`storage`]: output naming, relocation and deletion of files
//! - [`backend`]: the factory tying them together for one platform

pub mod backend;
pub mod codec;
pub mod container;
pub mod format;
pub mod graphics;
pub mod source;
pub mod storage;

pub use backend::MediaBackend;
pub use codec::{EncodedChunk, Encoder, EncoderOutput};
pub use container::{ContainerReader, ContainerWriter};
pub use format::*;
pub use graphics::{FrameSink, GraphicsContext, InputSurface, RenderSurface, RenderedFrame, TextureId};
pub use source::{MicrophoneConfig, MicrophoneSource};
pub use storage::{FileStore, LocalFileStore};
