//! Shared graphics context and encoder input surfaces.
//!
//! The renderer owns the frame texture; the video pipeline only needs to
//! draw that texture, unfiltered, onto a window surface bound to the
//! encoder's input and stamp it with a presentation time.

use std::fmt;
use std::sync::Arc;

use duotrack_common::error::DuotrackResult;

/// Handle of a texture living in the renderer's graphics context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// A frame presented onto an encoder input surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFrame {
    pub width: u32,
    pub height: u32,
    pub texture: TextureId,
    pub presentation_time_ns: i64,
    pub pixels: Vec<u8>,
}

/// Receiving end of an encoder input surface.
pub trait FrameSink: Send + Sync {
    fn submit(&self, frame: RenderedFrame) -> DuotrackResult<()>;
}

/// Drawable input of a video encoder.
#[derive(Clone)]
pub struct InputSurface {
    sink: Arc<dyn FrameSink>,
    width: u32,
    height: u32,
}

impl InputSurface {
    pub fn new(sink: Arc<dyn FrameSink>, width: u32, height: u32) -> Self {
        Self {
            sink,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Deliver a presented frame to the encoder.
    pub fn submit(&self, frame: RenderedFrame) -> DuotrackResult<()> {
        self.sink.submit(frame)
    }
}

impl fmt::Debug for InputSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// The renderer's graphics context, shared with the recorder.
pub trait GraphicsContext: Send + Sync {
    /// Create a recordable window surface drawing into `target`.
    fn create_window_surface(&self, target: &InputSurface)
        -> DuotrackResult<Box<dyn RenderSurface>>;
}

/// A window surface bound to an encoder input.
pub trait RenderSurface: Send {
    fn make_current(&mut self) -> DuotrackResult<()>;

    /// Draw `texture` as-is, filling the surface.
    fn draw_texture(&mut self, texture: TextureId) -> DuotrackResult<()>;

    fn set_presentation_time(&mut self, timestamp_ns: i64);

    /// Present the drawn frame to the encoder.
    fn swap_buffers(&mut self) -> DuotrackResult<()>;

    /// Free the surface. Idempotent.
    fn release(&mut self);
}
