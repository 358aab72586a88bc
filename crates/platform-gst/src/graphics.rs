//! CPU raster graphics context for GStreamer encoder surfaces.
//!
//! Each texture is drawn as a solid RGBA fill whose colour is derived from
//! its id, so a recording of synthetic frames is visibly animated.

use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{GraphicsContext, InputSurface, RenderSurface, RenderedFrame, TextureId};

/// RGBA colour used for `texture`.
pub fn texture_colour(texture: TextureId) -> [u8; 4] {
    let id = texture.0;
    [
        (id.wrapping_mul(37) % 256) as u8,
        (id.wrapping_mul(91) % 256) as u8,
        (id.wrapping_mul(151) % 256) as u8,
        0xff,
    ]
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RasterGraphics;

impl GraphicsContext for RasterGraphics {
    fn create_window_surface(
        &self,
        target: &InputSurface,
    ) -> DuotrackResult<Box<dyn RenderSurface>> {
        let len = target.width() as usize * target.height() as usize * 4;
        Ok(Box::new(RasterSurface {
            target: target.clone(),
            pixels: vec![0; len],
            current: false,
            drawn: None,
            presentation_time_ns: 0,
            released: false,
        }))
    }
}

struct RasterSurface {
    target: InputSurface,
    pixels: Vec<u8>,
    current: bool,
    drawn: Option<TextureId>,
    presentation_time_ns: i64,
    released: bool,
}

impl RenderSurface for RasterSurface {
    fn make_current(&mut self) -> DuotrackResult<()> {
        if self.released {
            return Err(DuotrackError::graphics("surface released"));
        }
        self.current = true;
        Ok(())
    }

    fn draw_texture(&mut self, texture: TextureId) -> DuotrackResult<()> {
        if !self.current {
            return Err(DuotrackError::graphics("no current context"));
        }
        let colour = texture_colour(texture);
        for pixel in self.pixels.chunks_exact_mut(4) {
            pixel.copy_from_slice(&colour);
        }
        self.drawn = Some(texture);
        Ok(())
    }

    fn set_presentation_time(&mut self, timestamp_ns: i64) {
        self.presentation_time_ns = timestamp_ns;
    }

    fn swap_buffers(&mut self) -> DuotrackResult<()> {
        let texture = self
            .drawn
            .take()
            .ok_or_else(|| DuotrackError::graphics("nothing drawn since last swap"))?;
        self.target.submit(RenderedFrame {
            width: self.target.width(),
            height: self.target.height(),
            texture,
            presentation_time_ns: self.presentation_time_ns,
            pixels: self.pixels.clone(),
        })
    }

    fn release(&mut self) {
        self.released = true;
        self.current = false;
        self.pixels = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use duotrack_media_core::FrameSink;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Captured(Mutex<Vec<RenderedFrame>>);

    impl FrameSink for Captured {
        fn submit(&self, frame: RenderedFrame) -> DuotrackResult<()> {
            self.0.lock().push(frame);
            Ok(())
        }
    }

    #[test]
    fn swap_delivers_a_full_rgba_frame() {
        let captured = Arc::new(Captured::default());
        let target = InputSurface::new(captured.clone(), 4, 2);
        let mut surface = RasterGraphics.create_window_surface(&target).unwrap();
        surface.make_current().unwrap();
        surface.draw_texture(TextureId(3)).unwrap();
        surface.set_presentation_time(42);
        surface.swap_buffers().unwrap();
        assert!(surface.swap_buffers().is_err());

        let frames = captured.0.lock();
        assert_eq!(frames[0].pixels.len(), 4 * 2 * 4);
        assert_eq!(frames[0].pixels[..4], texture_colour(TextureId(3)));
        assert_eq!(frames[0].presentation_time_ns, 42);
    }

    #[test]
    fn drawing_needs_a_current_context() {
        let target = InputSurface::new(Arc::new(Captured::default()), 2, 2);
        let mut surface = RasterGraphics.create_window_surface(&target).unwrap();
        assert!(surface.draw_texture(TextureId(1)).is_err());
        surface.release();
        assert!(surface.make_current().is_err());
    }
}
