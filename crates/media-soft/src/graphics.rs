//! CPU stand-in for the renderer's graphics context.

use std::sync::Arc;

use duotrack_common::error::{DuotrackError, DuotrackResult};
use duotrack_media_core::{GraphicsContext, InputSurface, RenderSurface, RenderedFrame, TextureId};

use crate::ResourceLedger;

/// Graphics context whose surfaces "draw" a texture by stamping its id into
/// the frame payload.
#[derive(Default)]
pub struct SoftwareGraphics {
    ledger: Arc<ResourceLedger>,
}

impl SoftwareGraphics {
    pub fn new(ledger: Arc<ResourceLedger>) -> Self {
        Self { ledger }
    }
}

impl GraphicsContext for SoftwareGraphics {
    fn create_window_surface(
        &self,
        target: &InputSurface,
    ) -> DuotrackResult<Box<dyn RenderSurface>> {
        self.ledger.surface_opened();
        Ok(Box::new(SoftwareSurface {
            target: target.clone(),
            current: false,
            drawn: None,
            presentation_time_ns: 0,
            released: false,
            ledger: self.ledger.clone(),
        }))
    }
}

struct SoftwareSurface {
    target: InputSurface,
    current: bool,
    drawn: Option<TextureId>,
    presentation_time_ns: i64,
    released: bool,
    ledger: Arc<ResourceLedger>,
}

impl RenderSurface for SoftwareSurface {
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
            pixels: texture.0.to_le_bytes().to_vec(),
        })
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.current = false;
            self.ledger.surface_released();
        }
    }
}

impl Drop for SoftwareSurface {
    fn drop(&mut self) {
        self.release();
    }
}
