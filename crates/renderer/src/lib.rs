//! Raster render backends and per-domain render services.
//!
//! A backend owns one shared canvas, the tile atlas texture and the colormap
//! table. Work is issued one panel at a time: `begin_panel` fixes viewport and
//! scissor to the panel rectangle, raster uniforms and tile draws follow, and
//! `end_panel` closes the pass. Nothing drawn inside a panel pass can touch
//! pixels outside its rectangle.
//!
//! - `shading`: value to colour transfer shared by both backends.
//! - `software`: CPU rasteriser, exact to the pixel.
//! - `wgpu_backend`: offscreen GPU implementation.
//! - `service`: render domains and the mutex-wrapped shared service.

use std::fmt;

use image::RgbaImage;
use render_protocol::{Color, ColormapLut, RasterUniforms, TileUniforms, Viewport};
use tiles::TileTextureSink;

mod service;
pub mod shading;
mod software;
mod wgpu_backend;

pub use service::{RenderDomains, RenderService, SharedRenderService};
pub use software::SoftwareBackend;
pub use wgpu_backend::WgpuBackend;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    PanelAlreadyActive,
    NoActivePanel,
    EmptyViewport,
    ViewportOutsideCanvas {
        viewport: Viewport,
        canvas_width: u32,
        canvas_height: u32,
    },
    AdapterUnavailable(String),
    DeviceRequest(String),
    Readback(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PanelAlreadyActive => write!(f, "a panel pass is already active"),
            Self::NoActivePanel => write!(f, "no panel pass is active"),
            Self::EmptyViewport => write!(f, "viewport has no area"),
            Self::ViewportOutsideCanvas {
                viewport,
                canvas_width,
                canvas_height,
            } => write!(
                f,
                "viewport {viewport:?} exceeds canvas {canvas_width}x{canvas_height}"
            ),
            Self::AdapterUnavailable(message) => write!(f, "no GPU adapter: {message}"),
            Self::DeviceRequest(message) => write!(f, "GPU device request failed: {message}"),
            Self::Readback(message) => write!(f, "canvas readback failed: {message}"),
        }
    }
}

impl std::error::Error for RenderError {}

pub trait RenderBackend: TileTextureSink + Send {
    fn canvas_size(&self) -> (u32, u32);

    /// The atlas upload side of this backend.
    fn texture_sink(&mut self) -> &mut dyn TileTextureSink;

    /// Resizes the shared canvas. Previous content is discarded.
    fn resize_canvas(&mut self, width: u32, height: u32);

    /// Starts a panel pass, restricting viewport and scissor to `viewport`.
    /// `clear` fills only that rectangle.
    fn begin_panel(&mut self, viewport: Viewport, clear: Option<Color>) -> Result<(), RenderError>;

    fn set_raster_uniforms(
        &mut self,
        uniforms: &RasterUniforms,
        colormap: &ColormapLut,
    ) -> Result<(), RenderError>;

    fn draw_tile(&mut self, tile: &TileUniforms) -> Result<(), RenderError>;

    fn end_panel(&mut self) -> Result<(), RenderError>;

    /// Copies a canvas rectangle out. Only valid between panel passes.
    fn read_region(&mut self, region: Viewport) -> Result<RgbaImage, RenderError>;
}

pub(crate) fn check_viewport(
    viewport: Viewport,
    canvas_width: u32,
    canvas_height: u32,
) -> Result<(), RenderError> {
    if viewport.is_empty() {
        return Err(RenderError::EmptyViewport);
    }
    let fits_x = viewport
        .origin_x
        .checked_add(viewport.width)
        .is_some_and(|right| right <= canvas_width);
    let fits_y = viewport
        .origin_y
        .checked_add(viewport.height)
        .is_some_and(|bottom| bottom <= canvas_height);
    if !fits_x || !fits_y {
        return Err(RenderError::ViewportOutsideCanvas {
            viewport,
            canvas_width,
            canvas_height,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests;
