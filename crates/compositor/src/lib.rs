//! Panel compositor.
//!
//! Renders one grid cell at a time into the shared canvas of a render
//! domain: the raster of the panel's frame (or the additive blend of a
//! colour-blending store's layers), then the CPU overlays in z order. Each
//! panel's final pixels are kept so the whole image view can be exported.
//!
//! - `raster`: tile selection with placeholders and tile placement.
//! - `blend`: additive layer compositing.
//! - `layers`: layer order, placement and the colorbar.
//! - `wcs_overlay`: style policy for the external coordinate plotter.

use std::fmt;

use color_blending::ColorBlendingStore;
use document::{FrameArena, FrameId, RasterStyle};
use image::{Rgba, RgbaImage, imageops};
use render_protocol::{Color, ColormapError, GridLayout, Viewport};
use renderer::{RenderError, RenderService};
use serde::{Deserialize, Serialize};
use tiles::{TileCache, TileCoordinate};
use tracing::{debug, warn};
use view::ViewTransformError;

mod blend;
pub mod layers;
mod raster;
pub mod wcs_overlay;

pub use blend::{blend_lighter, composite_premultiplied};
pub use layers::{
    ColorbarConfig, ColorbarOverlay, ColorbarPosition, LayerKind, LayerRect, OverlayContext,
    Padding, PanelFrame, PanelOverlay,
};
pub use raster::{RasterReport, TilePlacement, pixel_grid, render_preview};
pub use wcs_overlay::{OverlaySettings, PlotBounds, WcsOverlay, WcsPlotter};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PixelGridConfig {
    pub visible: bool,
    /// Screen pixels per image pixel where the grid starts to show.
    pub min_zoom: f64,
    /// Zoom at which the grid reaches full opacity.
    pub full_zoom: f64,
    pub max_opacity: f64,
}

impl Default for PixelGridConfig {
    fn default() -> Self {
        Self {
            visible: true,
            min_zoom: 6.0,
            full_zoom: 12.0,
            max_opacity: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositorConfig {
    /// Finer layers searched for placeholders under a missing tile.
    pub high_res_placeholder_levels: u32,
    pub low_res_fallback: bool,
    pub pixel_grid: PixelGridConfig,
    pub raster_style: RasterStyle,
    pub background: Color,
    pub padding: Padding,
    pub colorbar: ColorbarConfig,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            high_res_placeholder_levels: 2,
            low_res_fallback: true,
            pixel_grid: PixelGridConfig::default(),
            raster_style: RasterStyle::default(),
            background: Color::BLACK,
            padding: Padding {
                left: 60,
                right: 40,
                top: 30,
                bottom: 40,
            },
            colorbar: ColorbarConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompositorError {
    InvalidPanel(usize),
    UnknownFrame(FrameId),
    UnknownStore(usize),
    MissingPreview(FrameId),
    PreviewTooLarge { chunks: u32, capacity: u32 },
    Colormap(ColormapError),
    Geometry(ViewTransformError),
    Render(RenderError),
}

impl fmt::Display for CompositorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositorError::InvalidPanel(index) => write!(f, "no panel {index} in the grid"),
            CompositorError::UnknownFrame(frame) => write!(f, "frame {frame:?} is not open"),
            CompositorError::UnknownStore(index) => {
                write!(f, "no colour-blending store {index}")
            }
            CompositorError::MissingPreview(frame) => {
                write!(f, "frame {frame:?} has no preview raster")
            }
            CompositorError::PreviewTooLarge { chunks, capacity } => write!(
                f,
                "preview needs {chunks} atlas slots, the atlas holds {capacity}"
            ),
            CompositorError::Colormap(err) => write!(f, "colormap error: {err}"),
            CompositorError::Geometry(err) => write!(f, "panel geometry error: {err}"),
            CompositorError::Render(err) => write!(f, "render error: {err}"),
        }
    }
}

impl std::error::Error for CompositorError {}

impl From<ColormapError> for CompositorError {
    fn from(err: ColormapError) -> Self {
        CompositorError::Colormap(err)
    }
}

impl From<ViewTransformError> for CompositorError {
    fn from(err: ViewTransformError) -> Self {
        CompositorError::Geometry(err)
    }
}

impl From<RenderError> for CompositorError {
    fn from(err: RenderError) -> Self {
        CompositorError::Render(err)
    }
}

/// What a grid cell shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelContent {
    Frame(FrameId),
    /// Index into the scene's colour-blending stores.
    ColorBlending(usize),
}

/// Borrowed state a panel is drawn from.
pub struct PanelScene<'a> {
    pub arena: &'a FrameArena,
    pub stores: &'a [ColorBlendingStore],
    pub cache: &'a mut TileCache,
}

/// Exact tiles of one image plane that were not cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTiles {
    pub file_id: i32,
    pub channel: u32,
    pub stokes: u32,
    pub tiles: Vec<TileCoordinate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelReport {
    pub index: usize,
    pub drawn: usize,
    pub placeholders: usize,
    pub missing: Vec<MissingTiles>,
}

impl PanelReport {
    fn absorb(&mut self, arena: &FrameArena, frame: FrameId, raster: RasterReport) {
        self.drawn += raster.drawn;
        self.placeholders += raster.placeholders;
        if raster.missing.is_empty() {
            return;
        }
        let Some(frame) = arena.get(frame) else {
            return;
        };
        self.missing.push(MissingTiles {
            file_id: frame.file_id(),
            channel: frame.channel(),
            stokes: frame.stokes(),
            tiles: raster.missing,
        });
    }
}

/// Frames a panel shows and the labels its overlays use.
struct ShownFrames<'a> {
    base: FrameId,
    layers: Vec<FrameId>,
    filename: &'a str,
    custom_title: &'a str,
    contour_visible: bool,
    vector_overlay_visible: bool,
}

impl<'a> ShownFrames<'a> {
    fn single(frame: FrameId, filename: &'a str) -> Self {
        Self {
            base: frame,
            layers: vec![frame],
            filename,
            custom_title: "",
            contour_visible: true,
            vector_overlay_visible: true,
        }
    }

    fn blended(store: &'a ColorBlendingStore) -> Self {
        Self {
            base: store.base_frame(),
            layers: store.frames().collect(),
            filename: store.filename(),
            custom_title: store.title(),
            contour_visible: store.contour_visible(),
            vector_overlay_visible: store.vector_overlay_visible(),
        }
    }
}

pub struct PanelCompositor {
    layout: GridLayout,
    config: CompositorConfig,
    panels: Vec<Option<RgbaImage>>,
    overlays: Vec<Box<dyn PanelOverlay>>,
}

impl PanelCompositor {
    pub fn new(layout: GridLayout, config: CompositorConfig) -> Self {
        Self {
            panels: vec![None; layout.panel_count()],
            layout,
            config,
            overlays: Vec::new(),
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Changes the grid. Every panel has to be drawn again.
    pub fn set_layout(&mut self, layout: GridLayout) {
        self.layout = layout;
        self.panels = vec![None; layout.panel_count()];
    }

    pub fn add_overlay(&mut self, overlay: Box<dyn PanelOverlay>) {
        self.overlays.push(overlay);
    }

    pub fn panel_frame(&self) -> PanelFrame {
        PanelFrame {
            width: self.layout.panel_width(),
            height: self.layout.panel_height(),
            padding: self.config.padding,
            colorbar: self.config.colorbar,
        }
    }

    /// Size of the image area inside a panel, in device pixels.
    pub fn image_area(&self) -> (u32, u32) {
        let rect = self.panel_frame().image_rect();
        (rect.width, rect.height)
    }

    /// Forgets a panel's pixels; it exports as background until drawn again.
    pub fn clear_panel(&mut self, index: usize) {
        if let Some(panel) = self.panels.get_mut(index) {
            *panel = None;
        }
    }

    /// Last rendered pixels of a panel.
    pub fn panel_image(&self, index: usize) -> Option<&RgbaImage> {
        self.panels.get(index).and_then(Option::as_ref)
    }

    /// Draws panel `index` and keeps its pixels. Tiles pinned for the
    /// pass are released whatever the outcome.
    pub fn render_panel(
        &mut self,
        index: usize,
        content: PanelContent,
        scene: &mut PanelScene<'_>,
        service: &mut RenderService,
    ) -> Result<PanelReport, CompositorError> {
        let viewport = self
            .layout
            .panel_viewport(index)
            .ok_or(CompositorError::InvalidPanel(index))?;
        let result = self.draw_panel(index, viewport, content, scene, service);
        scene.cache.end_pass();
        let (report, panel) = result?;
        self.panels[index] = Some(panel);
        Ok(report)
    }

    /// Draws each listed panel. A failing panel is logged and keeps its
    /// previous content.
    pub fn render_panels(
        &mut self,
        panels: &[(usize, PanelContent)],
        scene: &mut PanelScene<'_>,
        service: &mut RenderService,
    ) -> Vec<PanelReport> {
        panels
            .iter()
            .filter_map(|(index, content)| {
                self.render_panel(*index, *content, scene, service)
                    .inspect_err(|err| warn!(panel = index, "panel render failed: {err}"))
                    .ok()
            })
            .collect()
    }

    /// Every panel at its grid position over the background colour.
    pub fn export_image_view(&self) -> RgbaImage {
        let mut canvas = RgbaImage::from_pixel(
            self.layout.canvas_width(),
            self.layout.canvas_height(),
            Rgba(self.config.background.to_array()),
        );
        for (index, panel) in self.panels.iter().enumerate() {
            let (Some(panel), Some(viewport)) = (panel, self.layout.panel_viewport(index)) else {
                continue;
            };
            imageops::overlay(
                &mut canvas,
                panel,
                i64::from(viewport.origin_x),
                i64::from(viewport.origin_y),
            );
        }
        canvas
    }

    fn draw_panel(
        &mut self,
        index: usize,
        viewport: Viewport,
        content: PanelContent,
        scene: &mut PanelScene<'_>,
        service: &mut RenderService,
    ) -> Result<(PanelReport, RgbaImage), CompositorError> {
        let frame = self.panel_frame();
        let image_rect = frame.image_rect();
        let inner = Viewport::new(
            viewport.origin_x + image_rect.x,
            viewport.origin_y + image_rect.y,
            image_rect.width,
            image_rect.height,
        );
        service.ensure_canvas(self.layout.canvas_width(), self.layout.canvas_height());
        service.render_panel(viewport, Some(self.config.background), |_| Ok(()))?;

        let mut report = PanelReport {
            index,
            ..PanelReport::default()
        };
        let arena = scene.arena;
        let stores = scene.stores;
        let (shown, blended) = match content {
            PanelContent::Frame(frame_id) => {
                let state = arena
                    .get(frame_id)
                    .ok_or(CompositorError::UnknownFrame(frame_id))?;
                if !inner.is_empty() {
                    self.draw_frame(frame_id, inner, scene, service, &mut report)?;
                }
                (ShownFrames::single(frame_id, &state.info().name), None)
            }
            PanelContent::ColorBlending(store_index) => {
                let store = stores
                    .get(store_index)
                    .ok_or(CompositorError::UnknownStore(store_index))?;
                let blended = if store.raster_visible() && !inner.is_empty() {
                    Some(self.draw_blended(store, inner, scene, service, &mut report)?)
                } else {
                    None
                };
                (ShownFrames::blended(store), blended)
            }
        };

        let mut panel = service.read_region(viewport)?;
        if let Some(blended) = blended {
            composite_premultiplied(&mut panel, &blended, image_rect.x, image_rect.y);
        }
        let context = OverlayContext {
            frame: shown.base,
            layer_frames: &shown.layers,
            contour_visible: shown.contour_visible,
            vector_overlay_visible: shown.vector_overlay_visible,
            arena,
            style: &self.config.raster_style,
            padding: self.config.padding,
            filename: shown.filename,
            custom_title: shown.custom_title,
        };
        layers::draw_overlays(&mut panel, &frame, &mut self.overlays, &context);
        debug!(
            panel = index,
            drawn = report.drawn,
            placeholders = report.placeholders,
            "panel rendered"
        );
        Ok((report, panel))
    }

    fn draw_frame(
        &self,
        frame: FrameId,
        inner: Viewport,
        scene: &mut PanelScene<'_>,
        service: &mut RenderService,
        report: &mut PanelReport,
    ) -> Result<(), CompositorError> {
        let size = (inner.width, inner.height);
        let Some(mut plan) = raster::plan_frame(scene.arena, scene.cache, frame, size, &self.config)?
        else {
            return Ok(());
        };
        let cache = &mut *scene.cache;
        let grid = self.config.pixel_grid;
        service.render_panel(inner, None, |backend| {
            raster::draw_plan(backend, cache, &mut plan, &grid)
        })?;
        report.absorb(scene.arena, frame, plan.report);
        Ok(())
    }

    /// Renders every layer of `store` alone, reads it back and adds it up.
    fn draw_blended(
        &self,
        store: &ColorBlendingStore,
        inner: Viewport,
        scene: &mut PanelScene<'_>,
        service: &mut RenderService,
        report: &mut PanelReport,
    ) -> Result<RgbaImage, CompositorError> {
        let size = (inner.width, inner.height);
        let grid = self.config.pixel_grid;
        let mut blended = RgbaImage::new(inner.width, inner.height);
        for (frame, alpha) in store.layers() {
            let Some(mut plan) =
                raster::plan_frame(scene.arena, scene.cache, frame, size, &self.config)?
            else {
                continue;
            };
            let cache = &mut *scene.cache;
            service.render_panel(inner, Some(Color::TRANSPARENT), |backend| {
                raster::draw_plan(backend, cache, &mut plan, &grid)
            })?;
            let layer = service.read_region(inner)?;
            blend_lighter(&mut blended, &layer, alpha);
            report.absorb(scene.arena, frame, plan.report);
        }
        service.render_panel(inner, Some(self.config.background), |_| Ok(()))?;
        Ok(blended)
    }
}
