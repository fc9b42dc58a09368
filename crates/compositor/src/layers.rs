//! Layer stack of one panel: draw order and where each layer sits.

use document::{FrameArena, FrameId, RasterStyle};
use image::{Rgba, RgbaImage, imageops};
use serde::{Deserialize, Serialize};

/// Panel layers, listed bottom to top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Raster,
    Contour,
    VectorOverlay,
    Colorbar,
    BeamProfile,
    WcsOverlay,
    Catalog,
    Regions,
}

impl LayerKind {
    pub const Z_ORDER: [LayerKind; 8] = [
        LayerKind::Raster,
        LayerKind::Contour,
        LayerKind::VectorOverlay,
        LayerKind::Colorbar,
        LayerKind::BeamProfile,
        LayerKind::WcsOverlay,
        LayerKind::Catalog,
        LayerKind::Regions,
    ];

    pub fn z_index(self) -> usize {
        Self::Z_ORDER
            .iter()
            .position(|kind| *kind == self)
            .expect("every layer kind has a z slot")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Padding {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl Padding {
    pub const fn uniform(value: u32) -> Self {
        Self {
            left: value,
            right: value,
            top: value,
            bottom: value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorbarPosition {
    #[default]
    Right,
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorbarConfig {
    pub visible: bool,
    pub position: ColorbarPosition,
    /// Thickness of the bar in device pixels.
    pub width: u32,
    /// Gap between the image and the bar.
    pub offset: u32,
}

impl Default for ColorbarConfig {
    fn default() -> Self {
        Self {
            visible: true,
            position: ColorbarPosition::Right,
            width: 15,
            offset: 5,
        }
    }
}

/// Panel-local rectangle, y down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Geometry of one grid cell: the image area inside the padding, the
/// colorbar beside it and the overlay covering everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelFrame {
    pub width: u32,
    pub height: u32,
    pub padding: Padding,
    pub colorbar: ColorbarConfig,
}

impl PanelFrame {
    pub fn image_rect(&self) -> LayerRect {
        LayerRect {
            x: self.padding.left.min(self.width),
            y: self.padding.top.min(self.height),
            width: self
                .width
                .saturating_sub(self.padding.left + self.padding.right),
            height: self
                .height
                .saturating_sub(self.padding.top + self.padding.bottom),
        }
    }

    /// Where `kind` is drawn, or `None` when it gets no area.
    pub fn layer_rect(&self, kind: LayerKind) -> Option<LayerRect> {
        let image = self.image_rect();
        let rect = match kind {
            LayerKind::WcsOverlay => LayerRect {
                x: 0,
                y: 0,
                width: self.width,
                height: self.height,
            },
            LayerKind::Colorbar => {
                if !self.colorbar.visible {
                    return None;
                }
                self.colorbar_rect(image)?
            }
            LayerKind::Raster
            | LayerKind::Contour
            | LayerKind::VectorOverlay
            | LayerKind::BeamProfile
            | LayerKind::Catalog
            | LayerKind::Regions => image,
        };
        (rect.width > 0 && rect.height > 0).then_some(rect)
    }

    fn colorbar_rect(&self, image: LayerRect) -> Option<LayerRect> {
        let ColorbarConfig { width, offset, .. } = self.colorbar;
        let rect = match self.colorbar.position {
            ColorbarPosition::Right => {
                let x = image.x + image.width + offset;
                LayerRect {
                    x,
                    y: image.y,
                    width: width.min(self.width.saturating_sub(x)),
                    height: image.height,
                }
            }
            ColorbarPosition::Top => {
                let y = image.y.checked_sub(offset + width)?;
                LayerRect {
                    x: image.x,
                    y,
                    width: image.width,
                    height: width,
                }
            }
            ColorbarPosition::Bottom => {
                let y = image.y + image.height + offset;
                LayerRect {
                    x: image.x,
                    y,
                    width: image.width,
                    height: width.min(self.height.saturating_sub(y)),
                }
            }
        };
        Some(rect)
    }
}

#[derive(Clone, Copy)]
pub struct OverlayContext<'a> {
    /// Frame the panel shows; the base frame of a colour-blended panel.
    /// Contour and vector overlays see each of `layer_frames` here in turn.
    pub frame: FrameId,
    /// Every frame drawn in the panel, base first.
    pub layer_frames: &'a [FrameId],
    pub contour_visible: bool,
    pub vector_overlay_visible: bool,
    pub arena: &'a FrameArena,
    pub style: &'a RasterStyle,
    pub padding: Padding,
    pub filename: &'a str,
    pub custom_title: &'a str,
}

/// A layer drawn on the CPU above the raster.
pub trait PanelOverlay {
    fn kind(&self) -> LayerKind;

    /// Draws into a transparent canvas the size of the layer rectangle.
    fn draw(&mut self, context: &OverlayContext<'_>, canvas: &mut RgbaImage);
}

/// Draws `overlays` onto `panel` in z order, each clipped to its own
/// rectangle. Contour and vector overlays are drawn once per layer frame
/// and skipped when hidden.
pub fn draw_overlays(
    panel: &mut RgbaImage,
    frame: &PanelFrame,
    overlays: &mut [Box<dyn PanelOverlay>],
    context: &OverlayContext<'_>,
) {
    let mut order: Vec<usize> = (0..overlays.len()).collect();
    order.sort_by_key(|index| overlays[*index].kind().z_index());
    for index in order {
        let overlay = &mut overlays[index];
        let Some(rect) = frame.layer_rect(overlay.kind()) else {
            continue;
        };
        let mut layer = RgbaImage::new(rect.width, rect.height);
        let per_frame = match overlay.kind() {
            LayerKind::Contour => Some(context.contour_visible),
            LayerKind::VectorOverlay => Some(context.vector_overlay_visible),
            _ => None,
        };
        match per_frame {
            Some(false) => continue,
            Some(true) => {
                for frame in context.layer_frames {
                    let frame_context = OverlayContext {
                        frame: *frame,
                        ..*context
                    };
                    overlay.draw(&frame_context, &mut layer);
                }
            }
            None => overlay.draw(context, &mut layer),
        }
        imageops::overlay(panel, &layer, i64::from(rect.x), i64::from(rect.y));
    }
}

/// Colour bar of the frame's effective colormap, low values at the bottom
/// (vertical) or left (horizontal).
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorbarOverlay;

impl PanelOverlay for ColorbarOverlay {
    fn kind(&self) -> LayerKind {
        LayerKind::Colorbar
    }

    fn draw(&mut self, context: &OverlayContext<'_>, canvas: &mut RgbaImage) {
        let Some(config) = context.arena.effective_render_config(context.frame) else {
            return;
        };
        let Ok(lut) = config.colormap_lut() else {
            return;
        };
        let (width, height) = canvas.dimensions();
        let vertical = height >= width;
        let steps = if vertical { height } else { width };
        for (x, y, pixel) in canvas.enumerate_pixels_mut() {
            let step = if vertical { height - 1 - y } else { x };
            let value = if steps > 1 {
                step as f32 / (steps - 1) as f32
            } else {
                0.0
            };
            *pixel = Rgba(lut.lookup(value, config.inverted()));
        }
    }
}
