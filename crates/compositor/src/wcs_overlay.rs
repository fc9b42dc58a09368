//! Coordinate grid and axes drawn by an external plotting library.
//!
//! The compositor only assembles the style string, the plot bounds and
//! the coordinate mapping; drawing is left to a [`WcsPlotter`].

use image::RgbaImage;
use model::Point2D;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use view::{WorldCoordinateSystem, WorldPoint};

use crate::layers::{LayerKind, OverlayContext, Padding, PanelOverlay};

/// Message the plotter reports when a grid gap is too coarse for the view.
pub const NO_GRID_CURVES_ERROR: &str = "No grid curves can be drawn for axis";

/// Region of the plot coordinate space shown on the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotBounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

pub trait WcsPlotter {
    fn plot(
        &mut self,
        wcs: &dyn WorldCoordinateSystem,
        bounds: PlotBounds,
        canvas_size: (u32, u32),
        padding: Padding,
        style: &str,
        canvas: &mut RgbaImage,
    );

    fn last_error_message(&self) -> Option<String>;

    fn clear_last_error(&mut self);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    pub visible: bool,
    pub system: String,
    pub grid_visible: bool,
    /// Grid spacing per axis; `None` lets the plotter choose.
    pub grid_gap: [Option<f64>; 2],
    /// Number format per axis, such as `hms` or `dms`.
    pub number_format: [Option<String>; 2],
    pub labels_visible: bool,
    pub title_visible: bool,
    /// Use the panel's custom title text instead of the file name.
    pub title_custom: bool,
    /// Curve tolerance in percent of the plot size.
    pub tolerance: f64,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            visible: true,
            system: "FK5".to_string(),
            grid_visible: true,
            grid_gap: [None, None],
            number_format: [None, None],
            labels_visible: true,
            title_visible: false,
            title_custom: false,
            tolerance: 2.0,
        }
    }
}

impl OverlaySettings {
    pub fn style_string(&self) -> String {
        let mut entries = vec![
            format!("System={}", self.system),
            format!("Grid={}", u8::from(self.grid_visible)),
        ];
        for (axis, gap) in self.grid_gap.iter().enumerate() {
            if let Some(gap) = gap {
                entries.push(format!("Gap({})={gap}", axis + 1));
            }
        }
        for (axis, format) in self.number_format.iter().enumerate() {
            if let Some(format) = format {
                entries.push(format!("Format({})={format}", axis + 1));
            }
        }
        entries.push(format!("TextLab={}", u8::from(self.labels_visible)));
        entries.push(format!("DrawTitle={}", u8::from(self.title_visible)));
        entries.push(format!("Tol={}", self.tolerance / 100.0));
        entries.join(", ")
    }
}

/// Per-plot facts the style depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotState<'a> {
    pub moving: bool,
    pub valid_wcs: bool,
    pub filename: &'a str,
    pub custom_title: &'a str,
}

/// Full style string for one plot.
pub fn plot_style(settings: &OverlaySettings, state: &PlotState<'_>) -> String {
    let mut entries: Vec<String> = split_style(&settings.style_string());
    if state.moving {
        let tolerance = (settings.tolerance * 2.0 / 100.0).max(0.1);
        entries.push(format!("Tol={tolerance}"));
    }
    if !state.valid_wcs {
        if let Some(index) = entries.iter().position(|entry| entry.starts_with("System=")) {
            entries.remove(index);
        }
        entries.retain(|entry| !is_indexed_entry(entry, "Format"));
    }
    let title = if settings.title_custom {
        state.custom_title
    } else {
        state.filename
    };
    entries.push(format!("Title={title}"));
    entries.join(", ")
}

/// Style for the second attempt: no explicit gaps and no grid lines.
pub fn reduced_style(style: &str) -> String {
    split_style(style)
        .into_iter()
        .filter(|entry| !is_indexed_entry(entry, "Gap"))
        .map(|entry| if entry == "Grid=1" { "Grid=0".to_string() } else { entry })
        .collect::<Vec<_>>()
        .join(", ")
}

fn split_style(style: &str) -> Vec<String> {
    style
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Matches `Name(<digit>)=...`.
fn is_indexed_entry(entry: &str, name: &str) -> bool {
    let Some(rest) = entry.strip_prefix(name) else {
        return false;
    };
    let bytes = rest.as_bytes();
    bytes.len() >= 4
        && bytes[0] == b'('
        && bytes[1].is_ascii_digit()
        && bytes[2] == b')'
        && bytes[3] == b'='
}

/// Plots once, and once more with a reduced style when the plotter could
/// not fit any grid curve. The plotter's error is cleared afterwards.
pub fn plot_with_retry(
    plotter: &mut dyn WcsPlotter,
    wcs: &dyn WorldCoordinateSystem,
    bounds: PlotBounds,
    padding: Padding,
    style: &str,
    canvas: &mut RgbaImage,
) {
    let size = canvas.dimensions();
    plotter.plot(wcs, bounds, size, padding, style, canvas);
    let retry = plotter
        .last_error_message()
        .is_some_and(|message| message.contains(NO_GRID_CURVES_ERROR));
    if retry {
        debug!("replotting overlay without grid");
        plotter.plot(wcs, bounds, size, padding, &reduced_style(style), canvas);
    }
    if let Some(message) = plotter.last_error_message() {
        warn!("overlay plot failed: {message}");
    }
    plotter.clear_last_error();
}

/// Plot coordinates of an image: texel-edge x, and texel-edge y divided by
/// the pixel aspect ratio so non-square pixels plot square.
pub struct PlotCoordinates<'a> {
    pixels: &'a dyn WorldCoordinateSystem,
    aspect: f64,
}

impl<'a> PlotCoordinates<'a> {
    pub fn new(pixels: &'a dyn WorldCoordinateSystem, aspect: f64) -> Self {
        Self { pixels, aspect }
    }
}

impl WorldCoordinateSystem for PlotCoordinates<'_> {
    fn pixel_to_world(&self, point: Point2D) -> Option<WorldPoint> {
        self.pixels
            .pixel_to_world(Point2D::new(point.x - 0.5, point.y * self.aspect - 0.5))
    }

    fn world_to_pixel(&self, world: WorldPoint) -> Option<Point2D> {
        self.pixels
            .world_to_pixel(world)
            .map(|pixel| Point2D::new(pixel.x + 0.5, (pixel.y + 0.5) / self.aspect))
    }
}

/// Stand-in coordinates for images without a usable WCS: pixel indices.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelCoordinates;

impl WorldCoordinateSystem for PixelCoordinates {
    fn pixel_to_world(&self, pixel: Point2D) -> Option<WorldPoint> {
        pixel.is_finite().then(|| WorldPoint::new(pixel.x, pixel.y))
    }

    fn world_to_pixel(&self, world: WorldPoint) -> Option<Point2D> {
        Some(Point2D::new(world.lon, world.lat))
    }
}

/// Panel layer drawing the coordinate overlay of the panel's frame.
pub struct WcsOverlay {
    plotter: Box<dyn WcsPlotter>,
    settings: OverlaySettings,
}

impl WcsOverlay {
    pub fn new(plotter: Box<dyn WcsPlotter>, settings: OverlaySettings) -> Self {
        Self { plotter, settings }
    }

    pub fn settings(&self) -> &OverlaySettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut OverlaySettings {
        &mut self.settings
    }
}

impl PanelOverlay for WcsOverlay {
    fn kind(&self) -> LayerKind {
        LayerKind::WcsOverlay
    }

    fn draw(&mut self, context: &OverlayContext<'_>, canvas: &mut RgbaImage) {
        if !self.settings.visible {
            return;
        }
        let Some(frame) = context.arena.get(context.frame) else {
            return;
        };
        // Matched frames are plotted in their reference's coordinates.
        let root_id = context.arena.spatial_root(context.frame);
        let Some(root) = context.arena.get(root_id) else {
            return;
        };
        let Some(view) = context.arena.required_view(root_id) else {
            return;
        };

        let aspect = frame.aspect_ratio();
        let pixels: &dyn WorldCoordinateSystem = match &root.info().wcs {
            Some(wcs) => wcs,
            None => &PixelCoordinates,
        };
        let coordinates = PlotCoordinates::new(pixels, aspect);
        let bounds = PlotBounds {
            x_min: view.x_min(),
            x_max: view.x_max(),
            y_min: view.y_min() / aspect,
            y_max: view.y_max() / aspect,
        };
        let style = plot_style(
            &self.settings,
            &PlotState {
                moving: frame.is_moving(),
                valid_wcs: root.has_valid_wcs(),
                filename: context.filename,
                custom_title: context.custom_title,
            },
        );
        plot_with_retry(
            self.plotter.as_mut(),
            &coordinates,
            bounds,
            context.padding,
            &style,
            canvas,
        );
    }
}
