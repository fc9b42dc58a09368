//! Shared vocabulary between the compositor and the render backends.
//!
//! Panel rectangles, the grid they are laid out in, colours, and the
//! plain-old-data uniform records uploaded for every raster draw.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

pub mod colormap;

pub use colormap::{
    CUSTOM_COLORMAP, ColormapError, ColormapLut, CustomGradient, GRADIENT_COLORMAPS,
    GradientColormap, LUT_SIZE, MONO_COLORMAPS, MonoColormap, colormap_lut, gradient_stops,
    is_known_colormap, mono_colormap_color, mono_colormap_for_color,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderDomain {
    Main,
    Preview,
}

impl RenderDomain {
    pub const ALL: [RenderDomain; 2] = [RenderDomain::Main, RenderDomain::Preview];
}

/// Rectangle of the shared canvas, origin at the top-left, rows growing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub origin_x: u32,
    pub origin_y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub const fn new(origin_x: u32, origin_y: u32, width: u32, height: u32) -> Self {
        Self {
            origin_x,
            origin_y,
            width,
            height,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.origin_x
            .checked_add(self.width)
            .expect("viewport right edge overflow")
    }

    pub fn bottom(&self) -> u32 {
        self.origin_y
            .checked_add(self.height)
            .expect("viewport bottom edge overflow")
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.origin_x && x < self.right() && y >= self.origin_y && y < self.bottom()
    }

    /// Part of `self` inside a `width` x `height` canvas.
    pub fn clamped_to(&self, width: u32, height: u32) -> Viewport {
        let origin_x = self.origin_x.min(width);
        let origin_y = self.origin_y.min(height);
        Viewport {
            origin_x,
            origin_y,
            width: self.right().min(width) - origin_x,
            height: self.bottom().min(height) - origin_y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridLayoutError {
    EmptyGrid,
    EmptyPanel,
    CanvasTooLarge,
}

impl fmt::Display for GridLayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyGrid => write!(f, "grid needs at least one row and one column"),
            Self::EmptyPanel => write!(f, "panel size must be non-zero"),
            Self::CanvasTooLarge => write!(f, "grid canvas size overflows"),
        }
    }
}

impl std::error::Error for GridLayoutError {}

/// Panels laid out row-major: panel `i` sits at column `i % columns`,
/// row `i / columns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    columns: u32,
    rows: u32,
    panel_width: u32,
    panel_height: u32,
}

impl GridLayout {
    pub fn new(
        columns: u32,
        rows: u32,
        panel_width: u32,
        panel_height: u32,
    ) -> Result<Self, GridLayoutError> {
        if columns == 0 || rows == 0 {
            return Err(GridLayoutError::EmptyGrid);
        }
        if panel_width == 0 || panel_height == 0 {
            return Err(GridLayoutError::EmptyPanel);
        }
        if columns.checked_mul(panel_width).is_none() || rows.checked_mul(panel_height).is_none()
        {
            return Err(GridLayoutError::CanvasTooLarge);
        }
        Ok(Self {
            columns,
            rows,
            panel_width,
            panel_height,
        })
    }

    pub const fn columns(&self) -> u32 {
        self.columns
    }

    pub const fn rows(&self) -> u32 {
        self.rows
    }

    pub const fn panel_width(&self) -> u32 {
        self.panel_width
    }

    pub const fn panel_height(&self) -> u32 {
        self.panel_height
    }

    pub const fn panel_count(&self) -> usize {
        (self.columns * self.rows) as usize
    }

    pub const fn canvas_width(&self) -> u32 {
        self.columns * self.panel_width
    }

    pub const fn canvas_height(&self) -> u32 {
        self.rows * self.panel_height
    }

    /// `(column, row)` of panel `index`.
    pub fn panel_position(&self, index: usize) -> Option<(u32, u32)> {
        if index >= self.panel_count() {
            return None;
        }
        let index = index as u32;
        Some((index % self.columns, index / self.columns))
    }

    pub fn panel_viewport(&self, index: usize) -> Option<Viewport> {
        let (column, row) = self.panel_position(index)?;
        Some(Viewport::new(
            column * self.panel_width,
            row * self.panel_height,
            self.panel_width,
            self.panel_height,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorParseError {
    MissingHash,
    BadLength(usize),
    BadDigit,
}

impl fmt::Display for ColorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHash => write!(f, "colour must start with '#'"),
            Self::BadLength(len) => write!(f, "colour has {len} hex digits, expected 6 or 8"),
            Self::BadDigit => write!(f, "colour contains a non-hex digit"),
        }
    }
}

impl std::error::Error for ColorParseError {}

/// 8-bit RGBA colour, written as `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_hex(text: &str) -> Result<Self, ColorParseError> {
        let digits = text.strip_prefix('#').ok_or(ColorParseError::MissingHash)?;
        if digits.len() != 6 && digits.len() != 8 {
            return Err(ColorParseError::BadLength(digits.len()));
        }
        let byte = |i: usize| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or(ColorParseError::BadDigit)
        };
        let a = if digits.len() == 8 { byte(6)? } else { 255 };
        Ok(Self::rgba(byte(0)?, byte(2)?, byte(4)?, a))
    }

    /// Lowercase `#rrggbb`, with alpha appended only when not opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }

    pub const fn same_rgb(&self, other: &Color) -> bool {
        self.r == other.r && self.g == other.g && self.b == other.b
    }

    pub const fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn to_f32(self) -> [f32; 4] {
        self.to_array().map(|c| f32::from(c) / 255.0)
    }
}

impl TryFrom<String> for Color {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value)
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.to_hex()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Transfer function applied to the normalised pixel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingType {
    #[default]
    Linear,
    Log,
    Sqrt,
    Squared,
    Gamma,
    Power,
}

impl ScalingType {
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::Linear => 0,
            Self::Log => 1,
            Self::Sqrt => 2,
            Self::Squared => 3,
            Self::Gamma => 4,
            Self::Power => 5,
        }
    }

    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Linear),
            1 => Some(Self::Log),
            2 => Some(Self::Sqrt),
            3 => Some(Self::Squared),
            4 => Some(Self::Gamma),
            5 => Some(Self::Power),
            _ => None,
        }
    }
}

/// Per-draw record for one raster tile.
///
/// Positions are panel pixels with the origin at the bottom-left corner
/// and y growing up; texel `(0, 0)` of a tile is its lowest image row.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TileUniforms {
    /// `[offset_x, offset_y, scale_x, scale_y]`: panel position of the tile's
    /// first texel corner and panel pixels per texel.
    pub placement: [f32; 4],
    /// `[offset_x, offset_y, width, height]` of the tile in its atlas page.
    pub texture: [f32; 4],
    /// `[origin_x, origin_y, angle, page]`: rotation about a panel point,
    /// radians counter-clockwise, and the atlas page.
    pub rotation: [f32; 4],
    /// `[cutoff, opacity, 0, 0]` of the pixel grid in texel units.
    pub grid: [f32; 4],
}

const_assert_eq!(std::mem::size_of::<TileUniforms>(), 64);

impl TileUniforms {
    pub fn page(&self) -> u32 {
        self.rotation[3] as u32
    }
}

/// Shading parameters shared by every tile of one raster draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RasterUniforms {
    /// `[min, max, bias, contrast]`.
    pub scaling: [f32; 4],
    /// `[gamma, exponent, opacity, 0]`; exponent drives log and power scaling.
    pub transfer: [f32; 4],
    /// `[scaling type, inverted, smoothed, 0]`.
    pub flags: [u32; 4],
    pub nan_color: [f32; 4],
    pub grid_color: [f32; 4],
}

const_assert_eq!(std::mem::size_of::<RasterUniforms>(), 80);

impl Default for RasterUniforms {
    fn default() -> Self {
        Self {
            scaling: [0.0, 1.0, 0.0, 1.0],
            transfer: [1.0, 1000.0, 1.0, 0.0],
            flags: [ScalingType::Linear.as_u32(), 0, 0, 0],
            nan_color: Color::TRANSPARENT.to_f32(),
            grid_color: Color::WHITE.to_f32(),
        }
    }
}

impl RasterUniforms {
    pub fn scaling_type(&self) -> ScalingType {
        ScalingType::from_u32(self.flags[0]).unwrap_or_default()
    }

    pub const fn inverted(&self) -> bool {
        self.flags[1] != 0
    }

    pub const fn smoothed(&self) -> bool {
        self.flags[2] != 0
    }

    pub const fn opacity(&self) -> f32 {
        self.transfer[2]
    }
}
