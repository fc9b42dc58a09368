use std::fmt;

mod tiling;

pub use tiling::{
    TileGrid, get_required_tiles, layer_to_mip, mip_to_layer, tile_grid, tile_image_rect,
    tile_pixel_size, total_layers,
};

/// Edge length of one raster tile in image pixels at its own resolution.
pub const TILE_SIZE: u32 = 256;
/// Edge length of one atlas texture page in texels.
pub const TEXTURE_SIZE: u32 = 4096;
/// Deepest layer a tile coordinate can address (12-bit x and y).
pub const MAX_TILE_LAYER: u32 = 12;

const TILE_XY_BITS: u32 = 12;
const TILE_X_MASK: u32 = (1 << TILE_XY_BITS) - 1;
const TILE_Y_SHIFT: u32 = TILE_XY_BITS;
const TILE_LAYER_SHIFT: u32 = 2 * TILE_XY_BITS;
const TILE_LAYER_MASK: u32 = (1 << 7) - 1;

slotmap::new_key_type! {
    pub struct FrameId;
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameViewError {
    InvertedBounds,
    InvalidMip,
    NonFiniteValue,
}

impl fmt::Display for FrameViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameViewError::InvertedBounds => write!(f, "frame view min exceeds max"),
            FrameViewError::InvalidMip => write!(f, "frame view mip must be positive"),
            FrameViewError::NonFiniteValue => write!(f, "frame view contains non-finite value"),
        }
    }
}

impl std::error::Error for FrameViewError {}

/// Axis-aligned window into image space plus the sampling level it is shown at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameView {
    x_min: f64,
    x_max: f64,
    y_min: f64,
    y_max: f64,
    mip: f64,
}

impl FrameView {
    pub fn new(
        x_min: f64,
        x_max: f64,
        y_min: f64,
        y_max: f64,
        mip: f64,
    ) -> Result<Self, FrameViewError> {
        if ![x_min, x_max, y_min, y_max, mip].iter().all(|v| v.is_finite()) {
            return Err(FrameViewError::NonFiniteValue);
        }
        if mip <= 0.0 {
            return Err(FrameViewError::InvalidMip);
        }
        if x_min > x_max || y_min > y_max {
            return Err(FrameViewError::InvertedBounds);
        }
        Ok(Self {
            x_min,
            x_max,
            y_min,
            y_max,
            mip,
        })
    }

    pub fn x_min(&self) -> f64 {
        self.x_min
    }

    pub fn x_max(&self) -> f64 {
        self.x_max
    }

    pub fn y_min(&self) -> f64 {
        self.y_min
    }

    pub fn y_max(&self) -> f64 {
        self.y_max
    }

    pub fn mip(&self) -> f64 {
        self.mip
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn center(&self) -> Point2D {
        Point2D::new(
            (self.x_min + self.x_max) * 0.5,
            (self.y_min + self.y_max) * 0.5,
        )
    }

    pub fn has_area(&self) -> bool {
        self.x_max > self.x_min && self.y_max > self.y_min
    }

    /// Clips the view to `[0, width] x [0, height]`.
    ///
    /// A view entirely outside the image collapses onto the nearest edge and
    /// reports no area.
    pub fn bounded(&self, image: ImageSize) -> Self {
        let width = image.width as f64;
        let height = image.height as f64;
        let x_min = self.x_min.clamp(0.0, width);
        let x_max = self.x_max.clamp(0.0, width);
        let y_min = self.y_min.clamp(0.0, height);
        let y_max = self.y_max.clamp(0.0, height);
        Self {
            x_min,
            x_max: x_max.max(x_min),
            y_min,
            y_max: y_max.max(y_min),
            mip: self.mip,
        }
    }

    pub fn with_mip(&self, mip: f64) -> Result<Self, FrameViewError> {
        Self::new(self.x_min, self.x_max, self.y_min, self.y_max, mip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileCoordinateError {
    LayerOutOfRange,
    PositionOutOfRange,
}

impl fmt::Display for TileCoordinateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileCoordinateError::LayerOutOfRange => {
                write!(f, "tile layer exceeds {MAX_TILE_LAYER}")
            }
            TileCoordinateError::PositionOutOfRange => {
                write!(f, "tile position outside its layer grid")
            }
        }
    }
}

impl std::error::Error for TileCoordinateError {}

/// Position of a tile in the multi-resolution pyramid.
///
/// Layer 0 is a single tile covering the whole image; each deeper layer
/// doubles the grid along both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    layer: u8,
    x: u16,
    y: u16,
}

impl TileCoordinate {
    pub fn new(layer: u32, x: u32, y: u32) -> Result<Self, TileCoordinateError> {
        if layer > MAX_TILE_LAYER {
            return Err(TileCoordinateError::LayerOutOfRange);
        }
        let edge = 1u32 << layer;
        if x >= edge || y >= edge {
            return Err(TileCoordinateError::PositionOutOfRange);
        }
        Ok(Self {
            layer: layer as u8,
            x: x as u16,
            y: y as u16,
        })
    }

    pub const ROOT: Self = Self {
        layer: 0,
        x: 0,
        y: 0,
    };

    pub fn layer(self) -> u32 {
        self.layer as u32
    }

    pub fn x(self) -> u32 {
        self.x as u32
    }

    pub fn y(self) -> u32 {
        self.y as u32
    }

    pub fn encode(self) -> EncodedTile {
        EncodedTile(self.layer() << TILE_LAYER_SHIFT | self.y() << TILE_Y_SHIFT | self.x())
    }

    /// Coarser tile containing this one; `None` at layer 0.
    pub fn parent(self) -> Option<Self> {
        let layer = self.layer().checked_sub(1)?;
        Some(Self {
            layer: layer as u8,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// The four tiles one layer deeper covering this tile; `None` at the deepest layer.
    pub fn children(self) -> Option<[Self; 4]> {
        let layer = self.layer() + 1;
        if layer > MAX_TILE_LAYER {
            return None;
        }
        let layer = layer as u8;
        let x = self.x * 2;
        let y = self.y * 2;
        Some([
            Self { layer, x, y },
            Self { layer, x: x + 1, y },
            Self { layer, x, y: y + 1 },
            Self {
                layer,
                x: x + 1,
                y: y + 1,
            },
        ])
    }
}

/// Compact integer key of a [`TileCoordinate`]:
/// | unused (1) | layer (7) | y (12) | x (12) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EncodedTile(u32);

impl EncodedTile {
    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn from_raw(raw: u32) -> Result<Self, TileCoordinateError> {
        Self(raw).decode().map(TileCoordinate::encode)
    }

    pub fn decode(self) -> Result<TileCoordinate, TileCoordinateError> {
        let layer = (self.0 >> TILE_LAYER_SHIFT) & TILE_LAYER_MASK;
        let y = (self.0 >> TILE_Y_SHIFT) & TILE_X_MASK;
        let x = self.0 & TILE_X_MASK;
        TileCoordinate::new(layer, x, y)
    }
}

impl From<TileCoordinate> for EncodedTile {
    fn from(tile: TileCoordinate) -> Self {
        tile.encode()
    }
}
