//! Raster tile storage.
//!
//! Tiles arrive as CPU pixel blocks, are uploaded into slots of a shared
//! texture atlas on first use and then drop their CPU copy. The cache keeps
//! recency over everything it holds and evicts uploaded tiles only when an
//! upload finds the atlas full.

use std::fmt;

pub mod atlas;
mod cache;

pub use atlas::{AtlasError, AtlasSlot, AtlasTier, TileTextureParameters};
pub use cache::{TileCache, TileCacheConfig, TileCacheError, TileCacheStats};
pub use model::{EncodedTile, TileCoordinate};

/// Identity of a tile across all open images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCacheKey {
    pub file_id: i32,
    pub channel: u32,
    pub stokes: u32,
    pub tile: EncodedTile,
}

impl TileCacheKey {
    pub fn new(file_id: i32, channel: u32, stokes: u32, tile: TileCoordinate) -> Self {
        Self {
            file_id,
            channel,
            stokes,
            tile: tile.encode(),
        }
    }

    pub fn with_tile(self, tile: TileCoordinate) -> Self {
        Self {
            tile: tile.encode(),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterTileError {
    EmptyTile,
    OversizedTile { width: u32, height: u32 },
    DataLengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for RasterTileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterTileError::EmptyTile => write!(f, "tile has zero width or height"),
            RasterTileError::OversizedTile { width, height } => write!(
                f,
                "tile {width}x{height} exceeds {0}x{0}",
                model::TILE_SIZE
            ),
            RasterTileError::DataLengthMismatch { expected, actual } => {
                write!(f, "tile data has {actual} values, expected {expected}")
            }
        }
    }
}

impl std::error::Error for RasterTileError {}

/// One block of image data, row-major, `width * height` values.
#[derive(Debug)]
pub struct RasterTile {
    data: Option<Box<[f32]>>,
    width: u32,
    height: u32,
    texture_slot: Option<AtlasSlot>,
}

impl RasterTile {
    pub fn new(width: u32, height: u32, data: Box<[f32]>) -> Result<Self, RasterTileError> {
        if width == 0 || height == 0 {
            return Err(RasterTileError::EmptyTile);
        }
        if width > model::TILE_SIZE || height > model::TILE_SIZE {
            return Err(RasterTileError::OversizedTile { width, height });
        }
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(RasterTileError::DataLengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data: Some(data),
            width,
            height,
            texture_slot: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// CPU copy; `None` once the tile lives in the atlas.
    pub fn data(&self) -> Option<&[f32]> {
        self.data.as_deref()
    }

    pub fn texture_slot(&self) -> Option<AtlasSlot> {
        self.texture_slot
    }

    pub fn is_uploaded(&self) -> bool {
        self.texture_slot.is_some()
    }
}

/// Receives tile pixels for the atlas texture.
pub trait TileTextureSink {
    fn upload_tile(
        &mut self,
        parameters: TileTextureParameters,
        width: u32,
        height: u32,
        data: &[f32],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_tile_validates_shape() {
        assert_eq!(
            RasterTile::new(0, 4, Box::new([])).unwrap_err(),
            RasterTileError::EmptyTile
        );
        assert_eq!(
            RasterTile::new(2, 2, vec![0.0; 3].into_boxed_slice()).unwrap_err(),
            RasterTileError::DataLengthMismatch {
                expected: 4,
                actual: 3
            }
        );
        assert!(matches!(
            RasterTile::new(512, 1, vec![0.0; 512].into_boxed_slice()),
            Err(RasterTileError::OversizedTile { .. })
        ));
    }

    #[test]
    fn fresh_tile_holds_cpu_data() {
        let tile = RasterTile::new(2, 1, vec![1.0, 2.0].into_boxed_slice()).unwrap();
        assert_eq!(tile.data(), Some(&[1.0, 2.0][..]));
        assert!(!tile.is_uploaded());
    }
}
