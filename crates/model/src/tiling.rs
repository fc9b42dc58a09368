//! Tile pyramid arithmetic.
//!
//! The pyramid has `total_layers + 1` levels. Level `L` samples the image
//! every `2^(total_layers - L)` pixels, so one tile at level `L` covers
//! `tile_size * mip` image pixels along each axis.

use crate::{FrameView, ImageSize, MAX_TILE_LAYER, TileCoordinate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub columns: u32,
    pub rows: u32,
}

pub fn total_layers(image: ImageSize, tile_size: u32) -> u32 {
    assert!(tile_size > 0, "tile size must be positive");
    let columns = image.width.div_ceil(tile_size).max(1);
    let rows = image.height.div_ceil(tile_size).max(1);
    let widest = columns.max(rows);
    u32::BITS - (widest - 1).leading_zeros()
}

pub fn layer_to_mip(layer: u32, image: ImageSize, tile_size: u32) -> u32 {
    let total = total_layers(image, tile_size);
    1 << (total - layer.min(total))
}

/// Finest layer whose mip does not exceed `mip`.
pub fn mip_to_layer(mip: f64, image: ImageSize, tile_size: u32) -> u32 {
    let total = total_layers(image, tile_size);
    let level = if mip.is_finite() && mip > 1.0 {
        mip.log2().floor() as u32
    } else {
        0
    };
    total.saturating_sub(level).min(MAX_TILE_LAYER)
}

pub fn tile_grid(layer: u32, image: ImageSize, tile_size: u32) -> TileGrid {
    let extent = tile_size * layer_to_mip(layer, image, tile_size);
    TileGrid {
        columns: image.width.div_ceil(extent),
        rows: image.height.div_ceil(extent),
    }
}

/// Image-space rectangle covered by `tile`, clipped to the image.
pub fn tile_image_rect(tile: TileCoordinate, image: ImageSize, tile_size: u32) -> FrameView {
    let mip = layer_to_mip(tile.layer(), image, tile_size);
    let extent = (tile_size * mip) as f64;
    let x_min = (tile.x() as f64 * extent).min(image.width as f64);
    let y_min = (tile.y() as f64 * extent).min(image.height as f64);
    let x_max = ((tile.x() + 1) as f64 * extent).min(image.width as f64);
    let y_max = ((tile.y() + 1) as f64 * extent).min(image.height as f64);
    FrameView::new(x_min, x_max, y_min, y_max, mip as f64)
        .expect("tile rectangle is ordered and finite")
}

/// Width and height in texels of the data block delivered for `tile`.
pub fn tile_pixel_size(tile: TileCoordinate, image: ImageSize, tile_size: u32) -> (u32, u32) {
    let rect = tile_image_rect(tile, image, tile_size);
    let mip = rect.mip();
    (
        (rect.width() / mip).ceil() as u32,
        (rect.height() / mip).ceil() as u32,
    )
}

/// Tiles needed to draw `view`, closest to the view centre first.
///
/// The layer is picked from `view.mip()`; tiles outside the image are never
/// returned. An empty result means the view does not overlap the image.
pub fn get_required_tiles(
    view: &FrameView,
    image: ImageSize,
    tile_size: u32,
) -> Vec<TileCoordinate> {
    if image.width == 0 || image.height == 0 || tile_size == 0 {
        return Vec::new();
    }
    let bounded = view.bounded(image);
    if !bounded.has_area() {
        return Vec::new();
    }

    let layer = mip_to_layer(view.mip(), image, tile_size);
    let extent = (tile_size * layer_to_mip(layer, image, tile_size)) as f64;
    let grid = tile_grid(layer, image, tile_size);

    let x_start = (bounded.x_min() / extent).floor() as u32;
    let y_start = (bounded.y_min() / extent).floor() as u32;
    let x_end = ((bounded.x_max() / extent).ceil() as u32).min(grid.columns);
    let y_end = ((bounded.y_max() / extent).ceil() as u32).min(grid.rows);

    let mut tiles = Vec::with_capacity(((x_end - x_start) * (y_end - y_start)) as usize);
    for y in y_start..y_end {
        for x in x_start..x_end {
            tiles.push(TileCoordinate::new(layer, x, y).expect("tile inside its layer grid"));
        }
    }

    let center = bounded.center();
    let center_x = center.x / extent;
    let center_y = center.y / extent;
    let distance = |tile: &TileCoordinate| {
        let dx = tile.x() as f64 + 0.5 - center_x;
        let dy = tile.y() as f64 + 0.5 - center_y;
        dx * dx + dy * dy
    };
    tiles.sort_by(|a, b| distance(a).total_cmp(&distance(b)));
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TILE_SIZE;
    use proptest::prelude::*;

    #[test]
    fn total_layers_grows_with_image() {
        assert_eq!(total_layers(ImageSize::new(200, 100), TILE_SIZE), 0);
        assert_eq!(total_layers(ImageSize::new(512, 256), TILE_SIZE), 1);
        assert_eq!(total_layers(ImageSize::new(1000, 1000), TILE_SIZE), 2);
        assert_eq!(total_layers(ImageSize::new(1025, 10), TILE_SIZE), 3);
    }

    #[test]
    fn mip_and_layer_are_inverse_on_powers_of_two() {
        let image = ImageSize::new(4000, 3000);
        let total = total_layers(image, TILE_SIZE);
        for layer in 0..=total {
            let mip = layer_to_mip(layer, image, TILE_SIZE);
            assert_eq!(mip_to_layer(mip as f64, image, TILE_SIZE), layer);
        }
    }

    #[test]
    fn fractional_mip_picks_finer_layer() {
        let image = ImageSize::new(1024, 1024);
        assert_eq!(mip_to_layer(3.0, image, TILE_SIZE), 1);
        assert_eq!(mip_to_layer(0.25, image, TILE_SIZE), 2);
        assert_eq!(mip_to_layer(64.0, image, TILE_SIZE), 0);
    }

    #[test]
    fn small_image_needs_single_root_tile() {
        let image = ImageSize::new(200, 120);
        let view = FrameView::new(0.0, 200.0, 0.0, 120.0, 1.0).unwrap();
        assert_eq!(
            get_required_tiles(&view, image, TILE_SIZE),
            vec![TileCoordinate::ROOT]
        );
    }

    #[test]
    fn required_tiles_start_at_view_centre() {
        let image = ImageSize::new(1024, 1024);
        let view = FrameView::new(256.0, 1024.0, 256.0, 1024.0, 1.0).unwrap();
        let tiles = get_required_tiles(&view, image, TILE_SIZE);
        assert_eq!(tiles.len(), 9);
        assert_eq!(tiles[0], TileCoordinate::new(2, 2, 2).unwrap());
    }

    #[test]
    fn view_outside_image_needs_nothing() {
        let image = ImageSize::new(512, 512);
        let view = FrameView::new(-400.0, -10.0, 0.0, 512.0, 1.0).unwrap();
        assert!(get_required_tiles(&view, image, TILE_SIZE).is_empty());
    }

    #[test]
    fn edge_tile_pixel_size_is_truncated() {
        let image = ImageSize::new(600, 300);
        let tile = TileCoordinate::new(2, 2, 1).unwrap();
        assert_eq!(tile_pixel_size(tile, image, TILE_SIZE), (88, 44));
        assert_eq!(
            tile_pixel_size(TileCoordinate::ROOT, image, TILE_SIZE),
            (150, 75)
        );
    }

    proptest! {
        #[test]
        fn required_tiles_cover_bounded_view(
            width in 1u32..6000,
            height in 1u32..6000,
            x0 in -2000.0f64..6000.0,
            y0 in -2000.0f64..6000.0,
            span_x in 1.0f64..5000.0,
            span_y in 1.0f64..5000.0,
            mip_exponent in 0u32..6,
        ) {
            let image = ImageSize::new(width, height);
            let view = FrameView::new(x0, x0 + span_x, y0, y0 + span_y, (1u32 << mip_exponent) as f64)
                .unwrap();
            let bounded = view.bounded(image);
            let tiles = get_required_tiles(&view, image, TILE_SIZE);

            prop_assert_eq!(tiles.is_empty(), !bounded.has_area());
            if tiles.is_empty() {
                return Ok(());
            }

            let layer = tiles[0].layer();
            let extent = (TILE_SIZE * layer_to_mip(layer, image, TILE_SIZE)) as f64;
            let min_x = tiles.iter().map(|t| t.x()).min().unwrap();
            let max_x = tiles.iter().map(|t| t.x()).max().unwrap();
            let min_y = tiles.iter().map(|t| t.y()).min().unwrap();
            let max_y = tiles.iter().map(|t| t.y()).max().unwrap();

            prop_assert!(tiles.iter().all(|t| t.layer() == layer));
            prop_assert_eq!(
                tiles.len() as u32,
                (max_x - min_x + 1) * (max_y - min_y + 1)
            );
            prop_assert!(min_x as f64 * extent <= bounded.x_min());
            prop_assert!(min_y as f64 * extent <= bounded.y_min());
            prop_assert!((max_x + 1) as f64 * extent >= bounded.x_max());
            prop_assert!((max_y + 1) as f64 * extent >= bounded.y_max());
        }
    }
}
