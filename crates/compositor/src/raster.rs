//! Raster pass of one frame: tile selection with placeholders, placement
//! uniforms and draw submission.

use std::collections::HashSet;

use document::{FrameArena, FrameId};
use image::RgbaImage;
use model::{
    EncodedTile, ImageSize, Point2D, TILE_SIZE, TileCoordinate, get_required_tiles,
    layer_to_mip, tile_grid,
};
use render_protocol::{ColormapLut, RasterUniforms, TileUniforms, Viewport};
use renderer::{RenderBackend, RenderError, RenderService};
use smallvec::SmallVec;
use tiles::atlas::AtlasTier;
use tiles::{TileCache, TileCacheKey, TileTextureParameters};
use tracing::{debug, trace, warn};
use view::{AffineTransform2D, CanvasGeometry};

use crate::{CompositorConfig, CompositorError, PixelGridConfig};

/// Maps image texels of one frame onto panel pixels (origin bottom-left,
/// y up), following its spatial reference chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePlacement {
    /// Frame pixel centres to reference pixel centres.
    to_reference: AffineTransform2D,
    zoom: (f64, f64),
    view_min: Point2D,
    scale: f64,
    rotation: f64,
}

impl TilePlacement {
    /// `geometry` is the reference frame's view laid over the panel.
    pub fn new(to_reference: AffineTransform2D, geometry: &CanvasGeometry) -> Self {
        let [[a, _, _], [c, _, _]] = to_reference.matrix();
        Self {
            to_reference,
            zoom: (geometry.zoom_x(), geometry.zoom_y()),
            view_min: Point2D::new(geometry.view().x_min(), geometry.view().y_min()),
            scale: a.hypot(c),
            rotation: c.atan2(a),
        }
    }

    /// Placement chained through every spatial reference above `frame`,
    /// drawn in a `width` x `height` panel.
    pub fn for_frame(
        arena: &FrameArena,
        frame: FrameId,
        width: u32,
        height: u32,
    ) -> Result<Self, CompositorError> {
        let mut to_reference = AffineTransform2D::IDENTITY;
        let mut current = frame;
        loop {
            let state = arena
                .get(current)
                .ok_or(CompositorError::UnknownFrame(current))?;
            let Some(next) = state.spatial_reference() else {
                break;
            };
            if let Some(transform) = state.spatial_transform() {
                to_reference = to_reference.then(&transform.to_affine());
            }
            current = next;
        }
        let view = arena
            .required_view(current)
            .ok_or(CompositorError::UnknownFrame(current))?;
        let geometry = CanvasGeometry::new(view, f64::from(width), f64::from(height))?;
        Ok(Self::new(to_reference, &geometry))
    }

    /// Panel pixels per reference pixel.
    pub fn zoom(&self) -> (f64, f64) {
        self.zoom
    }

    /// Scale of the frame relative to its reference.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    /// Panel position of a frame point given in texel-edge coordinates.
    pub fn panel_point(&self, texel: Point2D) -> Point2D {
        let reference = self
            .to_reference
            .apply(Point2D::new(texel.x - 0.5, texel.y - 0.5));
        Point2D::new(
            (reference.x + 0.5 - self.view_min.x) * self.zoom.0,
            (reference.y + 0.5 - self.view_min.y) * self.zoom.1,
        )
    }

    /// Uniforms for a block of texels starting at image texel `origin`, each
    /// texel covering `mip` image pixels along x and y.
    ///
    /// Exact for isotropic zoom; with non-square pixels and a rotation the
    /// texel axes are scaled before they are turned.
    pub fn tile_uniforms(
        &self,
        origin: Point2D,
        mip: (f64, f64),
        parameters: TileTextureParameters,
        size: (u32, u32),
        grid: [f32; 2],
    ) -> TileUniforms {
        let corner = self.panel_point(origin);
        TileUniforms {
            placement: [
                corner.x as f32,
                corner.y as f32,
                (self.zoom.0 * self.scale * mip.0) as f32,
                (self.zoom.1 * self.scale * mip.1) as f32,
            ],
            texture: [
                parameters.offset_x as f32,
                parameters.offset_y as f32,
                size.0 as f32,
                size.1 as f32,
            ],
            rotation: [
                corner.x as f32,
                corner.y as f32,
                self.rotation as f32,
                parameters.page as f32,
            ],
            grid: [grid[0], grid[1], 0.0, 0.0],
        }
    }
}

/// Pixel grid `[cutoff, opacity]` for a full-resolution tile shown at
/// `zoom` screen pixels per image pixel.
pub fn pixel_grid(config: &PixelGridConfig, zoom: f64) -> [f32; 2] {
    if !config.visible || zoom < config.min_zoom || zoom <= 0.0 {
        return [0.0, 0.0];
    }
    let span = (config.full_zoom - config.min_zoom).max(f64::EPSILON);
    let t = ((zoom - config.min_zoom) / span).clamp(0.0, 1.0);
    let smooth = t * t * (3.0 - 2.0 * t);
    [
        (0.5 / zoom).min(0.5) as f32,
        (config.max_opacity * smooth) as f32,
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RasterReport {
    pub drawn: usize,
    pub placeholders: usize,
    /// Exact tiles the view needed but the cache did not hold.
    pub missing: Vec<TileCoordinate>,
}

/// Everything needed to draw one frame, decided before the panel pass opens.
pub(crate) struct FramePlan {
    pub frame: FrameId,
    pub key: TileCacheKey,
    pub image: ImageSize,
    pub uniforms: RasterUniforms,
    pub lut: ColormapLut,
    pub placement: TilePlacement,
    pub grid_zoom: f64,
    /// Hits to draw, coarsest first.
    pub tiles: Vec<TileCoordinate>,
    pub report: RasterReport,
}

/// Picks the tiles to draw for `frame` and pins them. Returns `None` when
/// the raster is hidden or the view misses the image.
pub(crate) fn plan_frame(
    arena: &FrameArena,
    cache: &mut TileCache,
    frame_id: FrameId,
    size: (u32, u32),
    config: &CompositorConfig,
) -> Result<Option<FramePlan>, CompositorError> {
    let frame = arena
        .get(frame_id)
        .ok_or(CompositorError::UnknownFrame(frame_id))?;
    let render_config = arena
        .effective_render_config(frame_id)
        .ok_or(CompositorError::UnknownFrame(frame_id))?;
    if !render_config.visible() {
        trace!(?frame_id, "raster hidden");
        return Ok(None);
    }
    let view = arena
        .required_view(frame_id)
        .ok_or(CompositorError::UnknownFrame(frame_id))?;
    let image = frame.image_size();
    let required = get_required_tiles(&view, image, TILE_SIZE);
    if required.is_empty() {
        return Ok(None);
    }

    let placement = TilePlacement::for_frame(arena, frame_id, size.0, size.1)?;
    let key = TileCacheKey::new(
        frame.file_id(),
        frame.channel(),
        frame.stokes(),
        TileCoordinate::ROOT,
    );
    let mut search = PlaceholderSearch {
        cache,
        key,
        image,
        hits: Vec::new(),
        seen: HashSet::new(),
        placeholders: 0,
        missing: Vec::new(),
    };
    search.pass(
        &required,
        false,
        config.high_res_placeholder_levels,
        config.low_res_fallback,
    );
    let PlaceholderSearch {
        mut hits,
        placeholders,
        missing,
        ..
    } = search;

    // Coarse tiles first so finer ones paint over them.
    hits.sort_by_key(|tile| std::cmp::Reverse(layer_to_mip(tile.layer(), image, TILE_SIZE)));

    Ok(Some(FramePlan {
        frame: frame_id,
        key,
        image,
        uniforms: render_config.raster_uniforms(&config.raster_style),
        lut: render_config.colormap_lut()?,
        grid_zoom: placement.zoom().0 * placement.scale() / frame.pixel_ratio(),
        placement,
        tiles: hits,
        report: RasterReport {
            drawn: 0,
            placeholders,
            missing,
        },
    }))
}

struct PlaceholderSearch<'a> {
    cache: &'a mut TileCache,
    key: TileCacheKey,
    image: ImageSize,
    hits: Vec<TileCoordinate>,
    seen: HashSet<EncodedTile>,
    placeholders: usize,
    missing: Vec<TileCoordinate>,
}

impl PlaceholderSearch<'_> {
    /// One pass over `tiles`. Misses queue finer children and coarser
    /// parents for peeked passes of their own.
    fn pass(&mut self, tiles: &[TileCoordinate], peek: bool, high_res_levels: u32, low_res: bool) {
        let mut children: SmallVec<[TileCoordinate; 16]> = SmallVec::new();
        let mut parents: SmallVec<[TileCoordinate; 4]> = SmallVec::new();
        let mut queued_parents = HashSet::new();

        for tile in tiles {
            let key = self.key.with_tile(*tile);
            if self.cache.get(&key, peek).is_some() {
                self.cache.pin(key);
                if self.seen.insert(tile.encode()) {
                    self.hits.push(*tile);
                    if peek {
                        self.placeholders += 1;
                    }
                }
                continue;
            }
            if !peek {
                self.missing.push(*tile);
            }
            if high_res_levels > 0 && layer_to_mip(tile.layer(), self.image, TILE_SIZE) >= 2 {
                let grid = tile_grid(tile.layer() + 1, self.image, TILE_SIZE);
                children.extend(
                    tile.children()
                        .into_iter()
                        .flatten()
                        .filter(|child| child.x() < grid.columns && child.y() < grid.rows),
                );
            }
            if low_res {
                if let Some(parent) = tile.parent() {
                    if queued_parents.insert(parent.encode()) {
                        parents.push(parent);
                    }
                }
            }
        }

        if !children.is_empty() {
            self.pass(&children, true, high_res_levels - 1, false);
        }
        if !parents.is_empty() {
            self.pass(&parents, true, 0, true);
        }
    }
}

/// Uploads and draws the planned tiles. Inside an open panel pass.
pub(crate) fn draw_plan(
    backend: &mut dyn RenderBackend,
    cache: &mut TileCache,
    plan: &mut FramePlan,
    grid_config: &PixelGridConfig,
) -> Result<(), RenderError> {
    backend.set_raster_uniforms(&plan.uniforms, &plan.lut)?;
    for tile in &plan.tiles {
        let key = plan.key.with_tile(*tile);
        let parameters = match cache.upload(&key, backend.texture_sink()) {
            Ok(parameters) => parameters,
            Err(err) => {
                warn!(frame = ?plan.frame, tile = tile.encode().raw(), "tile upload failed: {err}");
                continue;
            }
        };
        let Some(size) = cache
            .get(&key, true)
            .map(|raster| (raster.width(), raster.height()))
        else {
            continue;
        };

        let mip = f64::from(layer_to_mip(tile.layer(), plan.image, TILE_SIZE));
        let extent = f64::from(TILE_SIZE) * mip;
        let origin = Point2D::new(f64::from(tile.x()) * extent, f64::from(tile.y()) * extent);
        let grid = if mip == 1.0 {
            pixel_grid(grid_config, plan.grid_zoom)
        } else {
            [0.0, 0.0]
        };
        let uniforms = plan
            .placement
            .tile_uniforms(origin, (mip, mip), parameters, size, grid);
        backend.draw_tile(&uniforms)?;
        plan.report.drawn += 1;
    }
    Ok(())
}

/// Draws a frame's preview raster into the preview domain and reads it
/// back. The plane is uploaded whole, split across atlas slots.
pub fn render_preview(
    service: &mut RenderService,
    arena: &FrameArena,
    frame_id: FrameId,
    config: &CompositorConfig,
) -> Result<RgbaImage, CompositorError> {
    let frame = arena
        .get(frame_id)
        .ok_or(CompositorError::UnknownFrame(frame_id))?;
    let preview = frame
        .preview()
        .ok_or(CompositorError::MissingPreview(frame_id))?;
    let render_config = arena
        .effective_render_config(frame_id)
        .ok_or(CompositorError::UnknownFrame(frame_id))?;
    let (width, height) = frame.device_size();

    let layout = AtlasTier::default().layout();
    let columns = preview.width().div_ceil(TILE_SIZE);
    let rows = preview.height().div_ceil(TILE_SIZE);
    let chunks = columns * rows;
    if chunks > layout.capacity_tiles() {
        return Err(CompositorError::PreviewTooLarge {
            chunks,
            capacity: layout.capacity_tiles(),
        });
    }

    let geometry = CanvasGeometry::new(frame.own_view(), f64::from(width), f64::from(height))?;
    let placement = TilePlacement::new(AffineTransform2D::IDENTITY, &geometry);
    let image = frame.image_size();
    let mip = (
        f64::from(image.width) / f64::from(preview.width()),
        f64::from(image.height) / f64::from(preview.height()),
    );
    let uniforms = render_config.raster_uniforms(&config.raster_style);
    let lut = render_config.colormap_lut()?;

    service.ensure_canvas(width, height);
    let viewport = Viewport::new(0, 0, width, height);
    service.render_panel(viewport, Some(config.background), |backend| {
        backend.set_raster_uniforms(&uniforms, &lut)?;
        for index in 0..chunks {
            let (column, row) = (index % columns, index / columns);
            let x0 = column * TILE_SIZE;
            let y0 = row * TILE_SIZE;
            let chunk_width = TILE_SIZE.min(preview.width() - x0);
            let chunk_height = TILE_SIZE.min(preview.height() - y0);
            let mut data = Vec::with_capacity((chunk_width * chunk_height) as usize);
            for y in y0..y0 + chunk_height {
                let start = (y * preview.width() + x0) as usize;
                data.extend_from_slice(&preview.data()[start..start + chunk_width as usize]);
            }
            let (page, offset_x, offset_y) = layout.slot_origin(index);
            let parameters = TileTextureParameters {
                page,
                offset_x,
                offset_y,
            };
            backend.upload_tile(parameters, chunk_width, chunk_height, &data);
            let origin = Point2D::new(f64::from(x0) * mip.0, f64::from(y0) * mip.1);
            let tile = placement.tile_uniforms(
                origin,
                mip,
                parameters,
                (chunk_width, chunk_height),
                [0.0, 0.0],
            );
            backend.draw_tile(&tile)?;
        }
        Ok(())
    })?;
    debug!(?frame_id, chunks, "preview rendered");
    Ok(service.read_region(viewport)?)
}
