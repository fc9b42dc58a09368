//! CPU render backend.
//!
//! Pixel centres sit at half-integer panel coordinates; a tile covers the
//! half-open texel rectangle it is placed on, so abutting tiles never draw a
//! pixel twice.

use std::collections::HashMap;

use image::{Rgba, RgbaImage};
use render_protocol::{
    Color, ColormapLut, CustomGradient, RasterUniforms, TileUniforms, Viewport, colormap_lut,
};
use tiles::{TileTextureParameters, TileTextureSink};
use tracing::trace;

use crate::shading::{shade_texel, to_rgba8};
use crate::{RenderBackend, RenderError, check_viewport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TextureOrigin {
    page: u32,
    x: u32,
    y: u32,
}

#[derive(Debug)]
struct StoredTile {
    width: u32,
    height: u32,
    data: Box<[f32]>,
}

pub struct SoftwareBackend {
    canvas: RgbaImage,
    textures: HashMap<TextureOrigin, StoredTile>,
    active: Option<Viewport>,
    uniforms: RasterUniforms,
    colormap: ColormapLut,
    drawn_tiles: u64,
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width, height),
            textures: HashMap::new(),
            active: None,
            uniforms: RasterUniforms::default(),
            colormap: colormap_lut("gray", CustomGradient::default())
                .expect("gray colormap is built in"),
            drawn_tiles: 0,
        }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn uploaded_tiles(&self) -> usize {
        self.textures.len()
    }

    pub fn drawn_tiles(&self) -> u64 {
        self.drawn_tiles
    }

    fn active_viewport(&self) -> Result<Viewport, RenderError> {
        self.active.ok_or(RenderError::NoActivePanel)
    }

    fn rasterize(&mut self, viewport: Viewport, tile: &TileUniforms) {
        let [offset_x, offset_y, scale_x, scale_y] = tile.placement;
        let [texture_x, texture_y, texture_w, texture_h] = tile.texture;
        let [origin_x, origin_y, angle, _] = tile.rotation;
        let origin = TextureOrigin {
            page: tile.page(),
            x: texture_x as u32,
            y: texture_y as u32,
        };
        let Some(stored) = self.textures.get(&origin) else {
            trace!(?origin, "draw of a tile that was never uploaded");
            return;
        };
        if scale_x <= 0.0 || scale_y <= 0.0 || texture_w <= 0.0 || texture_h <= 0.0 {
            return;
        }

        let (sin, cos) = angle.sin_cos();
        let rotate = |x: f32, y: f32, sin: f32| {
            let dx = x - origin_x;
            let dy = y - origin_y;
            (origin_x + cos * dx - sin * dy, origin_y + sin * dx + cos * dy)
        };

        let right = offset_x + texture_w * scale_x;
        let top = offset_y + texture_h * scale_y;
        let corners = [
            rotate(offset_x, offset_y, sin),
            rotate(right, offset_y, sin),
            rotate(right, top, sin),
            rotate(offset_x, top, sin),
        ];
        let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
        let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
        let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);

        let width = viewport.width as i64;
        let height = viewport.height as i64;
        let first_col = ((min_x - 0.5).floor() as i64).clamp(0, width);
        let last_col = ((max_x - 0.5).ceil() as i64 + 1).clamp(0, width);
        let first_row = ((height as f32 - max_y - 0.5).floor() as i64).clamp(0, height);
        let last_row = ((height as f32 - min_y - 0.5).ceil() as i64 + 1).clamp(0, height);

        for row in first_row..last_row {
            let y = height as f32 - (row as f32 + 0.5);
            for col in first_col..last_col {
                let x = col as f32 + 0.5;
                let (ux, uy) = rotate(x, y, -sin);
                let texel_x = (ux - offset_x) / scale_x;
                let texel_y = (uy - offset_y) / scale_y;
                if !(0.0..texture_w).contains(&texel_x) || !(0.0..texture_h).contains(&texel_y) {
                    continue;
                }
                let ix = (texel_x as u32).min(stored.width - 1);
                let iy = (texel_y as u32).min(stored.height - 1);
                let value = stored.data[(iy * stored.width + ix) as usize];
                let rgba = shade_texel(
                    value,
                    [texel_x.fract(), texel_y.fract()],
                    tile.grid,
                    &self.uniforms,
                    &self.colormap,
                );
                self.canvas.put_pixel(
                    viewport.origin_x + col as u32,
                    viewport.origin_y + row as u32,
                    Rgba(rgba),
                );
            }
        }
    }
}

impl TileTextureSink for SoftwareBackend {
    fn upload_tile(
        &mut self,
        parameters: TileTextureParameters,
        width: u32,
        height: u32,
        data: &[f32],
    ) {
        let origin = TextureOrigin {
            page: parameters.page,
            x: parameters.offset_x,
            y: parameters.offset_y,
        };
        self.textures.insert(
            origin,
            StoredTile {
                width,
                height,
                data: data.into(),
            },
        );
    }
}

impl RenderBackend for SoftwareBackend {
    fn canvas_size(&self) -> (u32, u32) {
        self.canvas.dimensions()
    }

    fn texture_sink(&mut self) -> &mut dyn TileTextureSink {
        self
    }

    fn resize_canvas(&mut self, width: u32, height: u32) {
        self.canvas = RgbaImage::new(width, height);
    }

    fn begin_panel(&mut self, viewport: Viewport, clear: Option<Color>) -> Result<(), RenderError> {
        if self.active.is_some() {
            return Err(RenderError::PanelAlreadyActive);
        }
        let (width, height) = self.canvas.dimensions();
        check_viewport(viewport, width, height)?;
        if let Some(color) = clear {
            let rgba = Rgba(to_rgba8(color.to_f32()));
            for y in viewport.origin_y..viewport.bottom() {
                for x in viewport.origin_x..viewport.right() {
                    self.canvas.put_pixel(x, y, rgba);
                }
            }
        }
        self.active = Some(viewport);
        Ok(())
    }

    fn set_raster_uniforms(
        &mut self,
        uniforms: &RasterUniforms,
        colormap: &ColormapLut,
    ) -> Result<(), RenderError> {
        self.active_viewport()?;
        self.uniforms = *uniforms;
        if &self.colormap != colormap {
            self.colormap = colormap.clone();
        }
        Ok(())
    }

    fn draw_tile(&mut self, tile: &TileUniforms) -> Result<(), RenderError> {
        let viewport = self.active_viewport()?;
        self.rasterize(viewport, tile);
        self.drawn_tiles += 1;
        Ok(())
    }

    fn end_panel(&mut self) -> Result<(), RenderError> {
        self.active.take().map(|_| ()).ok_or(RenderError::NoActivePanel)
    }

    fn read_region(&mut self, region: Viewport) -> Result<RgbaImage, RenderError> {
        if self.active.is_some() {
            return Err(RenderError::PanelAlreadyActive);
        }
        let (width, height) = self.canvas.dimensions();
        check_viewport(region, width, height)?;
        Ok(image::imageops::crop_imm(
            &self.canvas,
            region.origin_x,
            region.origin_y,
            region.width,
            region.height,
        )
        .to_image())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_ramp(
        backend: &mut SoftwareBackend,
        width: u32,
        height: u32,
    ) -> TileTextureParameters {
        let parameters = TileTextureParameters {
            page: 0,
            offset_x: 256,
            offset_y: 0,
        };
        let data: Vec<f32> = (0..width * height).map(|i| i as f32).collect();
        backend.upload_tile(parameters, width, height, &data);
        parameters
    }

    fn tile_at(parameters: TileTextureParameters, w: f32, h: f32, scale: f32) -> TileUniforms {
        TileUniforms {
            placement: [0.0, 0.0, scale, scale],
            texture: [parameters.offset_x as f32, parameters.offset_y as f32, w, h],
            rotation: [0.0, 0.0, 0.0, parameters.page as f32],
            grid: [0.0; 4],
        }
    }

    fn gray(max: f32) -> (RasterUniforms, ColormapLut) {
        (
            RasterUniforms {
                scaling: [0.0, max, 0.0, 1.0],
                ..Default::default()
            },
            colormap_lut("gray", CustomGradient::default()).unwrap(),
        )
    }

    #[test]
    fn draw_outside_panel_pass_is_rejected() {
        let mut backend = SoftwareBackend::new(8, 8);
        let tile = TileUniforms {
            placement: [0.0; 4],
            texture: [0.0; 4],
            rotation: [0.0; 4],
            grid: [0.0; 4],
        };
        assert_eq!(backend.draw_tile(&tile), Err(RenderError::NoActivePanel));
        assert_eq!(backend.end_panel(), Err(RenderError::NoActivePanel));
    }

    #[test]
    fn viewport_must_fit_the_canvas() {
        let mut backend = SoftwareBackend::new(8, 8);
        assert!(matches!(
            backend.begin_panel(Viewport::new(4, 4, 5, 1), None),
            Err(RenderError::ViewportOutsideCanvas { .. })
        ));
        assert_eq!(
            backend.begin_panel(Viewport::new(0, 0, 0, 1), None),
            Err(RenderError::EmptyViewport)
        );
    }

    #[test]
    fn texel_rows_grow_upwards() {
        let mut backend = SoftwareBackend::new(2, 2);
        let parameters = upload_ramp(&mut backend, 2, 2);
        let (uniforms, lut) = gray(3.0);

        backend
            .begin_panel(Viewport::new(0, 0, 2, 2), Some(Color::BLACK))
            .unwrap();
        backend.set_raster_uniforms(&uniforms, &lut).unwrap();
        backend.draw_tile(&tile_at(parameters, 2.0, 2.0, 1.0)).unwrap();
        backend.end_panel().unwrap();

        let canvas = backend.canvas();
        // texel row 0 (values 0, 1) lands on the bottom canvas row
        assert_eq!(canvas.get_pixel(0, 1).0, [0, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(1, 1).0, [85, 85, 85, 255]);
        assert_eq!(canvas.get_pixel(0, 0).0, [170, 170, 170, 255]);
        assert_eq!(canvas.get_pixel(1, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn scaled_tile_covers_scaled_area() {
        let mut backend = SoftwareBackend::new(6, 6);
        let parameters = upload_ramp(&mut backend, 1, 1);
        let (uniforms, lut) = gray(1.0);

        backend
            .begin_panel(Viewport::new(0, 0, 6, 6), Some(Color::rgb(9, 9, 9)))
            .unwrap();
        backend.set_raster_uniforms(&uniforms, &lut).unwrap();
        backend.draw_tile(&tile_at(parameters, 1.0, 1.0, 3.0)).unwrap();
        backend.end_panel().unwrap();

        let canvas = backend.canvas();
        let covered = canvas
            .pixels()
            .filter(|pixel| pixel.0 == [0, 0, 0, 255])
            .count();
        assert_eq!(covered, 9);
        assert_eq!(canvas.get_pixel(0, 5).0, [0, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(3, 5).0, [9, 9, 9, 255]);
    }

    #[test]
    fn rotation_turns_tile_about_origin() {
        let mut backend = SoftwareBackend::new(4, 4);
        let parameters = upload_ramp(&mut backend, 2, 1);
        let (uniforms, lut) = gray(1.0);
        let mut tile = tile_at(parameters, 2.0, 1.0, 1.0);
        tile.placement[0] = 2.0;
        tile.placement[1] = 2.0;
        tile.rotation = [2.0, 2.0, std::f32::consts::FRAC_PI_2, 0.0];

        backend
            .begin_panel(Viewport::new(0, 0, 4, 4), Some(Color::rgb(9, 9, 9)))
            .unwrap();
        backend.set_raster_uniforms(&uniforms, &lut).unwrap();
        backend.draw_tile(&tile).unwrap();
        backend.end_panel().unwrap();

        // the 2x1 strip now runs upwards from (2, 2) in y-up space
        let canvas = backend.canvas();
        assert_eq!(canvas.get_pixel(1, 1).0, [0, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(1, 0).0, [255, 255, 255, 255]);
        assert_eq!(canvas.get_pixel(2, 1).0, [9, 9, 9, 255]);
    }

    #[test]
    fn read_region_copies_the_rectangle() {
        let mut backend = SoftwareBackend::new(4, 4);
        backend
            .begin_panel(Viewport::new(2, 0, 2, 2), Some(Color::WHITE))
            .unwrap();
        assert_eq!(
            backend.read_region(Viewport::new(0, 0, 1, 1)),
            Err(RenderError::PanelAlreadyActive)
        );
        backend.end_panel().unwrap();

        let region = backend.read_region(Viewport::new(1, 0, 2, 1)).unwrap();
        assert_eq!(region.dimensions(), (2, 1));
        assert_eq!(region.get_pixel(0, 0).0, [0, 0, 0, 0]);
        assert_eq!(region.get_pixel(1, 0).0, [255, 255, 255, 255]);
    }
}
