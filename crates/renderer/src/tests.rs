//! Panel isolation: everything drawn inside a panel pass stays inside the
//! panel rectangle, whatever the tile placement says.

use image::RgbaImage;
use render_protocol::{
    Color, CustomGradient, GridLayout, RasterUniforms, TileUniforms, Viewport, colormap_lut,
};
use tiles::atlas::AtlasTier;
use tiles::{TileTextureParameters, TileTextureSink};

use super::*;

const PARAMETERS: TileTextureParameters = TileTextureParameters {
    page: 0,
    offset_x: 0,
    offset_y: 0,
};

fn checksum_outside(canvas: &RgbaImage, viewport: Viewport) -> u64 {
    canvas
        .enumerate_pixels()
        .filter(|(x, y, _)| !viewport.contains(*x, *y))
        .fold(0xcbf2_9ce4_8422_2325u64, |hash, (x, y, pixel)| {
            let mut hash = hash;
            for byte in [x as u8, y as u8, pixel[0], pixel[1], pixel[2], pixel[3]] {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
            hash
        })
}

/// A tile scaled and rotated so that it would cover the whole canvas.
fn oversized_tile() -> TileUniforms {
    TileUniforms {
        placement: [-200.0, -200.0, 100.0, 100.0],
        texture: [0.0, 0.0, 4.0, 4.0],
        rotation: [16.0, 16.0, 0.3, 0.0],
        grid: [0.0; 4],
    }
}

fn paint_panels(backend: &mut dyn RenderBackend, layout: &GridLayout) {
    let lut = colormap_lut("viridis", CustomGradient::default()).unwrap();
    for index in 0..layout.panel_count() {
        let viewport = layout.panel_viewport(index).unwrap();
        let shade = 40 * index as u8;
        backend
            .begin_panel(viewport, Some(Color::rgb(shade, 255 - shade, 7)))
            .unwrap();
        backend
            .set_raster_uniforms(&RasterUniforms::default(), &lut)
            .unwrap();
        backend.end_panel().unwrap();
    }
}

fn draw_first_panel(backend: &mut dyn RenderBackend, viewport: Viewport) {
    let data: Vec<f32> = (0..16).map(|i| i as f32 / 15.0).collect();
    backend.upload_tile(PARAMETERS, 4, 4, &data);
    let lut = colormap_lut("Red", CustomGradient::default()).unwrap();
    backend
        .begin_panel(viewport, Some(Color::rgb(1, 2, 3)))
        .unwrap();
    backend
        .set_raster_uniforms(&RasterUniforms::default(), &lut)
        .unwrap();
    backend.draw_tile(&oversized_tile()).unwrap();
    backend.end_panel().unwrap();
}

fn assert_panel_isolated(backend: &mut dyn RenderBackend) {
    let layout = GridLayout::new(2, 2, 16, 16).unwrap();
    paint_panels(backend, &layout);
    let full = Viewport::new(0, 0, layout.canvas_width(), layout.canvas_height());
    let first = layout.panel_viewport(0).unwrap();

    let before = backend.read_region(full).unwrap();
    draw_first_panel(backend, first);
    let after = backend.read_region(full).unwrap();

    assert_eq!(
        checksum_outside(&before, first),
        checksum_outside(&after, first)
    );
    assert_ne!(before, after, "panel (0, 0) should have changed");
}

#[test]
fn software_panel_draw_leaves_other_panels_untouched() {
    let mut backend = SoftwareBackend::new(32, 32);
    assert_panel_isolated(&mut backend);
}

#[test]
fn software_clear_is_scissored() {
    let mut backend = SoftwareBackend::new(4, 2);
    backend
        .begin_panel(Viewport::new(2, 0, 2, 2), Some(Color::WHITE))
        .unwrap();
    backend.end_panel().unwrap();
    let canvas = backend.read_region(Viewport::new(0, 0, 4, 2)).unwrap();
    assert_eq!(canvas.get_pixel(1, 1).0, [0, 0, 0, 0]);
    assert_eq!(canvas.get_pixel(2, 1).0, [255, 255, 255, 255]);
}

#[test]
fn wgpu_panel_draw_leaves_other_panels_untouched() {
    let backend = WgpuBackend::new_headless(32, 32, AtlasTier::Single8.layout());
    let Ok(mut backend) = backend else {
        eprintln!("skipping: no wgpu adapter available");
        return;
    };
    assert_panel_isolated(&mut backend);
}

#[test]
fn wgpu_and_software_shade_alike() {
    let Ok(mut gpu) = WgpuBackend::new_headless(8, 8, AtlasTier::Single8.layout()) else {
        eprintln!("skipping: no wgpu adapter available");
        return;
    };
    let mut cpu = SoftwareBackend::new(8, 8);
    let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
    let lut = colormap_lut("rainbow", CustomGradient::default()).unwrap();
    let uniforms = RasterUniforms {
        scaling: [0.0, 15.0, 0.0, 1.0],
        ..Default::default()
    };
    let tile = TileUniforms {
        placement: [0.0, 0.0, 2.0, 2.0],
        texture: [0.0, 0.0, 4.0, 4.0],
        rotation: [0.0, 0.0, 0.0, 0.0],
        grid: [0.0; 4],
    };
    let viewport = Viewport::new(0, 0, 8, 8);

    let backends: [&mut dyn RenderBackend; 2] = [&mut gpu, &mut cpu];
    let mut images = Vec::new();
    for backend in backends {
        backend.upload_tile(PARAMETERS, 4, 4, &data);
        backend.begin_panel(viewport, Some(Color::BLACK)).unwrap();
        backend.set_raster_uniforms(&uniforms, &lut).unwrap();
        backend.draw_tile(&tile).unwrap();
        backend.end_panel().unwrap();
        images.push(backend.read_region(viewport).unwrap());
    }

    for (gpu_pixel, cpu_pixel) in images[0].pixels().zip(images[1].pixels()) {
        for channel in 0..4 {
            let diff = i16::from(gpu_pixel[channel]) - i16::from(cpu_pixel[channel]);
            assert!(diff.abs() <= 2, "{gpu_pixel:?} vs {cpu_pixel:?}");
        }
    }
}
