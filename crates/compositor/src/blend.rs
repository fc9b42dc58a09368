//! Additive ("lighter") compositing of colour-blended layers.

use image::RgbaImage;

/// Adds `source`, weighted by its own alpha times `alpha`, onto
/// `destination`, saturating each channel. The result is premultiplied:
/// its colour already carries the coverage stored in the alpha channel.
pub fn blend_lighter(destination: &mut RgbaImage, source: &RgbaImage, alpha: f64) {
    assert_eq!(
        destination.dimensions(),
        source.dimensions(),
        "blended layers share the panel size"
    );
    let alpha = alpha.clamp(0.0, 1.0) as f32;
    for (dst, src) in destination.pixels_mut().zip(source.pixels()) {
        let weight = f32::from(src[3]) / 255.0 * alpha;
        for channel in 0..3 {
            let sum = f32::from(dst[channel]) + f32::from(src[channel]) * weight;
            dst[channel] = sum.min(255.0).round() as u8;
        }
        let coverage = f32::from(dst[3]) + 255.0 * weight;
        dst[3] = coverage.min(255.0).round() as u8;
    }
}

/// Puts a premultiplied `layer` from [`blend_lighter`] over the straight
/// alpha `destination`, with the layer's top-left corner at (`x`, `y`).
pub fn composite_premultiplied(destination: &mut RgbaImage, layer: &RgbaImage, x: u32, y: u32) {
    for (layer_x, layer_y, src) in layer.enumerate_pixels() {
        let (Some(dst_x), Some(dst_y)) = (x.checked_add(layer_x), y.checked_add(layer_y)) else {
            continue;
        };
        if dst_x >= destination.width() || dst_y >= destination.height() {
            continue;
        }
        let dst = destination.get_pixel_mut(dst_x, dst_y);
        let src_alpha = f32::from(src[3]) / 255.0;
        let kept = f32::from(dst[3]) / 255.0 * (1.0 - src_alpha);
        let alpha = src_alpha + kept;
        if alpha <= 0.0 {
            dst.0 = [0; 4];
            continue;
        }
        for channel in 0..3 {
            let premultiplied = f32::from(src[channel]) + f32::from(dst[channel]) * kept;
            dst[channel] = (premultiplied / alpha).min(255.0).round() as u8;
        }
        dst[3] = (alpha * 255.0).min(255.0).round() as u8;
    }
}
