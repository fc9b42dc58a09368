//! Pixel value to colour.
//!
//! `raster.wgsl` implements the same steps; keep the two in sync.

use render_protocol::{ColormapLut, RasterUniforms, ScalingType};

/// Normalises `value` into `[0, 1]` and applies scaling, bias and contrast.
/// `None` for NaN and infinities.
pub fn scale_value(value: f32, uniforms: &RasterUniforms) -> Option<f32> {
    if !value.is_finite() {
        return None;
    }
    let [min, max, bias, contrast] = uniforms.scaling;
    let [gamma, exponent, _, _] = uniforms.transfer;
    let range = max - min;
    let x = if range > 0.0 {
        ((value - min) / range).clamp(0.0, 1.0)
    } else if value >= max {
        1.0
    } else {
        0.0
    };

    let x = match uniforms.scaling_type() {
        ScalingType::Linear => x,
        ScalingType::Log if exponent > 1.0 => (exponent * x + 1.0).ln() / (exponent + 1.0).ln(),
        ScalingType::Log => x,
        ScalingType::Sqrt => x.sqrt(),
        ScalingType::Squared => x * x,
        ScalingType::Gamma => x.powf(gamma),
        ScalingType::Power if exponent > 1.0 => (exponent.powf(x) - 1.0) / (exponent - 1.0),
        ScalingType::Power => x,
    };

    let x = ((x - bias - 0.5) * contrast + 0.5).clamp(0.0, 1.0);
    if uniforms.smoothed() {
        Some(x * x * (3.0 - 2.0 * x))
    } else {
        Some(x)
    }
}

/// Final RGBA of one texel. `fraction` is the position inside the texel,
/// `grid` the tile's `[cutoff, opacity, _, _]`.
pub fn shade_texel(
    value: f32,
    fraction: [f32; 2],
    grid: [f32; 4],
    uniforms: &RasterUniforms,
    colormap: &ColormapLut,
) -> [u8; 4] {
    let Some(x) = scale_value(value, uniforms) else {
        return to_rgba8(uniforms.nan_color);
    };
    let entry = colormap.lookup(x, uniforms.inverted());
    let mut color = entry.map(|c| f32::from(c) / 255.0);
    color[3] *= uniforms.opacity();

    let [cutoff, grid_opacity, _, _] = grid;
    if grid_opacity > 0.0 && (fraction[0] < cutoff || fraction[1] < cutoff) {
        let weight = grid_opacity * uniforms.grid_color[3];
        for channel in 0..3 {
            color[channel] += (uniforms.grid_color[channel] - color[channel]) * weight;
        }
    }
    to_rgba8(color)
}

pub(crate) fn to_rgba8(color: [f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}
