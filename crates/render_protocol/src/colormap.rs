//! Named colormaps and their lookup tables.
//!
//! Mono colormaps ramp from black to a single colour. Gradient colormaps
//! interpolate evenly spaced stops. The `custom` colormap ramps between two
//! user colours.

use std::fmt;

use crate::Color;

pub const LUT_SIZE: usize = 256;
pub const CUSTOM_COLORMAP: &str = "custom";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonoColormap {
    pub name: &'static str,
    pub color: Color,
}

pub const MONO_COLORMAPS: [MonoColormap; 8] = [
    MonoColormap {
        name: "Red",
        color: Color::rgb(255, 0, 0),
    },
    MonoColormap {
        name: "Orange",
        color: Color::rgb(255, 128, 0),
    },
    MonoColormap {
        name: "Yellow",
        color: Color::rgb(255, 255, 0),
    },
    MonoColormap {
        name: "Green",
        color: Color::rgb(0, 255, 0),
    },
    MonoColormap {
        name: "Cyan",
        color: Color::rgb(0, 255, 255),
    },
    MonoColormap {
        name: "Blue",
        color: Color::rgb(0, 0, 255),
    },
    MonoColormap {
        name: "Violet",
        color: Color::rgb(127, 0, 255),
    },
    MonoColormap {
        name: "Magenta",
        color: Color::rgb(255, 0, 255),
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradientColormap {
    pub name: &'static str,
    pub stops: &'static [Color],
}

pub const GRADIENT_COLORMAPS: &[GradientColormap] = &[
    GradientColormap {
        name: "gray",
        stops: &[Color::BLACK, Color::WHITE],
    },
    GradientColormap {
        name: "heat",
        stops: &[
            Color::BLACK,
            Color::rgb(255, 0, 0),
            Color::rgb(255, 255, 0),
            Color::WHITE,
        ],
    },
    GradientColormap {
        name: "rainbow",
        stops: &[
            Color::rgb(127, 0, 255),
            Color::rgb(0, 180, 235),
            Color::rgb(128, 254, 179),
            Color::rgb(254, 180, 97),
            Color::rgb(255, 0, 0),
        ],
    },
    GradientColormap {
        name: "viridis",
        stops: &[
            Color::rgb(68, 1, 84),
            Color::rgb(59, 82, 139),
            Color::rgb(33, 145, 140),
            Color::rgb(94, 201, 98),
            Color::rgb(253, 231, 37),
        ],
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColormapError {
    Unknown(String),
}

impl fmt::Display for ColormapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(name) => write!(f, "unknown colormap {name:?}"),
        }
    }
}

impl std::error::Error for ColormapError {}

/// End points of the `custom` colormap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomGradient {
    pub start: Color,
    pub end: Color,
}

impl Default for CustomGradient {
    fn default() -> Self {
        Self {
            start: Color::BLACK,
            end: Color::WHITE,
        }
    }
}

pub fn mono_colormap_color(name: &str) -> Option<Color> {
    MONO_COLORMAPS
        .iter()
        .find(|mono| mono.name == name)
        .map(|mono| mono.color)
}

/// Name of the mono colormap drawn in exactly `color`, ignoring alpha.
pub fn mono_colormap_for_color(color: Color) -> Option<&'static str> {
    MONO_COLORMAPS
        .iter()
        .find(|mono| mono.color.same_rgb(&color))
        .map(|mono| mono.name)
}

pub fn gradient_stops(name: &str) -> Option<&'static [Color]> {
    GRADIENT_COLORMAPS
        .iter()
        .find(|gradient| gradient.name == name)
        .map(|gradient| gradient.stops)
}

pub fn is_known_colormap(name: &str) -> bool {
    name == CUSTOM_COLORMAP || mono_colormap_color(name).is_some() || gradient_stops(name).is_some()
}

/// 256-entry RGBA table indexed by the scaled pixel value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColormapLut {
    entries: Box<[[u8; 4]]>,
}

impl ColormapLut {
    fn from_stops(stops: &[Color]) -> Self {
        assert!(stops.len() >= 2, "colormap needs at least two stops");
        let segments = stops.len() - 1;
        let entries = (0..LUT_SIZE)
            .map(|i| {
                let position = i as f32 / (LUT_SIZE - 1) as f32 * segments as f32;
                let segment = (position.floor() as usize).min(segments - 1);
                let t = position - segment as f32;
                lerp_color(stops[segment], stops[segment + 1], t)
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[[u8; 4]] {
        &self.entries
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.entries)
    }

    /// Colour of a value already scaled into `[0, 1]`.
    pub fn lookup(&self, value: f32, inverted: bool) -> [u8; 4] {
        let value = if inverted { 1.0 - value } else { value };
        let index = (value.clamp(0.0, 1.0) * (LUT_SIZE - 1) as f32).round() as usize;
        self.entries[index]
    }
}

fn lerp_color(a: Color, b: Color, t: f32) -> [u8; 4] {
    let channel = |x: u8, y: u8| (f32::from(x) + (f32::from(y) - f32::from(x)) * t).round() as u8;
    [
        channel(a.r, b.r),
        channel(a.g, b.g),
        channel(a.b, b.b),
        channel(a.a, b.a),
    ]
}

pub fn colormap_lut(name: &str, custom: CustomGradient) -> Result<ColormapLut, ColormapError> {
    if name == CUSTOM_COLORMAP {
        return Ok(ColormapLut::from_stops(&[custom.start, custom.end]));
    }
    if let Some(color) = mono_colormap_color(name) {
        return Ok(ColormapLut::from_stops(&[Color::BLACK, color]));
    }
    let stops = gradient_stops(name).ok_or_else(|| ColormapError::Unknown(name.to_owned()))?;
    Ok(ColormapLut::from_stops(stops))
}
