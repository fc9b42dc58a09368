use std::fmt;

use render_protocol::{
    CUSTOM_COLORMAP, Color, ColormapError, ColormapLut, CustomGradient, RasterUniforms,
    ScalingType, colormap_lut, is_known_colormap,
};

pub const DEFAULT_COLORMAP: &str = "gray";
pub const DEFAULT_SCALING_EXPONENT: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq)]
pub enum RenderConfigError {
    UnknownColormap(String),
    NonFiniteLimit,
    InvertedLimits { min: f64, max: f64 },
    AlphaOutOfRange(f64),
    BiasOutOfRange(f64),
    ContrastOutOfRange(f64),
    InvalidGamma(f64),
    InvalidExponent(f64),
}

impl fmt::Display for RenderConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderConfigError::UnknownColormap(name) => write!(f, "unknown colormap {name:?}"),
            RenderConfigError::NonFiniteLimit => write!(f, "scale limits must be finite"),
            RenderConfigError::InvertedLimits { min, max } => {
                write!(f, "scale min {min} exceeds scale max {max}")
            }
            RenderConfigError::AlphaOutOfRange(alpha) => {
                write!(f, "alpha {alpha} outside [0, 1]")
            }
            RenderConfigError::BiasOutOfRange(bias) => write!(f, "bias {bias} outside [-1, 1]"),
            RenderConfigError::ContrastOutOfRange(contrast) => {
                write!(f, "contrast {contrast} outside [0, 2]")
            }
            RenderConfigError::InvalidGamma(gamma) => write!(f, "gamma {gamma} must be positive"),
            RenderConfigError::InvalidExponent(exponent) => {
                write!(f, "scaling exponent {exponent} must exceed 1")
            }
        }
    }
}

impl std::error::Error for RenderConfigError {}

/// How a frame's pixel values turn into colours.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    colormap: String,
    custom_gradient: CustomGradient,
    scaling: ScalingType,
    scale_min: f64,
    scale_max: f64,
    bias: f64,
    contrast: f64,
    gamma: f64,
    exponent: f64,
    alpha: f64,
    inverted: bool,
    visible: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            colormap: DEFAULT_COLORMAP.to_string(),
            custom_gradient: CustomGradient::default(),
            scaling: ScalingType::Linear,
            scale_min: 0.0,
            scale_max: 1.0,
            bias: 0.0,
            contrast: 1.0,
            gamma: 1.0,
            exponent: DEFAULT_SCALING_EXPONENT,
            alpha: 1.0,
            inverted: false,
            visible: true,
        }
    }
}

impl RenderConfig {
    pub fn colormap(&self) -> &str {
        &self.colormap
    }

    pub fn custom_gradient(&self) -> CustomGradient {
        self.custom_gradient
    }

    pub fn scaling(&self) -> ScalingType {
        self.scaling
    }

    pub fn scale_min(&self) -> f64 {
        self.scale_min
    }

    pub fn scale_max(&self) -> f64 {
        self.scale_max
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn contrast(&self) -> f64 {
        self.contrast
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn exponent(&self) -> f64 {
        self.exponent
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn inverted(&self) -> bool {
        self.inverted
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn set_colormap(&mut self, name: &str) -> Result<(), RenderConfigError> {
        if !is_known_colormap(name) {
            return Err(RenderConfigError::UnknownColormap(name.to_string()));
        }
        self.colormap = name.to_string();
        Ok(())
    }

    /// Switches to the custom gradient running from `start` to `end`.
    pub fn set_custom_gradient(&mut self, start: Color, end: Color) {
        self.custom_gradient = CustomGradient { start, end };
        self.colormap = CUSTOM_COLORMAP.to_string();
    }

    pub fn set_scaling(&mut self, scaling: ScalingType) {
        self.scaling = scaling;
    }

    pub fn set_scale_limits(&mut self, min: f64, max: f64) -> Result<(), RenderConfigError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(RenderConfigError::NonFiniteLimit);
        }
        if min > max {
            return Err(RenderConfigError::InvertedLimits { min, max });
        }
        self.scale_min = min;
        self.scale_max = max;
        Ok(())
    }

    pub fn set_bias(&mut self, bias: f64) -> Result<(), RenderConfigError> {
        if !(-1.0..=1.0).contains(&bias) {
            return Err(RenderConfigError::BiasOutOfRange(bias));
        }
        self.bias = bias;
        Ok(())
    }

    pub fn set_contrast(&mut self, contrast: f64) -> Result<(), RenderConfigError> {
        if !(0.0..=2.0).contains(&contrast) {
            return Err(RenderConfigError::ContrastOutOfRange(contrast));
        }
        self.contrast = contrast;
        Ok(())
    }

    pub fn set_gamma(&mut self, gamma: f64) -> Result<(), RenderConfigError> {
        if !gamma.is_finite() || gamma <= 0.0 {
            return Err(RenderConfigError::InvalidGamma(gamma));
        }
        self.gamma = gamma;
        Ok(())
    }

    pub fn set_exponent(&mut self, exponent: f64) -> Result<(), RenderConfigError> {
        if !exponent.is_finite() || exponent <= 1.0 {
            return Err(RenderConfigError::InvalidExponent(exponent));
        }
        self.exponent = exponent;
        Ok(())
    }

    pub fn set_alpha(&mut self, alpha: f64) -> Result<(), RenderConfigError> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(RenderConfigError::AlphaOutOfRange(alpha));
        }
        self.alpha = alpha;
        Ok(())
    }

    pub fn set_inverted(&mut self, inverted: bool) {
        self.inverted = inverted;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Copies the value mapping of `reference`, keeping this config's
    /// colormap, alpha and visibility.
    pub fn inherit_scaling_from(&mut self, reference: &RenderConfig) {
        self.scaling = reference.scaling;
        self.scale_min = reference.scale_min;
        self.scale_max = reference.scale_max;
        self.bias = reference.bias;
        self.contrast = reference.contrast;
        self.gamma = reference.gamma;
        self.exponent = reference.exponent;
    }

    pub fn colormap_lut(&self) -> Result<ColormapLut, ColormapError> {
        colormap_lut(&self.colormap, self.custom_gradient)
    }

    pub fn raster_uniforms(&self, style: &RasterStyle) -> RasterUniforms {
        RasterUniforms {
            scaling: [
                self.scale_min as f32,
                self.scale_max as f32,
                self.bias as f32,
                self.contrast as f32,
            ],
            transfer: [self.gamma as f32, self.exponent as f32, self.alpha as f32, 0.0],
            flags: [
                self.scaling.as_u32(),
                u32::from(self.inverted),
                u32::from(style.smoothed_bias_contrast),
                0,
            ],
            nan_color: style.nan_color.to_f32(),
            grid_color: style.pixel_grid_color.to_f32(),
        }
    }
}

/// Viewer-wide raster appearance shared by every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterStyle {
    pub nan_color: Color,
    pub pixel_grid_color: Color,
    pub smoothed_bias_contrast: bool,
}

impl Default for RasterStyle {
    fn default() -> Self {
        Self {
            nan_color: Color::TRANSPARENT,
            pixel_grid_color: Color::WHITE,
            smoothed_bias_contrast: true,
        }
    }
}
