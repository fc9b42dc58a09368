//! Viewer configuration, read from a JSON file. Every field is optional in
//! the file; missing ones take their defaults.

use std::fmt;
use std::fs;
use std::path::Path;

use compositor::{ColorbarConfig, CompositorConfig, Padding, PixelGridConfig};
use document::RasterStyle;
use frame_scheduler::FrameSchedulerConfig;
use render_protocol::{Color, GridLayout, GridLayoutError};
use serde::{Deserialize, Serialize};
use tile_stream::{CompressionType, TileStreamConfig};
use tiles::{AtlasTier, TileCacheConfig};

#[derive(Debug)]
pub enum ConfigError {
    Read(std::io::Error),
    Parse(serde_json::Error),
    InvalidPixelRatio(f64),
    Layout(GridLayoutError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(err) => write!(f, "cannot read config: {err}"),
            ConfigError::Parse(err) => write!(f, "malformed config: {err}"),
            ConfigError::InvalidPixelRatio(ratio) => {
                write!(f, "pixel ratio {ratio} must be positive and finite")
            }
            ConfigError::Layout(err) => write!(f, "invalid panel grid: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Read(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

impl From<GridLayoutError> for ConfigError {
    fn from(err: GridLayoutError) -> Self {
        ConfigError::Layout(err)
    }
}

/// Atlas size, by number of 4096-texel pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtlasTierSetting {
    Single,
    Double,
    #[default]
    Quad,
    Octo,
}

impl From<AtlasTierSetting> for AtlasTier {
    fn from(setting: AtlasTierSetting) -> Self {
        match setting {
            AtlasTierSetting::Single => AtlasTier::Single8,
            AtlasTierSetting::Double => AtlasTier::Double9,
            AtlasTierSetting::Quad => AtlasTier::Quad10,
            AtlasTierSetting::Octo => AtlasTier::Octo11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompressionSetting {
    None,
    Zfp { quality: u8 },
    Sz { quality: u8 },
}

impl Default for CompressionSetting {
    fn default() -> Self {
        CompressionSetting::Zfp { quality: 11 }
    }
}

impl From<CompressionSetting> for CompressionType {
    fn from(setting: CompressionSetting) -> Self {
        match setting {
            CompressionSetting::None => CompressionType::None,
            CompressionSetting::Zfp { quality } => CompressionType::Zfp { quality },
            CompressionSetting::Sz { quality } => CompressionType::Sz { quality },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub atlas_tier: AtlasTierSetting,
    /// Tiles held in memory before their first upload.
    pub max_pending_tiles: usize,
    /// Responses the arrival ring buffers between ticks.
    pub ring_capacity: usize,
    /// Ticks an unanswered tile request blocks a new request for that tile.
    pub pending_tile_timeout_ticks: u64,
    pub compression: CompressionSetting,
    pub high_res_placeholder_levels: u32,
    pub low_res_fallback: bool,
    pub pixel_grid: PixelGridConfig,
    pub nan_color: Color,
    pub pixel_grid_color: Color,
    pub smoothed_bias_contrast: bool,
    pub grid_columns: u32,
    pub grid_rows: u32,
    /// Panel size in device pixels.
    pub panel_width: u32,
    pub panel_height: u32,
    /// Device pixels per logical pixel.
    pub pixel_ratio: f64,
    pub background: Color,
    pub padding: Padding,
    pub colorbar: ColorbarConfig,
    pub max_panels_per_tick: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        let compositor = CompositorConfig::default();
        let style = RasterStyle::default();
        Self {
            atlas_tier: AtlasTierSetting::default(),
            max_pending_tiles: TileCacheConfig::default().max_pending_tiles,
            ring_capacity: TileStreamConfig::default().ring_capacity,
            pending_tile_timeout_ticks: TileStreamConfig::default().pending_timeout_passes,
            compression: CompressionSetting::default(),
            high_res_placeholder_levels: compositor.high_res_placeholder_levels,
            low_res_fallback: compositor.low_res_fallback,
            pixel_grid: compositor.pixel_grid,
            nan_color: style.nan_color,
            pixel_grid_color: style.pixel_grid_color,
            smoothed_bias_contrast: style.smoothed_bias_contrast,
            grid_columns: 1,
            grid_rows: 1,
            panel_width: 800,
            panel_height: 600,
            pixel_ratio: 1.0,
            background: compositor.background,
            padding: compositor.padding,
            colorbar: compositor.colorbar,
            max_panels_per_tick: FrameSchedulerConfig::default().max_panels_per_tick,
        }
    }
}

impl ViewerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.pixel_ratio.is_finite() || self.pixel_ratio <= 0.0 {
            return Err(ConfigError::InvalidPixelRatio(self.pixel_ratio));
        }
        self.grid_layout()?;
        Ok(())
    }

    pub fn grid_layout(&self) -> Result<GridLayout, GridLayoutError> {
        GridLayout::new(
            self.grid_columns,
            self.grid_rows,
            self.panel_width,
            self.panel_height,
        )
    }

    pub fn tile_cache_config(&self) -> TileCacheConfig {
        TileCacheConfig {
            tier: self.atlas_tier.into(),
            max_pending_tiles: self.max_pending_tiles,
        }
    }

    pub fn tile_stream_config(&self) -> TileStreamConfig {
        TileStreamConfig {
            ring_capacity: self.ring_capacity,
            compression: self.compression.into(),
            pending_timeout_passes: self.pending_tile_timeout_ticks,
        }
    }

    pub fn compositor_config(&self) -> CompositorConfig {
        CompositorConfig {
            high_res_placeholder_levels: self.high_res_placeholder_levels,
            low_res_fallback: self.low_res_fallback,
            pixel_grid: self.pixel_grid,
            raster_style: RasterStyle {
                nan_color: self.nan_color,
                pixel_grid_color: self.pixel_grid_color,
                smoothed_bias_contrast: self.smoothed_bias_contrast,
            },
            background: self.background,
            padding: self.padding,
            colorbar: self.colorbar,
        }
    }

    pub fn scheduler_config(&self) -> FrameSchedulerConfig {
        FrameSchedulerConfig {
            max_panels_per_tick: self.max_panels_per_tick.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(ViewerConfig::from_json("{}").unwrap(), ViewerConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let config = ViewerConfig::from_json(
            r##"{
                "atlas_tier": "octo",
                "compression": { "type": "sz", "quality": 4 },
                "grid_columns": 3,
                "background": "#102030",
                "pixel_grid": { "min_zoom": 8.0 },
                "colorbar": { "position": "bottom" }
            }"##,
        )
        .unwrap();
        assert_eq!(config.tile_cache_config().tier, AtlasTier::Octo11);
        assert_eq!(
            config.tile_stream_config().compression,
            CompressionType::Sz { quality: 4 }
        );
        assert_eq!(config.grid_layout().unwrap().panel_count(), 3);
        assert_eq!(config.compositor_config().background, Color::rgb(16, 32, 48));
        assert_eq!(config.pixel_grid.min_zoom, 8.0);
        assert_eq!(config.pixel_grid.full_zoom, 12.0);
        assert_eq!(config.colorbar.position, compositor::ColorbarPosition::Bottom);
        assert!(config.colorbar.visible);
        assert_eq!(config.panel_width, 800);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            ViewerConfig::from_json(r#"{ "pixel_ratio": 0.0 }"#),
            Err(ConfigError::InvalidPixelRatio(_))
        ));
        assert!(matches!(
            ViewerConfig::from_json(r#"{ "grid_rows": 0 }"#),
            Err(ConfigError::Layout(GridLayoutError::EmptyGrid))
        ));
        assert!(matches!(
            ViewerConfig::from_json(r#"{ "grid_rows": "two" }"#),
            Err(ConfigError::Parse(_))
        ));
    }
}
