//! Astronomical image viewer core.
//!
//! [`ImageViewer`] owns the open frames, the tile cache and stream, the
//! render domains and the panel grid, and redraws dirty panels on each
//! [`ImageViewer::tick`]. The `synthetic` module serves analytic images for
//! headless runs and tests.

pub mod config;
pub mod synthetic;
mod viewer;

pub use config::{AtlasTierSetting, CompressionSetting, ConfigError, ViewerConfig};
pub use viewer::{ImageViewer, TickReport, ViewerError};

#[cfg(test)]
mod tests;
