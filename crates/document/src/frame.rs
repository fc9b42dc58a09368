use std::fmt;
use std::sync::Arc;

use model::{FrameId, FrameView, ImageSize, Point2D};
use view::{GnomonicProjection, SpatialTransform};

use crate::compute::ComputeJobs;
use crate::render_config::RenderConfig;

/// Zoom range a frame accepts, in screen pixels per image pixel.
pub const MIN_ZOOM: f64 = 1e-6;
pub const MAX_ZOOM: f64 = 1e6;
/// Pixel height to width ratios a frame accepts.
pub const PIXEL_ASPECT_RANGE: (f64, f64) = (1e-3, 1e3);

/// Static description of an opened image file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub file_id: i32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub stokes: u32,
    /// Height of one pixel relative to its width.
    pub pixel_aspect: f64,
    /// Celestial coordinates, when the header carries a usable WCS.
    pub wcs: Option<GnomonicProjection>,
}

impl FileInfo {
    pub fn new(file_id: i32, name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            file_id,
            name: name.into(),
            width,
            height,
            depth: 1,
            stokes: 1,
            pixel_aspect: 1.0,
            wcs: None,
        }
    }

    pub fn image_size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameError {
    EmptyImage,
    InvalidPixelAspect(f64),
    ChannelOutOfRange { channel: u32, depth: u32 },
    StokesOutOfRange { stokes: u32, count: u32 },
    InvalidZoom(f64),
    NonFiniteCenter,
    EmptyRenderSize,
    InvalidPixelRatio(f64),
    PreviewSizeMismatch { expected: usize, actual: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::EmptyImage => write!(f, "image has no pixels"),
            FrameError::InvalidPixelAspect(aspect) => write!(
                f,
                "pixel aspect ratio {aspect} outside [{}, {}]",
                PIXEL_ASPECT_RANGE.0, PIXEL_ASPECT_RANGE.1
            ),
            FrameError::ChannelOutOfRange { channel, depth } => {
                write!(f, "channel {channel} outside cube depth {depth}")
            }
            FrameError::StokesOutOfRange { stokes, count } => {
                write!(f, "stokes {stokes} outside {count} stokes planes")
            }
            FrameError::InvalidZoom(zoom) => {
                write!(f, "zoom {zoom} outside [{MIN_ZOOM}, {MAX_ZOOM}]")
            }
            FrameError::NonFiniteCenter => write!(f, "frame centre must be finite"),
            FrameError::EmptyRenderSize => write!(f, "render size must be non-zero"),
            FrameError::InvalidPixelRatio(ratio) => {
                write!(f, "pixel ratio {ratio} must be positive")
            }
            FrameError::PreviewSizeMismatch { expected, actual } => {
                write!(f, "preview raster needs {expected} values, got {actual}")
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Whole-plane raster shown in the preview domain instead of tiles.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewRaster {
    width: u32,
    height: u32,
    data: Arc<[f32]>,
}

impl PreviewRaster {
    pub fn new(width: u32, height: u32, data: Arc<[f32]>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyImage);
        }
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::PreviewSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// One loaded image and everything needed to draw it.
///
/// `zoom` counts device pixels per image pixel. The render size is in
/// logical pixels; the panel covers `render size * pixel_ratio` device
/// pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    info: FileInfo,
    channel: u32,
    stokes: u32,
    center: Point2D,
    zoom: f64,
    render_width: u32,
    render_height: u32,
    pixel_ratio: f64,
    moving: bool,
    spatial_reference: Option<FrameId>,
    spectral_reference: Option<FrameId>,
    raster_scaling_reference: Option<FrameId>,
    spatial_transform: Option<SpatialTransform>,
    render_config: RenderConfig,
    compute: ComputeJobs,
    error_message: Option<String>,
    preview: Option<PreviewRaster>,
}

impl Frame {
    pub fn new(info: FileInfo) -> Result<Self, FrameError> {
        if info.width == 0 || info.height == 0 || info.depth == 0 || info.stokes == 0 {
            return Err(FrameError::EmptyImage);
        }
        if !(PIXEL_ASPECT_RANGE.0..=PIXEL_ASPECT_RANGE.1).contains(&info.pixel_aspect) {
            return Err(FrameError::InvalidPixelAspect(info.pixel_aspect));
        }
        let center = Point2D::new(
            (info.width as f64 - 1.0) * 0.5,
            (info.height as f64 - 1.0) * 0.5,
        );
        Ok(Self {
            info,
            channel: 0,
            stokes: 0,
            center,
            zoom: 1.0,
            render_width: 1,
            render_height: 1,
            pixel_ratio: 1.0,
            moving: false,
            spatial_reference: None,
            spectral_reference: None,
            raster_scaling_reference: None,
            spatial_transform: None,
            render_config: RenderConfig::default(),
            compute: ComputeJobs::default(),
            error_message: None,
            preview: None,
        })
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn file_id(&self) -> i32 {
        self.info.file_id
    }

    pub fn image_size(&self) -> ImageSize {
        self.info.image_size()
    }

    pub fn channel(&self) -> u32 {
        self.channel
    }

    pub fn stokes(&self) -> u32 {
        self.stokes
    }

    pub fn center(&self) -> Point2D {
        self.center
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn render_size(&self) -> (u32, u32) {
        (self.render_width, self.render_height)
    }

    pub fn pixel_ratio(&self) -> f64 {
        self.pixel_ratio
    }

    /// Panel size in device pixels.
    pub fn device_size(&self) -> (u32, u32) {
        (
            (self.render_width as f64 * self.pixel_ratio).round() as u32,
            (self.render_height as f64 * self.pixel_ratio).round() as u32,
        )
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.info.pixel_aspect
    }

    pub fn has_square_pixels(&self) -> bool {
        self.info.pixel_aspect == 1.0
    }

    pub fn has_valid_wcs(&self) -> bool {
        self.info.wcs.is_some()
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    pub fn spatial_reference(&self) -> Option<FrameId> {
        self.spatial_reference
    }

    pub fn spectral_reference(&self) -> Option<FrameId> {
        self.spectral_reference
    }

    pub fn raster_scaling_reference(&self) -> Option<FrameId> {
        self.raster_scaling_reference
    }

    pub fn spatial_transform(&self) -> Option<&SpatialTransform> {
        self.spatial_transform.as_ref()
    }

    pub fn render_config(&self) -> &RenderConfig {
        &self.render_config
    }

    pub fn render_config_mut(&mut self) -> &mut RenderConfig {
        &mut self.render_config
    }

    pub fn compute(&self) -> &ComputeJobs {
        &self.compute
    }

    pub(crate) fn compute_mut(&mut self) -> &mut ComputeJobs {
        &mut self.compute
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_error_message(&mut self, message: Option<String>) {
        self.error_message = message;
    }

    pub fn preview(&self) -> Option<&PreviewRaster> {
        self.preview.as_ref()
    }

    pub fn set_preview(&mut self, preview: Option<PreviewRaster>) {
        self.preview = preview;
    }

    pub fn set_channel(&mut self, channel: u32, stokes: u32) -> Result<(), FrameError> {
        if channel >= self.info.depth {
            return Err(FrameError::ChannelOutOfRange {
                channel,
                depth: self.info.depth,
            });
        }
        if stokes >= self.info.stokes {
            return Err(FrameError::StokesOutOfRange {
                stokes,
                count: self.info.stokes,
            });
        }
        self.channel = channel;
        self.stokes = stokes;
        Ok(())
    }

    pub fn set_center(&mut self, center: Point2D) -> Result<(), FrameError> {
        if !center.is_finite() {
            return Err(FrameError::NonFiniteCenter);
        }
        self.center = center;
        Ok(())
    }

    pub fn set_zoom(&mut self, zoom: f64) -> Result<(), FrameError> {
        if !(MIN_ZOOM..=MAX_ZOOM).contains(&zoom) {
            return Err(FrameError::InvalidZoom(zoom));
        }
        self.zoom = zoom;
        Ok(())
    }

    /// Zoom that fits the whole image into the panel, within the accepted
    /// zoom range.
    pub fn zoom_to_fit(&mut self) {
        let (device_width, device_height) = self.device_size();
        let fit_x = device_width as f64 / self.info.width as f64;
        let fit_y = device_height as f64 / (self.info.height as f64 * self.info.pixel_aspect);
        let fit = fit_x.min(fit_y);
        if fit.is_finite() && fit > 0.0 {
            self.zoom = fit.clamp(MIN_ZOOM, MAX_ZOOM);
        }
        self.center = Point2D::new(
            (self.info.width as f64 - 1.0) * 0.5,
            (self.info.height as f64 - 1.0) * 0.5,
        );
    }

    pub fn set_render_size(
        &mut self,
        width: u32,
        height: u32,
        pixel_ratio: f64,
    ) -> Result<(), FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyRenderSize);
        }
        if !pixel_ratio.is_finite() || pixel_ratio <= 0.0 {
            return Err(FrameError::InvalidPixelRatio(pixel_ratio));
        }
        self.render_width = width;
        self.render_height = height;
        self.pixel_ratio = pixel_ratio;
        Ok(())
    }

    pub fn set_moving(&mut self, moving: bool) {
        self.moving = moving;
    }

    pub fn set_spatial_transform(&mut self, transform: Option<SpatialTransform>) {
        self.spatial_transform = transform;
    }

    pub(crate) fn set_spatial_reference(&mut self, reference: Option<FrameId>) {
        self.spatial_reference = reference;
    }

    pub(crate) fn set_spectral_reference(&mut self, reference: Option<FrameId>) {
        self.spectral_reference = reference;
    }

    pub(crate) fn set_raster_scaling_reference(&mut self, reference: Option<FrameId>) {
        self.raster_scaling_reference = reference;
    }

    /// Sampling level for the current zoom: the power of two nearest to
    /// `1 / zoom`, never below one.
    pub fn mip(&self) -> f64 {
        let exact = (1.0 / self.zoom).max(1.0);
        2f64.powf(exact.log2().round())
    }

    /// Image region visible in this frame's own panel, in texel space.
    pub fn own_view(&self) -> FrameView {
        let (device_width, device_height) = self.device_size();
        let width = device_width as f64 / self.zoom;
        let height = device_height as f64 / self.zoom / self.info.pixel_aspect;
        let x_center = self.center.x + 0.5;
        let y_center = self.center.y + 0.5;
        FrameView::new(
            x_center - width * 0.5,
            x_center + width * 0.5,
            y_center - height * 0.5,
            y_center + height * 0.5,
            self.mip(),
        )
        .expect("validated frame geometry yields an ordered view")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(FileInfo::new(0, "test.fits", width, height)).unwrap()
    }

    #[test]
    fn new_frame_is_centred() {
        let frame = frame(100, 50);
        assert_eq!(frame.center(), Point2D::new(49.5, 24.5));
        assert!(Frame::new(FileInfo::new(1, "empty", 0, 10)).is_err());
    }

    #[test]
    fn own_view_spans_render_size_over_zoom() {
        let mut frame = frame(100, 100);
        frame.set_render_size(200, 100, 1.0).unwrap();
        frame.set_zoom(2.0).unwrap();
        let view = frame.own_view();
        assert_eq!(view.width(), 100.0);
        assert_eq!(view.height(), 50.0);
        assert_eq!(view.center(), Point2D::new(50.0, 50.0));
        assert_eq!(view.mip(), 1.0);
    }

    #[test]
    fn mip_rounds_to_nearest_power_of_two() {
        let mut frame = frame(4096, 4096);
        let cases = [(1.0, 1.0), (0.5, 2.0), (0.3, 4.0), (0.2, 4.0), (0.1, 8.0), (4.0, 1.0)];
        for (zoom, mip) in cases {
            frame.set_zoom(zoom).unwrap();
            assert_eq!(frame.mip(), mip, "zoom {zoom}");
        }
    }

    #[test]
    fn pixel_ratio_widens_device_view() {
        let mut frame = frame(100, 100);
        frame.set_render_size(50, 50, 2.0).unwrap();
        assert_eq!(frame.device_size(), (100, 100));
        assert_eq!(frame.own_view().width(), 100.0);
    }

    #[test]
    fn tall_pixels_shrink_view_height() {
        let mut info = FileInfo::new(0, "tall", 100, 100);
        info.pixel_aspect = 2.0;
        let mut frame = Frame::new(info).unwrap();
        frame.set_render_size(100, 100, 1.0).unwrap();
        assert_eq!(frame.own_view().height(), 50.0);
    }

    #[test]
    fn channel_outside_cube_is_rejected() {
        let mut info = FileInfo::new(0, "cube", 10, 10);
        info.depth = 5;
        let mut frame = Frame::new(info).unwrap();
        assert!(frame.set_channel(4, 0).is_ok());
        assert_eq!(
            frame.set_channel(5, 0),
            Err(FrameError::ChannelOutOfRange {
                channel: 5,
                depth: 5
            })
        );
        assert_eq!(frame.channel(), 4);
    }

    #[test]
    fn zoom_outside_range_is_rejected() {
        let mut frame = frame(4096, 4096);
        frame.set_render_size(800, 600, 1.0).unwrap();
        for zoom in [1e-308, MIN_ZOOM / 2.0, MAX_ZOOM * 2.0, f64::INFINITY, 0.0, -1.0] {
            assert_eq!(frame.set_zoom(zoom), Err(FrameError::InvalidZoom(zoom)));
        }
        assert_eq!(frame.zoom(), 1.0);

        frame.set_zoom(MIN_ZOOM).unwrap();
        let view = frame.own_view();
        assert!(view.width().is_finite() && view.mip().is_finite());
        frame.set_zoom(MAX_ZOOM).unwrap();
        assert_eq!(frame.own_view().mip(), 1.0);
    }

    #[test]
    fn extreme_pixel_aspect_is_rejected() {
        for aspect in [1e-300, 1e300, 0.0] {
            let mut info = FileInfo::new(0, "squashed", 10, 10);
            info.pixel_aspect = aspect;
            assert_eq!(
                Frame::new(info).err(),
                Some(FrameError::InvalidPixelAspect(aspect))
            );
        }
    }

    #[test]
    fn zoom_to_fit_shows_whole_image() {
        let mut frame = frame(400, 200);
        frame.set_render_size(100, 100, 1.0).unwrap();
        frame.zoom_to_fit();
        assert_eq!(frame.zoom(), 0.25);
        let view = frame.own_view();
        assert!(view.x_min() <= 0.0 && view.x_max() >= 400.0);
    }
}
