use std::fmt;

use model::FrameView;
pub use model::Point2D;

mod sampling;
mod world;

pub use sampling::{LineSamples, SamplingMode, sample_line};
pub use world::{GnomonicProjection, WorldCoordinateSystem, WorldPoint, angular_separation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewTransformError {
    InvalidZoom,
    InvalidViewport,
    NonFiniteValue,
    SingularTransform,
}

impl fmt::Display for ViewTransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewTransformError::InvalidZoom => write!(f, "zoom must be finite and positive"),
            ViewTransformError::InvalidViewport => write!(f, "viewport has no area"),
            ViewTransformError::NonFiniteValue => write!(f, "non-finite coordinate"),
            ViewTransformError::SingularTransform => write!(f, "transform is not invertible"),
        }
    }
}

impl std::error::Error for ViewTransformError {}

pub fn add_2d(a: Point2D, b: Point2D) -> Point2D {
    Point2D::new(a.x + b.x, a.y + b.y)
}

pub fn subtract_2d(a: Point2D, b: Point2D) -> Point2D {
    Point2D::new(a.x - b.x, a.y - b.y)
}

pub fn scale_2d(point: Point2D, scale: f64) -> Point2D {
    Point2D::new(point.x * scale, point.y * scale)
}

/// Counter-clockwise rotation about the origin.
pub fn rotate_2d(point: Point2D, radians: f64) -> Point2D {
    let (sine, cosine) = radians.sin_cos();
    Point2D::new(
        point.x * cosine - point.y * sine,
        point.x * sine + point.y * cosine,
    )
}

/// Row-major 2x3 affine matrix; the implicit last row is `[0, 0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform2D {
    matrix: [[f64; 3]; 2],
}

impl Default for AffineTransform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl AffineTransform2D {
    pub const IDENTITY: Self = Self {
        matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
    };

    pub fn new(matrix: [[f64; 3]; 2]) -> Result<Self, ViewTransformError> {
        if matrix.iter().flatten().any(|value| !value.is_finite()) {
            return Err(ViewTransformError::NonFiniteValue);
        }
        Ok(Self { matrix })
    }

    pub fn scale(scale_x: f64, scale_y: f64) -> Self {
        Self {
            matrix: [[scale_x, 0.0, 0.0], [0.0, scale_y, 0.0]],
        }
    }

    pub fn matrix(&self) -> [[f64; 3]; 2] {
        self.matrix
    }

    /// Applies `self` first, then `next`.
    pub fn then(&self, next: &Self) -> Self {
        let a = next.matrix;
        let b = self.matrix;
        let mut matrix = [[0.0; 3]; 2];
        for row in 0..2 {
            matrix[row][0] = a[row][0] * b[0][0] + a[row][1] * b[1][0];
            matrix[row][1] = a[row][0] * b[0][1] + a[row][1] * b[1][1];
            matrix[row][2] = a[row][0] * b[0][2] + a[row][1] * b[1][2] + a[row][2];
        }
        Self { matrix }
    }

    pub fn apply(&self, point: Point2D) -> Point2D {
        let m = self.matrix;
        Point2D::new(
            m[0][0] * point.x + m[0][1] * point.y + m[0][2],
            m[1][0] * point.x + m[1][1] * point.y + m[1][2],
        )
    }

    pub fn inverse(&self) -> Result<Self, ViewTransformError> {
        let m = self.matrix;
        let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
        if !det.is_finite() || det.abs() <= f64::EPSILON {
            return Err(ViewTransformError::SingularTransform);
        }
        let inv00 = m[1][1] / det;
        let inv01 = -m[0][1] / det;
        let inv10 = -m[1][0] / det;
        let inv11 = m[0][0] / det;
        Ok(Self {
            matrix: [
                [inv00, inv01, -(inv00 * m[0][2] + inv01 * m[1][2])],
                [inv10, inv11, -(inv10 * m[0][2] + inv11 * m[1][2])],
            ],
        })
    }
}

pub fn transform_point(
    transform: &AffineTransform2D,
    point: Point2D,
    inverse: bool,
) -> Result<Point2D, ViewTransformError> {
    if !point.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    let mapped = if inverse {
        transform.inverse()?.apply(point)
    } else {
        transform.apply(point)
    };
    if !mapped.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    Ok(mapped)
}

/// Maps a matched image onto its spatial reference: scale and rotate about
/// `origin`, then shift by `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialTransform {
    translation: Point2D,
    origin: Point2D,
    rotation: f64,
    scale: f64,
}

impl Default for SpatialTransform {
    fn default() -> Self {
        Self {
            translation: Point2D::default(),
            origin: Point2D::default(),
            rotation: 0.0,
            scale: 1.0,
        }
    }
}

impl SpatialTransform {
    pub fn new(
        translation: Point2D,
        origin: Point2D,
        rotation: f64,
        scale: f64,
    ) -> Result<Self, ViewTransformError> {
        if !translation.is_finite() || !origin.is_finite() || !rotation.is_finite() {
            return Err(ViewTransformError::NonFiniteValue);
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ViewTransformError::InvalidZoom);
        }
        Ok(Self {
            translation,
            origin,
            rotation,
            scale,
        })
    }

    pub fn translation(&self) -> Point2D {
        self.translation
    }

    pub fn origin(&self) -> Point2D {
        self.origin
    }

    pub fn rotation(&self) -> f64 {
        self.rotation
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn apply(&self, point: Point2D) -> Point2D {
        let local = scale_2d(subtract_2d(point, self.origin), self.scale);
        add_2d(
            add_2d(rotate_2d(local, self.rotation), self.origin),
            self.translation,
        )
    }

    pub fn apply_inverse(&self, point: Point2D) -> Point2D {
        let local = subtract_2d(subtract_2d(point, self.translation), self.origin);
        add_2d(
            scale_2d(rotate_2d(local, -self.rotation), 1.0 / self.scale),
            self.origin,
        )
    }

    pub fn to_affine(&self) -> AffineTransform2D {
        let (sine, cosine) = self.rotation.sin_cos();
        let a = self.scale * cosine;
        let b = -self.scale * sine;
        let c = self.scale * sine;
        let d = self.scale * cosine;
        let shift = add_2d(self.origin, self.translation);
        AffineTransform2D {
            matrix: [
                [a, b, shift.x - (a * self.origin.x + b * self.origin.y)],
                [c, d, shift.y - (c * self.origin.x + d * self.origin.y)],
            ],
        }
    }
}

/// How a frame view is laid onto a panel canvas.
///
/// Image coordinates put pixel centres on integers; view bounds are in
/// texel space, where pixel `i` spans `[i, i + 1)`. Canvas y grows
/// downwards. Non-square pixels show up as different zooms along x and y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasGeometry {
    view: FrameView,
    render_width: f64,
    render_height: f64,
}

impl CanvasGeometry {
    pub fn new(
        view: FrameView,
        render_width: f64,
        render_height: f64,
    ) -> Result<Self, ViewTransformError> {
        if !render_width.is_finite() || !render_height.is_finite() {
            return Err(ViewTransformError::NonFiniteValue);
        }
        if render_width <= 0.0 || render_height <= 0.0 || !view.has_area() {
            return Err(ViewTransformError::InvalidViewport);
        }
        Ok(Self {
            view,
            render_width,
            render_height,
        })
    }

    pub fn view(&self) -> &FrameView {
        &self.view
    }

    pub fn render_width(&self) -> f64 {
        self.render_width
    }

    pub fn render_height(&self) -> f64 {
        self.render_height
    }

    /// Canvas pixels per image pixel along x.
    pub fn zoom_x(&self) -> f64 {
        self.render_width / self.view.width()
    }

    /// Canvas pixels per image pixel along y.
    pub fn zoom_y(&self) -> f64 {
        self.render_height / self.view.height()
    }
}

pub fn image_to_canvas(
    point: Point2D,
    geometry: &CanvasGeometry,
    spatial: Option<&SpatialTransform>,
) -> Point2D {
    let reference = match spatial {
        Some(transform) => transform.apply(point),
        None => point,
    };
    let view = geometry.view;
    Point2D::new(
        (reference.x + 0.5 - view.x_min()) * geometry.zoom_x(),
        geometry.render_height - (reference.y + 0.5 - view.y_min()) * geometry.zoom_y(),
    )
}

pub fn canvas_to_image(
    point: Point2D,
    geometry: &CanvasGeometry,
    spatial: Option<&SpatialTransform>,
) -> Result<Point2D, ViewTransformError> {
    if !point.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    let view = geometry.view;
    let reference = Point2D::new(
        view.x_min() + point.x / geometry.zoom_x() - 0.5,
        view.y_min() + (geometry.render_height - point.y) / geometry.zoom_y() - 0.5,
    );
    let image = match spatial {
        Some(transform) => transform.apply_inverse(reference),
        None => reference,
    };
    if !image.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    Ok(image)
}

/// New pan centre keeping `anchor` fixed on screen while zoom changes.
pub fn zoom_center_about_point(
    center: Point2D,
    zoom: f64,
    next_zoom: f64,
    anchor: Point2D,
) -> Result<Point2D, ViewTransformError> {
    if !zoom.is_finite() || zoom <= 0.0 || !next_zoom.is_finite() || next_zoom <= 0.0 {
        return Err(ViewTransformError::InvalidZoom);
    }
    if !center.is_finite() || !anchor.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    let ratio = checked_div(zoom, next_zoom)?;
    let offset = scale_2d(subtract_2d(center, anchor), ratio);
    let next = add_2d(anchor, offset);
    if !next.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    Ok(next)
}

fn checked_div(numerator: f64, denominator: f64) -> Result<f64, ViewTransformError> {
    let value = numerator / denominator;
    if !value.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    Ok(value)
}
