//! Celestial coordinates of image pixels.

use crate::{Point2D, ViewTransformError};

/// Longitude and latitude in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldPoint {
    pub lon: f64,
    pub lat: f64,
}

impl WorldPoint {
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self::new(lon.to_radians(), lat.to_radians())
    }

    fn to_unit_vector(self) -> [f64; 3] {
        let (sin_lat, cos_lat) = self.lat.sin_cos();
        let (sin_lon, cos_lon) = self.lon.sin_cos();
        [cos_lat * cos_lon, cos_lat * sin_lon, sin_lat]
    }

    fn from_unit_vector(v: [f64; 3]) -> Self {
        let lon = v[1].atan2(v[0]);
        let lat = v[2].atan2((v[0] * v[0] + v[1] * v[1]).sqrt());
        Self::new(lon, lat)
    }
}

pub trait WorldCoordinateSystem {
    fn pixel_to_world(&self, pixel: Point2D) -> Option<WorldPoint>;
    fn world_to_pixel(&self, world: WorldPoint) -> Option<Point2D>;
}

/// Great-circle distance in radians.
pub fn angular_separation(a: WorldPoint, b: WorldPoint) -> f64 {
    let half_dlat = (b.lat - a.lat) * 0.5;
    let half_dlon = (b.lon - a.lon) * 0.5;
    let h = half_dlat.sin().powi(2) + a.lat.cos() * b.lat.cos() * half_dlon.sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// Point `t` of the way along the great circle from `a` to `b`.
pub(crate) fn great_circle_point(a: WorldPoint, b: WorldPoint, t: f64) -> WorldPoint {
    let omega = angular_separation(a, b);
    if omega <= f64::EPSILON {
        return a;
    }
    let va = a.to_unit_vector();
    let vb = b.to_unit_vector();
    let wa = ((1.0 - t) * omega).sin() / omega.sin();
    let wb = (t * omega).sin() / omega.sin();
    WorldPoint::from_unit_vector([
        wa * va[0] + wb * vb[0],
        wa * va[1] + wb * vb[1],
        wa * va[2] + wb * vb[2],
    ])
}

/// Gnomonic (TAN) projection around a reference pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GnomonicProjection {
    reference_pixel: Point2D,
    reference_world: WorldPoint,
    /// Radians per pixel along x and y; x is usually negative (east left).
    increment: (f64, f64),
}

impl GnomonicProjection {
    pub fn new(
        reference_pixel: Point2D,
        reference_world: WorldPoint,
        increment: (f64, f64),
    ) -> Result<Self, ViewTransformError> {
        if !reference_pixel.is_finite()
            || !reference_world.lon.is_finite()
            || !reference_world.lat.is_finite()
        {
            return Err(ViewTransformError::NonFiniteValue);
        }
        if !increment.0.is_finite()
            || !increment.1.is_finite()
            || increment.0 == 0.0
            || increment.1 == 0.0
        {
            return Err(ViewTransformError::SingularTransform);
        }
        Ok(Self {
            reference_pixel,
            reference_world,
            increment,
        })
    }
}

impl WorldCoordinateSystem for GnomonicProjection {
    fn pixel_to_world(&self, pixel: Point2D) -> Option<WorldPoint> {
        if !pixel.is_finite() {
            return None;
        }
        let x = (pixel.x - self.reference_pixel.x) * self.increment.0;
        let y = (pixel.y - self.reference_pixel.y) * self.increment.1;
        let rho = (x * x + y * y).sqrt();
        if rho == 0.0 {
            return Some(self.reference_world);
        }
        let c = rho.atan();
        let (sin_c, cos_c) = c.sin_cos();
        let (sin_lat0, cos_lat0) = self.reference_world.lat.sin_cos();
        let lat = (cos_c * sin_lat0 + y * sin_c * cos_lat0 / rho).asin();
        // x grows with longitude in the projection plane
        let lon = self.reference_world.lon
            + (x * sin_c).atan2(rho * cos_lat0 * cos_c - y * sin_lat0 * sin_c);
        Some(WorldPoint::new(lon, lat))
    }

    fn world_to_pixel(&self, world: WorldPoint) -> Option<Point2D> {
        let (sin_lat, cos_lat) = world.lat.sin_cos();
        let (sin_lat0, cos_lat0) = self.reference_world.lat.sin_cos();
        let dlon = world.lon - self.reference_world.lon;
        let (sin_dlon, cos_dlon) = dlon.sin_cos();
        let cos_c = sin_lat0 * sin_lat + cos_lat0 * cos_lat * cos_dlon;
        if cos_c <= 0.0 {
            return None;
        }
        let x = cos_lat * sin_dlon / cos_c;
        let y = (cos_lat0 * sin_lat - sin_lat0 * cos_lat * cos_dlon) / cos_c;
        Some(Point2D::new(
            self.reference_pixel.x + x / self.increment.0,
            self.reference_pixel.y + y / self.increment.1,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection(lat_degrees: f64) -> GnomonicProjection {
        let arcsec = (1.0f64 / 3600.0).to_radians();
        GnomonicProjection::new(
            Point2D::new(512.0, 512.0),
            WorldPoint::from_degrees(83.8, lat_degrees),
            (-arcsec, arcsec),
        )
        .unwrap()
    }

    #[test]
    fn reference_pixel_maps_to_reference_world() {
        let wcs = projection(-5.4);
        let world = wcs.pixel_to_world(Point2D::new(512.0, 512.0)).unwrap();
        assert!((world.lon - 83.8f64.to_radians()).abs() < 1e-12);
        assert!((world.lat - (-5.4f64).to_radians()).abs() < 1e-12);
    }

    #[test]
    fn pixel_world_round_trip() {
        let wcs = projection(40.0);
        for pixel in [
            Point2D::new(0.0, 0.0),
            Point2D::new(1023.0, 17.0),
            Point2D::new(300.5, 900.25),
        ] {
            let world = wcs.pixel_to_world(pixel).unwrap();
            let back = wcs.world_to_pixel(world).unwrap();
            assert!((back.x - pixel.x).abs() < 1e-6, "{back:?} vs {pixel:?}");
            assert!((back.y - pixel.y).abs() < 1e-6, "{back:?} vs {pixel:?}");
        }
    }

    #[test]
    fn east_is_left_for_negative_increment() {
        let wcs = projection(0.0);
        let left = wcs.pixel_to_world(Point2D::new(500.0, 512.0)).unwrap();
        assert!(left.lon > 83.8f64.to_radians());
    }

    #[test]
    fn far_side_has_no_pixel() {
        let wcs = projection(0.0);
        assert!(
            wcs.world_to_pixel(WorldPoint::from_degrees(263.8, 0.0))
                .is_none()
        );
    }

    #[test]
    fn separation_of_pole_and_equator_is_quarter_turn() {
        let d = angular_separation(
            WorldPoint::from_degrees(10.0, 0.0),
            WorldPoint::from_degrees(10.0, 90.0),
        );
        assert!((d - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn great_circle_midpoint_is_equidistant() {
        let a = WorldPoint::from_degrees(0.0, 10.0);
        let b = WorldPoint::from_degrees(40.0, 50.0);
        let mid = great_circle_point(a, b, 0.5);
        assert!((angular_separation(a, mid) - angular_separation(mid, b)).abs() < 1e-12);
    }
}
