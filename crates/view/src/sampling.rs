//! Sampling positions along a line drawn on an image.
//!
//! Equal pixel steps are equal angular steps only while the projection is
//! close to linear over the line. When the angular spacing at the midpoint
//! drifts by more than the tolerance, samples are taken at a fixed angular
//! increment along the great circle instead and mapped back to pixels.

use crate::world::{angular_separation, great_circle_point};
use crate::{Point2D, WorldCoordinateSystem, add_2d, scale_2d, subtract_2d};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingMode {
    PixelStep,
    /// Radians between consecutive samples.
    FixedAngularIncrement { increment: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineSamples {
    pub mode: SamplingMode,
    pub points: Vec<Point2D>,
}

pub fn sample_line(
    start: Point2D,
    end: Point2D,
    wcs: Option<&dyn WorldCoordinateSystem>,
    tolerance: f64,
) -> LineSamples {
    let delta = subtract_2d(end, start);
    let length = (delta.x * delta.x + delta.y * delta.y).sqrt();
    let steps = (length.ceil() as usize).max(1);

    let mode = wcs
        .and_then(|wcs| angular_mode(start, end, wcs, steps, tolerance))
        .unwrap_or(SamplingMode::PixelStep);
    let (SamplingMode::FixedAngularIncrement { .. }, Some(wcs)) = (mode, wcs) else {
        return pixel_step_samples(start, delta, steps);
    };
    let (Some(world_start), Some(world_end)) =
        (wcs.pixel_to_world(start), wcs.pixel_to_world(end))
    else {
        return pixel_step_samples(start, delta, steps);
    };
    let points = (0..=steps)
        .filter_map(|i| {
            let t = i as f64 / steps as f64;
            wcs.world_to_pixel(great_circle_point(world_start, world_end, t))
        })
        .collect();
    LineSamples { mode, points }
}

fn angular_mode(
    start: Point2D,
    end: Point2D,
    wcs: &dyn WorldCoordinateSystem,
    steps: usize,
    tolerance: f64,
) -> Option<SamplingMode> {
    let middle = add_2d(start, scale_2d(subtract_2d(end, start), 0.5));
    let world_start = wcs.pixel_to_world(start)?;
    let world_middle = wcs.pixel_to_world(middle)?;
    let world_end = wcs.pixel_to_world(end)?;

    let total = angular_separation(world_start, world_end);
    if total <= f64::EPSILON {
        return Some(SamplingMode::PixelStep);
    }
    let first_half = angular_separation(world_start, world_middle);
    let second_half = angular_separation(world_middle, world_end);
    let distortion = (first_half - second_half).abs() / total;
    if distortion <= tolerance {
        Some(SamplingMode::PixelStep)
    } else {
        Some(SamplingMode::FixedAngularIncrement {
            increment: total / steps as f64,
        })
    }
}

fn pixel_step_samples(start: Point2D, delta: Point2D, steps: usize) -> LineSamples {
    let points = (0..=steps)
        .map(|i| add_2d(start, scale_2d(delta, i as f64 / steps as f64)))
        .collect();
    LineSamples {
        mode: SamplingMode::PixelStep,
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GnomonicProjection, WorldPoint};

    fn wide_field() -> GnomonicProjection {
        let degree = 1.0f64.to_radians();
        GnomonicProjection::new(
            Point2D::new(0.0, 0.0),
            WorldPoint::from_degrees(0.0, 0.0),
            (-degree, degree),
        )
        .unwrap()
    }

    fn narrow_field() -> GnomonicProjection {
        let arcsec = (1.0f64 / 3600.0).to_radians();
        GnomonicProjection::new(
            Point2D::new(0.0, 0.0),
            WorldPoint::from_degrees(0.0, 0.0),
            (-arcsec, arcsec),
        )
        .unwrap()
    }

    #[test]
    fn without_wcs_samples_every_pixel() {
        let samples = sample_line(Point2D::new(0.0, 0.0), Point2D::new(3.0, 4.0), None, 0.01);
        assert_eq!(samples.mode, SamplingMode::PixelStep);
        assert_eq!(samples.points.len(), 6);
        assert_eq!(samples.points[5], Point2D::new(3.0, 4.0));
    }

    #[test]
    fn narrow_field_keeps_pixel_steps() {
        let wcs = narrow_field();
        let samples = sample_line(
            Point2D::new(0.0, 0.0),
            Point2D::new(80.0, 0.0),
            Some(&wcs),
            0.01,
        );
        assert_eq!(samples.mode, SamplingMode::PixelStep);
        assert_eq!(samples.points.len(), 81);
    }

    #[test]
    fn distorted_line_uses_fixed_angular_increment() {
        let wcs = wide_field();
        let samples = sample_line(
            Point2D::new(0.0, 0.0),
            Point2D::new(80.0, 0.0),
            Some(&wcs),
            0.01,
        );
        let SamplingMode::FixedAngularIncrement { increment } = samples.mode else {
            panic!("expected angular sampling, got {:?}", samples.mode);
        };
        assert_eq!(samples.points.len(), 81);

        let worlds: Vec<_> = samples
            .points
            .iter()
            .map(|p| wcs.pixel_to_world(*p).unwrap())
            .collect();
        for pair in worlds.windows(2) {
            let step = angular_separation(pair[0], pair[1]);
            assert!((step - increment).abs() < 1e-9);
        }
        let last = samples.points.last().unwrap();
        assert!((last.x - 80.0).abs() < 1e-6);
    }
}
