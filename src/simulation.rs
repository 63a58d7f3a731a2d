//! Synthetic routes and simulated fix playback
//!
//! Used by the CLI demo mode, the replay tool and tests.

use crate::error::Result;
use crate::geometry::{bearing_deg, destination_point};
use crate::route::RoutePolyline;
use crate::types::{GpsFix, LatLon};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Builds a route from straights and circular arcs
///
/// # Usage
/// ```no_run
/// use curve_advisor_rs::simulation::RouteBuilder;
/// use curve_advisor_rs::types::LatLon;
///
/// // 200 m north, then a 90° right turn of radius 20 m, then 300 m east
/// let points = RouteBuilder::new(LatLon::new(45.0, 7.0), 0.0)
///     .straight(200.0, 10.0)
///     .arc(20.0, 90.0, 5.0)
///     .straight(300.0, 10.0)
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct RouteBuilder {
    points: Vec<LatLon>,
    heading_deg: f64,
}

impl RouteBuilder {
    pub fn new(start: LatLon, heading_deg: f64) -> Self {
        RouteBuilder {
            points: vec![start],
            heading_deg,
        }
    }

    fn cursor(&self) -> LatLon {
        self.points[self.points.len() - 1]
    }

    /// Straight line on the current heading, one vertex every `step_m`
    pub fn straight(mut self, length_m: f64, step_m: f64) -> Self {
        let steps = (length_m / step_m.max(0.01)).ceil().max(1.0) as usize;
        let step = length_m / steps as f64;
        let start = self.cursor();
        for i in 1..=steps {
            self.points
                .push(destination_point(start, self.heading_deg, step * i as f64));
        }
        self
    }

    /// Circular arc; positive `angle_deg` turns right
    ///
    /// Vertices lie exactly on the circle, spaced about `step_m` along it.
    pub fn arc(mut self, radius_m: f64, angle_deg: f64, step_m: f64) -> Self {
        let arc_length = radius_m * angle_deg.to_radians().abs();
        let steps = (arc_length / step_m.max(0.01)).ceil().max(1.0) as usize;
        let step_angle = angle_deg / steps as f64;
        let chord = 2.0 * radius_m * (step_angle.to_radians().abs() / 2.0).sin();

        for _ in 0..steps {
            let chord_heading = self.heading_deg + step_angle / 2.0;
            let next = destination_point(self.cursor(), chord_heading, chord);
            self.points.push(next);
            self.heading_deg += step_angle;
        }
        self
    }

    /// Instant heading change at the current vertex (a polyline corner)
    pub fn turn(mut self, angle_deg: f64) -> Self {
        self.heading_deg += angle_deg;
        self
    }

    pub fn build(self) -> Vec<LatLon> {
        self.points
    }

    pub fn build_route(self) -> Result<RoutePolyline> {
        RoutePolyline::new(self.points)
    }
}

/// Fixes along a route at constant speed
///
/// Stands in for the GPS callback: positions are interpolated along the
/// route and displaced by bounded deterministic noise.
#[derive(Clone, Debug)]
pub struct RoutePlayback {
    route: RoutePolyline,
    speed_mps: f64,
    interval_ms: i64,
    noise_m: f64,
    rng: ChaCha8Rng,
    next_ms: i64,
}

impl RoutePlayback {
    pub fn new(route: RoutePolyline, speed_mps: f64, interval_ms: i64) -> Self {
        RoutePlayback {
            route,
            speed_mps,
            interval_ms: interval_ms.max(1),
            noise_m: 0.0,
            rng: ChaCha8Rng::seed_from_u64(0x5eed),
            next_ms: 0,
        }
    }

    /// Uniform position noise of at most `noise_m` per axis
    pub fn with_noise(mut self, noise_m: f64, seed: u64) -> Self {
        self.noise_m = noise_m.max(0.0);
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn route(&self) -> &RoutePolyline {
        &self.route
    }

    /// Noise-free position at a time
    pub fn true_position(&self, t_ms: i64) -> LatLon {
        self.route.interpolate_at(self.along_at(t_ms))
    }

    pub fn along_at(&self, t_ms: i64) -> f64 {
        self.speed_mps * t_ms.max(0) as f64 / 1000.0
    }

    pub fn is_finished(&self) -> bool {
        // Tolerance absorbs rounding in the cumulative route length
        self.along_at(self.next_ms) > self.route.total_length_m() + 1e-6
    }

    fn heading_at(&self, along_m: f64) -> Option<f64> {
        let i = self.route.segment_at(along_m);
        let (a, b) = (self.route.point(i)?, self.route.point(i + 1)?);
        Some(bearing_deg(a, b))
    }

    fn fix_at(&mut self, t_ms: i64) -> GpsFix {
        let along = self.along_at(t_ms).min(self.route.total_length_m());
        let mut position = self.route.interpolate_at(along);

        if self.noise_m > 0.0 {
            let north = (self.rng.gen::<f64>() * 2.0 - 1.0) * self.noise_m;
            let east = (self.rng.gen::<f64>() * 2.0 - 1.0) * self.noise_m;
            position = destination_point(destination_point(position, 0.0, north), 90.0, east);
        }

        GpsFix {
            position,
            speed_mps: Some(self.speed_mps),
            heading_deg: self.heading_at(along),
            timestamp_ms: t_ms,
            accuracy_m: Some(self.noise_m.max(3.0)),
        }
    }
}

impl Iterator for RoutePlayback {
    type Item = GpsFix;

    fn next(&mut self) -> Option<GpsFix> {
        if self.is_finished() {
            return None;
        }
        let fix = self.fix_at(self.next_ms);
        self.next_ms += self.interval_ms;
        Some(fix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{angle_diff_deg, distance_m};
    use approx::assert_abs_diff_eq;

    const ORIGIN: LatLon = LatLon {
        lat: 45.0,
        lon: 7.0,
    };

    #[test]
    fn test_straight_length_and_heading() {
        let points = RouteBuilder::new(ORIGIN, 90.0).straight(95.0, 10.0).build();
        assert_eq!(points.len(), 11);
        assert_abs_diff_eq!(distance_m(ORIGIN, points[10]), 95.0, epsilon = 0.01);
        assert_abs_diff_eq!(bearing_deg(ORIGIN, points[10]), 90.0, epsilon = 0.01);
    }

    #[test]
    fn test_arc_vertices_on_circle() {
        let points = RouteBuilder::new(ORIGIN, 0.0).arc(50.0, 90.0, 5.0).build();
        // Right turn heading north: centre lies 50 m east of the start
        let centre = destination_point(ORIGIN, 90.0, 50.0);
        for p in &points {
            assert_abs_diff_eq!(distance_m(centre, *p), 50.0, epsilon = 0.05);
        }
        let last = points[points.len() - 1];
        assert_abs_diff_eq!(angle_diff_deg(0.0, bearing_deg(centre, last)), 0.0, epsilon = 0.1);
    }

    #[test]
    fn test_playback_follows_route() {
        let route = RouteBuilder::new(ORIGIN, 0.0)
            .straight(100.0, 10.0)
            .build_route()
            .unwrap();
        let fixes: Vec<GpsFix> = RoutePlayback::new(route, 10.0, 1000).collect();

        assert_eq!(fixes.len(), 11);
        assert_eq!(fixes[3].timestamp_ms, 3000);
        assert_abs_diff_eq!(distance_m(ORIGIN, fixes[3].position), 30.0, epsilon = 0.05);
        assert_eq!(fixes[3].speed_mps, Some(10.0));
    }

    #[test]
    fn test_playback_noise_is_bounded_and_repeatable() {
        let route = RouteBuilder::new(ORIGIN, 45.0)
            .straight(500.0, 25.0)
            .build_route()
            .unwrap();
        let a: Vec<GpsFix> = RoutePlayback::new(route.clone(), 15.0, 1000)
            .with_noise(4.0, 7)
            .collect();
        let b: Vec<GpsFix> = RoutePlayback::new(route.clone(), 15.0, 1000)
            .with_noise(4.0, 7)
            .collect();

        let clean = RoutePlayback::new(route, 15.0, 1000);
        for (fa, fb) in a.iter().zip(&b) {
            assert_eq!(fa.position, fb.position);
            let offset = distance_m(fa.position, clean.true_position(fa.timestamp_ms));
            assert!(offset <= 4.0 * std::f64::consts::SQRT_2 + 0.01);
        }
    }
}
