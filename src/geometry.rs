//! Geometry primitives shared by the estimator, tracker and detectors
//!
//! All bearings are in degrees, 0 = North, clockwise. Local planar
//! coordinates are metres East (x) and North (y) of a projection origin.

use crate::types::LatLon;
use geo::HaversineDistance;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters
pub fn distance_m(a: LatLon, b: LatLon) -> f64 {
    a.to_point().haversine_distance(&b.to_point())
}

/// Initial bearing from `a` to `b` in degrees [0, 360)
pub fn bearing_deg(a: LatLon, b: LatLon) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lon = (b.lon - a.lon).to_radians();

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

    normalize_deg(y.atan2(x).to_degrees())
}

/// Wrap any angle into [0, 360)
pub fn normalize_deg(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can return 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed difference `to - from` in (-180, 180]; positive = clockwise (right)
pub fn angle_diff_deg(from: f64, to: f64) -> f64 {
    let mut diff = (to - from).rem_euclid(360.0);
    if diff > 180.0 {
        diff -= 360.0;
    }
    diff
}

/// Signed difference in radians, wrapped to (-π, π]
pub fn angle_diff_rad(from: f64, to: f64) -> f64 {
    angle_diff_deg(from.to_degrees(), to.to_degrees()).to_radians()
}

/// Point reached travelling `distance_m` from `origin` on initial bearing `bearing`
pub fn destination_point(origin: LatLon, bearing: f64, distance_m: f64) -> LatLon {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing.to_radians();
    let lat1 = origin.lat.to_radians();
    let lon1 = origin.lon.to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    LatLon::new(lat2.to_degrees(), lon2.to_degrees())
}

/// Linear interpolation between two nearby positions, `t` in [0, 1]
pub fn interpolate(a: LatLon, b: LatLon, t: f64) -> LatLon {
    LatLon::new(a.lat + (b.lat - a.lat) * t, a.lon + (b.lon - a.lon) * t)
}

/// Equirectangular projection around an origin
///
/// Accurate to well under a metre within ~10 km of the origin, which is
/// why the estimator rebases its origin beyond that radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalProjection {
    origin: LatLon,
    cos_lat: f64,
}

impl LocalProjection {
    pub fn new(origin: LatLon) -> Self {
        LocalProjection {
            origin,
            cos_lat: origin.lat.to_radians().cos(),
        }
    }

    /// (east, north) in meters relative to the origin
    pub fn to_local(&self, position: LatLon) -> (f64, f64) {
        let d_lat = (position.lat - self.origin.lat).to_radians();
        let d_lon = (position.lon - self.origin.lon).to_radians();
        let x = EARTH_RADIUS_M * d_lon * self.cos_lat;
        let y = EARTH_RADIUS_M * d_lat;
        (x, y)
    }

    pub fn to_latlon(&self, x: f64, y: f64) -> LatLon {
        let d_lat = y / EARTH_RADIUS_M;
        let d_lon = x / (EARTH_RADIUS_M * self.cos_lat);
        LatLon::new(
            self.origin.lat + d_lat.to_degrees(),
            self.origin.lon + d_lon.to_degrees(),
        )
    }
}

/// Heading of a planar (east, north) vector in degrees [0, 360)
pub fn heading_from_components(east: f64, north: f64) -> f64 {
    normalize_deg(east.atan2(north).to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = LatLon::new(0.0, 0.0);
        assert_abs_diff_eq!(bearing_deg(origin, LatLon::new(1.0, 0.0)), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(bearing_deg(origin, LatLon::new(0.0, 1.0)), 90.0, epsilon = 1e-6);
        assert_abs_diff_eq!(bearing_deg(origin, LatLon::new(-1.0, 0.0)), 180.0, epsilon = 1e-6);
        assert_abs_diff_eq!(bearing_deg(origin, LatLon::new(0.0, -1.0)), 270.0, epsilon = 1e-6);
    }

    #[test]
    fn test_angle_diff_wraps() {
        assert_abs_diff_eq!(angle_diff_deg(350.0, 10.0), 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(angle_diff_deg(10.0, 350.0), -20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(angle_diff_deg(0.0, 180.0), 180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(angle_diff_deg(90.0, 0.0), -90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_destination_round_trip_distance() {
        let origin = LatLon::new(48.137, 11.575);
        let dest = destination_point(origin, 45.0, 1000.0);
        assert_abs_diff_eq!(distance_m(origin, dest), 1000.0, epsilon = 1.0);
        assert_abs_diff_eq!(bearing_deg(origin, dest), 45.0, epsilon = 0.1);
    }

    #[test]
    fn test_local_projection_matches_haversine() {
        let origin = LatLon::new(45.0, 7.0);
        let proj = LocalProjection::new(origin);
        let p = destination_point(origin, 120.0, 2500.0);

        let (x, y) = proj.to_local(p);
        assert_abs_diff_eq!(x.hypot(y), 2500.0, epsilon = 5.0);

        let back = proj.to_latlon(x, y);
        assert_abs_diff_eq!(back.lat, p.lat, epsilon = 1e-9);
        assert_abs_diff_eq!(back.lon, p.lon, epsilon = 1e-9);
    }

    #[test]
    fn test_heading_from_components() {
        assert_abs_diff_eq!(heading_from_components(0.0, 1.0), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(heading_from_components(1.0, 0.0), 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(heading_from_components(-1.0, 0.0), 270.0, epsilon = 1e-9);
    }
}
