use crate::geometry::{angle_diff_deg, bearing_deg, distance_m};
use crate::smoothing::smooth_positions;
use crate::types::LatLon;
use log::trace;

/// Segments shorter than this carry no usable bearing [m]
const MIN_SEGMENT_M: f64 = 0.01;

/// Triangle area below this fraction of the squared semi-perimeter is a line
const COLLINEAR_AREA_RATIO: f64 = 1e-6;

/// Single sharpest bearing change found by the discrete scan
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SharpTurn {
    pub index: usize,
    /// Signed bearing change at the vertex, positive = right
    pub angle_deg: f64,
    /// Along-route distance from the scan start vertex
    pub distance_m: f64,
}

/// Refined geometry of one curve, indices into the full route
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurveGeometry {
    pub start_index: usize,
    pub apex_index: usize,
    pub end_index: usize,
    pub length_m: f64,
    /// Circumradius through start, apex and end; infinite when collinear
    pub radius_m: f64,
    pub signed_angle_deg: f64,
}

/// Signed bearing change at every vertex (0 at both ends and across
/// duplicate vertices)
pub fn vertex_deltas(points: &[LatLon]) -> Vec<f64> {
    let mut deltas = vec![0.0; points.len()];
    for i in 1..points.len().saturating_sub(1) {
        let (prev, here, next) = (points[i - 1], points[i], points[i + 1]);
        if distance_m(prev, here) < MIN_SEGMENT_M || distance_m(here, next) < MIN_SEGMENT_M {
            continue;
        }
        deltas[i] = angle_diff_deg(bearing_deg(prev, here), bearing_deg(here, next));
    }
    deltas
}

/// Walk forward from `start_index` and keep the sharpest vertex
///
/// Only vertices within `max_distance_m` of the start vertex are
/// considered, and only deltas in `[min_angle_deg, max_angle_deg]`: larger
/// deltas are polyline doubling-back artefacts, not turns.
pub fn find_sharpest_turn(
    points: &[LatLon],
    start_index: usize,
    max_distance_m: f64,
    min_angle_deg: f64,
    max_angle_deg: f64,
) -> Option<SharpTurn> {
    if points.len() < 3 || start_index + 2 > points.len() {
        return None;
    }

    let mut best: Option<SharpTurn> = None;
    let mut travelled = 0.0;

    for i in (start_index + 1)..(points.len() - 1) {
        travelled += distance_m(points[i - 1], points[i]);
        if travelled > max_distance_m {
            break;
        }

        let incoming = distance_m(points[i - 1], points[i]);
        let outgoing = distance_m(points[i], points[i + 1]);
        if incoming < MIN_SEGMENT_M || outgoing < MIN_SEGMENT_M {
            continue;
        }

        let delta = angle_diff_deg(
            bearing_deg(points[i - 1], points[i]),
            bearing_deg(points[i], points[i + 1]),
        );
        let magnitude = delta.abs();
        if magnitude < min_angle_deg || magnitude > max_angle_deg {
            continue;
        }

        if best.map_or(true, |b| magnitude > b.angle_deg.abs()) {
            best = Some(SharpTurn {
                index: i,
                angle_deg: delta,
                distance_m: travelled,
            });
        }
    }

    best
}

/// Circumradius of a triangle from its side lengths (Heron)
///
/// `R = abc / (4·Area)`; zero area (collinear points) gives infinity.
pub fn circumradius(a: LatLon, b: LatLon, c: LatLon) -> f64 {
    let ab = distance_m(a, b);
    let bc = distance_m(b, c);
    let ca = distance_m(c, a);

    let s = (ab + bc + ca) / 2.0;
    let area = (s * (s - ab) * (s - bc) * (s - ca)).max(0.0).sqrt();
    // Rounding in the side lengths leaves collinear points with a sliver of area
    if area <= COLLINEAR_AREA_RATIO * s * s {
        return f64::INFINITY;
    }
    let radius = ab * bc * ca / (4.0 * area);
    if radius.is_finite() {
        radius
    } else {
        f64::INFINITY
    }
}

/// Refines a sharp-vertex candidate into start / apex / end geometry
#[derive(Clone, Debug)]
pub struct CurveAnalyzer {
    /// Moving-average window over route vertices
    pub smoothing_window: usize,
    /// Smoothed bearing delta that opens and closes a curve [deg]
    pub entry_threshold_deg: f64,
    /// Half-length of the analysed sub-path around the candidate [m]
    pub half_window_m: f64,
}

impl Default for CurveAnalyzer {
    fn default() -> Self {
        CurveAnalyzer {
            smoothing_window: 3,
            entry_threshold_deg: 3.0,
            half_window_m: 100.0,
        }
    }
}

impl CurveAnalyzer {
    /// Analyse the sub-path around `candidate_index`
    ///
    /// The sub-path is smoothed, start is the first vertex of the
    /// above-threshold run holding the candidate, end the last one before the
    /// delta falls back under the threshold (start when the run is a single
    /// vertex), apex the largest smoothed delta in between.
    ///
    /// # Returns
    /// `None` when the sub-path has fewer than three vertices or no smoothed
    /// delta crosses the entry threshold.
    pub fn analyze(
        &self,
        points: &[LatLon],
        cumulative_m: &[f64],
        candidate_index: usize,
    ) -> Option<CurveGeometry> {
        if points.len() < 3 || candidate_index >= points.len() {
            return None;
        }

        let centre = cumulative_m[candidate_index];
        let first = cumulative_m.partition_point(|&d| d < centre - self.half_window_m);
        let last = cumulative_m
            .partition_point(|&d| d <= centre + self.half_window_m)
            .saturating_sub(1)
            .max(candidate_index);
        let sub = &points[first..=last];
        if sub.len() < 3 {
            return None;
        }

        let smoothed = smooth_positions(sub, self.smoothing_window);
        let deltas = vertex_deltas(&smoothed);

        // Seed on the above-threshold vertex nearest the candidate, then grow
        // the run both ways until the delta drops back under the threshold
        let threshold = self.entry_threshold_deg;
        let local_candidate = candidate_index - first;
        let seed = (0..deltas.len())
            .filter(|&j| deltas[j].abs() > threshold)
            .min_by_key(|&j| j.abs_diff(local_candidate))?;

        let mut start = seed;
        while start > 0 && deltas[start - 1].abs() > threshold {
            start -= 1;
        }
        let mut end = seed;
        while end + 1 < deltas.len() && deltas[end + 1].abs() > threshold {
            end += 1;
        }

        // First maximum wins on ties
        let mut apex = start;
        for j in start..=end {
            if deltas[j].abs() > deltas[apex].abs() {
                apex = j;
            }
        }

        let original_deltas = vertex_deltas(sub);
        let signed_angle_deg: f64 = original_deltas[start..=end].iter().sum();
        let length_m: f64 = sub[start..=end]
            .windows(2)
            .map(|pair| distance_m(pair[0], pair[1]))
            .sum();

        // Radius from the original vertices; an apex on an endpoint can't
        // span a triangle, so fall back to the middle vertex
        let radius_vertex = if apex > start && apex < end {
            apex
        } else {
            (start + end) / 2
        };
        let radius_m = circumradius(sub[start], sub[radius_vertex], sub[end]);

        trace!(
            "Curve around {}: start={} apex={} end={} R={:.1} angle={:.1}",
            candidate_index,
            first + start,
            first + apex,
            first + end,
            radius_m,
            signed_angle_deg
        );

        Some(CurveGeometry {
            start_index: first + start,
            apex_index: first + apex,
            end_index: first + end,
            length_m,
            radius_m,
            signed_angle_deg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::destination_point;
    use crate::route::RoutePolyline;
    use crate::simulation::RouteBuilder;

    const ORIGIN: LatLon = LatLon {
        lat: 46.0,
        lon: 8.0,
    };

    #[test]
    fn test_collinear_radius_is_infinite() {
        let a = ORIGIN;
        let b = destination_point(ORIGIN, 30.0, 50.0);
        let c = destination_point(ORIGIN, 30.0, 100.0);
        assert!(circumradius(a, b, c).is_infinite());
        assert!(circumradius(a, a, c).is_infinite());
    }

    #[test]
    fn test_arc_radius_within_ten_percent() {
        // 90° right arc of R = 50 m sampled every 5°
        let points = RouteBuilder::new(ORIGIN, 0.0)
            .straight(100.0, 5.0)
            .arc(50.0, 90.0, 50.0 * 5f64.to_radians())
            .straight(100.0, 5.0)
            .build();
        let route = RoutePolyline::new(points).unwrap();

        let mid = route.index_at(100.0 + 50.0 * 45f64.to_radians());
        let geometry = CurveAnalyzer::default()
            .analyze(route.points(), route.cumulative_m(), mid)
            .unwrap();

        assert!(
            (geometry.radius_m - 50.0).abs() < 5.0,
            "radius {:.1} should be ~50 m",
            geometry.radius_m
        );
        assert!((geometry.signed_angle_deg - 90.0).abs() < 10.0);
        assert!(geometry.start_index < mid && mid < geometry.end_index);
        assert!(geometry.start_index <= geometry.apex_index && geometry.apex_index <= geometry.end_index);
    }

    #[test]
    fn test_straight_has_no_curve() {
        let points = RouteBuilder::new(ORIGIN, 45.0).straight(300.0, 10.0).build();
        let route = RoutePolyline::new(points).unwrap();
        assert!(CurveAnalyzer::default()
            .analyze(route.points(), route.cumulative_m(), 15)
            .is_none());
        assert!(find_sharpest_turn(route.points(), 0, 500.0, 10.0, 175.0).is_none());
    }

    #[test]
    fn test_sharpest_turn_respects_bounds() {
        let points = RouteBuilder::new(ORIGIN, 0.0)
            .straight(50.0, 50.0)
            .turn(30.0)
            .straight(50.0, 50.0)
            .turn(-80.0)
            .straight(50.0, 50.0)
            .turn(179.0)
            .straight(50.0, 50.0)
            .build();

        // 179° doubling back is ignored by maxTurnAngle
        let sharpest = find_sharpest_turn(&points, 0, 1000.0, 10.0, 175.0).unwrap();
        assert_eq!(sharpest.index, 2);
        assert!((sharpest.angle_deg + 80.0).abs() < 0.5);
        assert!((sharpest.distance_m - 100.0).abs() < 0.5);

        // Window too short to reach the second vertex
        let near = find_sharpest_turn(&points, 0, 60.0, 10.0, 175.0).unwrap();
        assert_eq!(near.index, 1);
    }
}
