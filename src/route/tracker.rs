use super::polyline::RoutePolyline;
use crate::geometry::{distance_m, LocalProjection};
use crate::types::LatLon;

/// Nearest route vertex to a position
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClosestPoint {
    pub index: usize,
    pub distance_m: f64,
}

/// Where the vehicle is on the route
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoutePosition {
    /// Nearest vertex
    pub index: usize,
    /// Distance to that vertex
    pub vertex_distance_m: f64,
    /// Perpendicular distance to the nearer adjacent segment
    pub segment_distance_m: f64,
    /// Cumulative distance from the route start to the projected point
    pub along_route_m: f64,
}

/// Linear scan for the nearest vertex
///
/// Ties resolve to the first vertex at the minimal distance, so a route
/// that passes the same place twice tracks the earlier pass.
///
/// # Returns
/// `None` only for an empty slice
pub fn find_closest_point_on_route(position: LatLon, points: &[LatLon]) -> Option<ClosestPoint> {
    let mut best: Option<ClosestPoint> = None;
    for (index, point) in points.iter().enumerate() {
        let d = distance_m(position, *point);
        match best {
            Some(b) if d >= b.distance_m => {}
            _ => best = Some(ClosestPoint { index, distance_m: d }),
        }
    }
    best
}

pub fn is_off_route(distance_m: f64, max_deviation_m: f64) -> bool {
    distance_m > max_deviation_m
}

/// Perpendicular distance from `p` to segment `a`-`b` and the clamped
/// projection parameter `t` in [0, 1]
fn project_onto_segment(p: LatLon, a: LatLon, b: LatLon) -> (f64, f64) {
    let projection = LocalProjection::new(p);
    let (ax, ay) = projection.to_local(a);
    let (bx, by) = projection.to_local(b);

    let dx = bx - ax;
    let dy = by - ay;
    let len_sq = dx * dx + dy * dy;

    // Degenerate segment (duplicate vertices)
    if len_sq < 1e-12 {
        return (ax.hypot(ay), 0.0);
    }

    // p is the projection origin, so the vector a->p is (-ax, -ay)
    let t = ((-ax * dx - ay * dy) / len_sq).clamp(0.0, 1.0);
    let cx = ax + t * dx;
    let cy = ay + t * dy;
    (cx.hypot(cy), t)
}

/// Distance from a point to a segment, clamped to the segment ends
pub fn distance_to_segment(p: LatLon, a: LatLon, b: LatLon) -> f64 {
    project_onto_segment(p, a, b).0
}

/// Minimum distance to the segments on either side of vertex `index`
///
/// Falls back to the vertex distance for a single-vertex route.
pub fn distance_to_adjacent_segments(position: LatLon, points: &[LatLon], index: usize) -> f64 {
    adjacent_projection(position, points, index)
        .map(|(distance, _, _)| distance)
        .unwrap_or_else(|| {
            points
                .get(index)
                .map_or(f64::INFINITY, |v| distance_m(position, *v))
        })
}

/// Best adjacent segment: (distance, segment start index, t)
fn adjacent_projection(
    position: LatLon,
    points: &[LatLon],
    index: usize,
) -> Option<(f64, usize, f64)> {
    let mut best: Option<(f64, usize, f64)> = None;

    let candidates = [index.checked_sub(1), Some(index)];
    for start in candidates.into_iter().flatten() {
        if start + 1 >= points.len() {
            continue;
        }
        let (d, t) = project_onto_segment(position, points[start], points[start + 1]);
        if best.map_or(true, |(bd, _, _)| d < bd) {
            best = Some((d, start, t));
        }
    }
    best
}

/// Locates the vehicle on one route
#[derive(Clone, Debug)]
pub struct RouteTracker {
    route: RoutePolyline,
}

impl RouteTracker {
    pub fn new(route: RoutePolyline) -> Self {
        RouteTracker { route }
    }

    pub fn route(&self) -> &RoutePolyline {
        &self.route
    }

    /// Project a position onto the route
    pub fn locate(&self, position: LatLon) -> RoutePosition {
        let points = self.route.points();
        let closest = find_closest_point_on_route(position, points).unwrap_or(ClosestPoint {
            index: 0,
            distance_m: distance_m(position, self.route.start()),
        });

        match adjacent_projection(position, points, closest.index) {
            Some((segment_distance_m, start, t)) => {
                let seg_start = self.route.along_at_index(start);
                let seg_len = self.route.along_at_index(start + 1) - seg_start;
                RoutePosition {
                    index: closest.index,
                    vertex_distance_m: closest.distance_m,
                    segment_distance_m,
                    along_route_m: seg_start + t * seg_len,
                }
            }
            None => RoutePosition {
                index: closest.index,
                vertex_distance_m: closest.distance_m,
                segment_distance_m: closest.distance_m,
                along_route_m: self.route.along_at_index(closest.index),
            },
        }
    }
}
