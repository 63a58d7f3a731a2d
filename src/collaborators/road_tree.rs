use super::osm_parser::RoadSegment;
use crate::route::distance_to_segment;
use crate::types::LatLon;
use rstar::{RTree, RTreeObject, AABB};

/// Metres per degree of latitude
const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Road segment with its bounding box cached for the R-tree
#[derive(Clone, Debug)]
pub struct SpatialRoadSegment {
    pub segment: RoadSegment,
    pub envelope: AABB<[f64; 2]>,
}

impl RTreeObject for SpatialRoadSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree of road segments for "which road am I on" queries
///
/// # Usage
/// ```no_run
/// use curve_advisor_rs::collaborators::RoadTree;
/// use curve_advisor_rs::types::LatLon;
///
/// let tree = RoadTree::from_segments(vec![/* ... */]);
/// let on_road = tree.nearest(LatLon::new(37.7749, -122.4194), 25.0).is_some();
/// ```
#[derive(Debug)]
pub struct RoadTree {
    tree: RTree<SpatialRoadSegment>,
}

impl RoadTree {
    pub fn new() -> Self {
        RoadTree { tree: RTree::new() }
    }

    /// Bulk-load an index from parsed segments
    pub fn from_segments(segments: Vec<RoadSegment>) -> Self {
        let spatial_segments: Vec<SpatialRoadSegment> = segments
            .into_iter()
            .map(|segment| SpatialRoadSegment {
                envelope: compute_envelope(&segment),
                segment,
            })
            .collect();

        RoadTree {
            tree: RTree::bulk_load(spatial_segments),
        }
    }

    pub fn insert(&mut self, segment: RoadSegment) {
        self.tree.insert(SpatialRoadSegment {
            envelope: compute_envelope(&segment),
            segment,
        });
    }

    pub fn segment_count(&self) -> usize {
        self.tree.size()
    }

    /// Segments within `max_distance_m` of `point`, nearest first
    ///
    /// # Arguments
    /// * `point` - Query position
    /// * `max_distance_m` - Search radius in meters
    ///
    /// # Returns
    /// `(segment, distance_m)` pairs sorted by distance
    pub fn nearest_segments(&self, point: LatLon, max_distance_m: f64) -> Vec<(&RoadSegment, f64)> {
        let lat_deg = max_distance_m / METERS_PER_DEG_LAT;
        let lon_deg = max_distance_m / (METERS_PER_DEG_LAT * point.lat.to_radians().cos().max(0.01));
        let envelope = AABB::from_corners(
            [point.lon - lon_deg, point.lat - lat_deg],
            [point.lon + lon_deg, point.lat + lat_deg],
        );

        let mut candidates: Vec<(&RoadSegment, f64)> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|spatial| (&spatial.segment, point_to_segment_distance(point, &spatial.segment)))
            .filter(|(_, dist)| *dist <= max_distance_m)
            .collect();

        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
        candidates
    }

    /// Closest segment within `max_distance_m`
    pub fn nearest(&self, point: LatLon, max_distance_m: f64) -> Option<(&RoadSegment, f64)> {
        self.nearest_segments(point, max_distance_m).into_iter().next()
    }
}

impl Default for RoadTree {
    fn default() -> Self {
        Self::new()
    }
}

fn compute_envelope(segment: &RoadSegment) -> AABB<[f64; 2]> {
    let mut min = [f64::INFINITY, f64::INFINITY];
    let mut max = [f64::NEG_INFINITY, f64::NEG_INFINITY];
    for coord in segment.geometry.coords() {
        min = [min[0].min(coord.x), min[1].min(coord.y)];
        max = [max[0].max(coord.x), max[1].max(coord.y)];
    }
    if !min[0].is_finite() {
        return AABB::from_corners([0.0, 0.0], [0.0, 0.0]);
    }
    AABB::from_corners(min, max)
}

/// Perpendicular distance to the closest piece of the way [m]
fn point_to_segment_distance(point: LatLon, segment: &RoadSegment) -> f64 {
    let vertices: Vec<LatLon> = segment.vertices().collect();
    vertices
        .windows(2)
        .map(|pair| distance_to_segment(point, pair[0], pair[1]))
        .fold(f64::INFINITY, f64::min)
}
