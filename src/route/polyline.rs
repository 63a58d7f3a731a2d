use crate::error::{AdvisorError, Result};
use crate::geometry::{distance_m, interpolate};
use crate::types::LatLon;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ROUTE_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable planned route
///
/// Cloning shares the vertex and distance buffers. A recalculated route is
/// a new `RoutePolyline` with a new id; nothing is ever mutated in place.
#[derive(Clone, Debug)]
pub struct RoutePolyline {
    id: u64,
    points: Arc<[LatLon]>,
    cumulative_m: Arc<[f64]>,
}

impl RoutePolyline {
    /// Build a route from its vertices
    ///
    /// # Errors
    /// `InvalidRoute` for an empty list or non-finite coordinates. A single
    /// vertex is accepted (degenerate but trackable).
    pub fn new(points: Vec<LatLon>) -> Result<Self> {
        if points.is_empty() {
            return Err(AdvisorError::InvalidRoute("route has no points".into()));
        }
        if let Some(bad) = points.iter().position(|p| !p.is_finite()) {
            return Err(AdvisorError::InvalidRoute(format!(
                "non-finite vertex at index {}",
                bad
            )));
        }

        let mut cumulative = Vec::with_capacity(points.len());
        let mut total = 0.0;
        cumulative.push(0.0);
        for pair in points.windows(2) {
            total += distance_m(pair[0], pair[1]);
            cumulative.push(total);
        }

        Ok(RoutePolyline {
            id: NEXT_ROUTE_ID.fetch_add(1, Ordering::Relaxed),
            points: points.into(),
            cumulative_m: cumulative.into(),
        })
    }

    /// Process-unique id, changes whenever the route is replaced
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn points(&self) -> &[LatLon] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false: construction rejects empty routes
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> Option<LatLon> {
        self.points.get(index).copied()
    }

    /// Cumulative distance from the first vertex to each vertex
    pub fn cumulative_m(&self) -> &[f64] {
        &self.cumulative_m
    }

    /// Along-route distance of a vertex (clamped to the last vertex)
    pub fn along_at_index(&self, index: usize) -> f64 {
        let last = self.cumulative_m.len() - 1;
        self.cumulative_m[index.min(last)]
    }

    pub fn total_length_m(&self) -> f64 {
        self.cumulative_m[self.cumulative_m.len() - 1]
    }

    pub fn start(&self) -> LatLon {
        self.points[0]
    }

    pub fn end(&self) -> LatLon {
        self.points[self.points.len() - 1]
    }

    /// Index of the segment `[i, i+1]` containing `along_m`
    ///
    /// Clamped to the first/last segment; 0 for a single-vertex route.
    pub fn segment_at(&self, along_m: f64) -> usize {
        if self.points.len() < 2 {
            return 0;
        }
        let last_segment = self.points.len() - 2;
        // First vertex strictly beyond along_m, minus one
        let upper = self.cumulative_m.partition_point(|&d| d <= along_m);
        upper.saturating_sub(1).min(last_segment)
    }

    /// Position at an along-route distance, clamped to the route ends
    pub fn interpolate_at(&self, along_m: f64) -> LatLon {
        if self.points.len() < 2 || along_m <= 0.0 {
            return self.start();
        }
        if along_m >= self.total_length_m() {
            return self.end();
        }

        let i = self.segment_at(along_m);
        let seg_start = self.cumulative_m[i];
        let seg_len = self.cumulative_m[i + 1] - seg_start;
        if seg_len <= f64::EPSILON {
            return self.points[i];
        }
        let t = ((along_m - seg_start) / seg_len).clamp(0.0, 1.0);
        interpolate(self.points[i], self.points[i + 1], t)
    }

    /// Parse a JSON array of `[lat, lon]` pairs
    pub fn from_json(json: &str) -> Result<Self> {
        let pairs: Vec<[f64; 2]> = serde_json::from_str(json)
            .map_err(|e| AdvisorError::InvalidRoute(format!("bad route JSON: {}", e)))?;
        Self::new(pairs.into_iter().map(|[lat, lon]| LatLon::new(lat, lon)).collect())
    }

    /// `[lat, lon]` pairs, the format `from_json` reads
    pub fn to_json(&self) -> String {
        let pairs: Vec<[f64; 2]> = self.points.iter().map(|p| [p.lat, p.lon]).collect();
        serde_json::to_string(&pairs).unwrap_or_else(|_| "[]".to_string())
    }

    /// Nearest vertex index to an along-route distance
    pub fn index_at(&self, along_m: f64) -> usize {
        if self.points.len() < 2 {
            return 0;
        }
        let i = self.segment_at(along_m);
        let to_start = (along_m - self.cumulative_m[i]).abs();
        let to_end = (self.cumulative_m[i + 1] - along_m).abs();
        if to_end < to_start {
            i + 1
        } else {
            i
        }
    }
}

impl PartialEq for RoutePolyline {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
