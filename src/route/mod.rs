pub mod deviation;
pub mod polyline;
pub mod tracker;

pub use deviation::{DeviationCheck, DeviationDecision, DeviationManager, HoldReason};
pub use polyline::RoutePolyline;
pub use tracker::{
    distance_to_adjacent_segments, distance_to_segment, find_closest_point_on_route,
    is_off_route, ClosestPoint, RoutePosition, RouteTracker,
};
