//! External collaborators: routing and road attributes
//!
//! Both are consumed through object-safe traits whose futures are `'static`
//! so the runtime can spawn a request and keep ticking while it is in
//! flight.

pub mod cache;
pub mod osm_parser;
pub mod osrm;
pub mod overpass;
pub mod road_tree;

pub use cache::{RoadAttributeCache, RoadAttributes};
pub use osm_parser::{parse_maxspeed, parse_osm_json, RoadClass, RoadSegment};
pub use osrm::OsrmRouteProvider;
pub use overpass::{OverpassConfig, OverpassRoadProvider, RoadMatch};
pub use road_tree::RoadTree;

use crate::error::{AdvisorError, ProviderError, Result};
use crate::route::RoutePolyline;
use crate::types::LatLon;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub trait RouteProvider: Send + Sync {
    /// Route from origin to destination
    ///
    /// Fails with `RoutingFailure` when fewer than two points come back.
    fn get_route(&self, origin: LatLon, destination: LatLon) -> BoxFuture<'static, Result<RoutePolyline>>;
}

pub trait RoadAttributeProvider: Send + Sync {
    /// Posted speed limit in km/h, `None` when the road has none
    fn speed_limit(&self, position: LatLon) -> BoxFuture<'static, std::result::Result<Option<f64>, ProviderError>>;

    fn is_on_road(&self, position: LatLon) -> BoxFuture<'static, std::result::Result<bool, ProviderError>>;
}

/// Always answers with the same route
///
/// Used by simulation and tests; counts requests so a test can assert how
/// many reroutes were asked for.
#[derive(Debug, Default)]
pub struct StaticRouteProvider {
    points: Vec<LatLon>,
    requests: Arc<AtomicU64>,
}

impl StaticRouteProvider {
    pub fn new(points: Vec<LatLon>) -> Self {
        StaticRouteProvider {
            points,
            requests: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Every request fails with `RoutingFailure`
    pub fn failing() -> Self {
        Self::new(Vec::new())
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Shared request counter, still readable after the provider is moved
    pub fn request_counter(&self) -> Arc<AtomicU64> {
        self.requests.clone()
    }
}

impl RouteProvider for StaticRouteProvider {
    fn get_route(&self, _origin: LatLon, _destination: LatLon) -> BoxFuture<'static, Result<RoutePolyline>> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let result = if self.points.len() < 2 {
            Err(AdvisorError::RoutingFailure(format!(
                "Route has {} point(s), need at least 2",
                self.points.len()
            )))
        } else {
            RoutePolyline::new(self.points.clone())
        };
        future::ready(result).boxed()
    }
}

/// Fixed road attributes, optionally failing every lookup
#[derive(Clone, Debug)]
pub struct StaticRoadProvider {
    pub speed_limit_kmh: Option<f64>,
    pub on_road: bool,
    pub failure: Option<ProviderError>,
}

impl StaticRoadProvider {
    pub fn new(speed_limit_kmh: Option<f64>, on_road: bool) -> Self {
        StaticRoadProvider {
            speed_limit_kmh,
            on_road,
            failure: None,
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        StaticRoadProvider {
            speed_limit_kmh: None,
            on_road: false,
            failure: Some(error),
        }
    }
}

impl Default for StaticRoadProvider {
    fn default() -> Self {
        Self::new(None, true)
    }
}

impl RoadAttributeProvider for StaticRoadProvider {
    fn speed_limit(&self, _position: LatLon) -> BoxFuture<'static, std::result::Result<Option<f64>, ProviderError>> {
        let result = match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(self.speed_limit_kmh),
        };
        future::ready(result).boxed()
    }

    fn is_on_road(&self, _position: LatLon) -> BoxFuture<'static, std::result::Result<bool, ProviderError>> {
        let result = match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(self.on_road),
        };
        future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_route_provider() {
        let points = vec![LatLon::new(45.0, 7.0), LatLon::new(45.001, 7.0)];
        let provider = StaticRouteProvider::new(points);
        let origin = LatLon::new(45.0, 7.0);

        let route = provider.get_route(origin, origin).await.unwrap();
        assert_eq!(route.len(), 2);
        assert_eq!(provider.requests(), 1);

        let failing = StaticRouteProvider::new(vec![origin]);
        assert!(matches!(
            failing.get_route(origin, origin).await,
            Err(AdvisorError::RoutingFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_static_road_provider() {
        let position = LatLon::new(45.0, 7.0);
        let provider = StaticRoadProvider::new(Some(80.0), true);
        assert_eq!(provider.speed_limit(position).await, Ok(Some(80.0)));
        assert_eq!(provider.is_on_road(position).await, Ok(true));

        let failing = StaticRoadProvider::failing(ProviderError::RateLimited);
        assert_eq!(failing.is_on_road(position).await, Err(ProviderError::RateLimited));
    }
}
