use super::RouteProvider;
use crate::error::{AdvisorError, Result};
use crate::route::RoutePolyline;
use crate::types::LatLon;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::debug;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
    #[serde(default)]
    distance: f64,
}

/// GeoJSON LineString, coordinates are `[lon, lat]`
#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

/// Turn an OSRM `route` service response into a polyline
///
/// Only the first route is used. Fewer than two coordinates is a routing
/// failure, not a degenerate route.
pub fn parse_osrm_response(body: &str) -> Result<RoutePolyline> {
    let response: OsrmResponse = serde_json::from_str(body)
        .map_err(|e| AdvisorError::RoutingFailure(format!("Malformed OSRM response: {}", e)))?;

    if response.code != "Ok" {
        return Err(AdvisorError::RoutingFailure(format!(
            "OSRM returned {}: {}",
            response.code,
            response.message.unwrap_or_default()
        )));
    }

    let route = response
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| AdvisorError::RoutingFailure("OSRM returned no route".to_string()))?;

    let points: Vec<LatLon> = route
        .geometry
        .coordinates
        .iter()
        .map(|[lon, lat]| LatLon::new(*lat, *lon))
        .collect();
    if points.len() < 2 {
        return Err(AdvisorError::RoutingFailure(format!(
            "Route has {} point(s), need at least 2",
            points.len()
        )));
    }

    debug!("OSRM route: {} points, {:.0} m", points.len(), route.distance);
    RoutePolyline::new(points)
}

/// Routing through an OSRM HTTP server
#[derive(Clone, Debug)]
pub struct OsrmRouteProvider {
    client: reqwest::Client,
    base_url: String,
    profile: String,
}

impl OsrmRouteProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("curve_advisor_rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        OsrmRouteProvider {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            profile: "driving".to_string(),
        }
    }

    /// Public demo server, fine for development only
    pub fn public_demo() -> Self {
        Self::new("https://router.project-osrm.org")
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn route_url(&self, origin: LatLon, destination: LatLon) -> String {
        format!(
            "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?overview=full&geometries=geojson",
            self.base_url,
            self.profile,
            origin.lon,
            origin.lat,
            destination.lon,
            destination.lat
        )
    }

    pub async fn fetch_route(&self, origin: LatLon, destination: LatLon) -> Result<RoutePolyline> {
        let failure = |e: reqwest::Error| AdvisorError::RoutingFailure(e.to_string());

        let response = self
            .client
            .get(self.route_url(origin, destination))
            .send()
            .await
            .map_err(failure)?;

        // OSRM puts the reason in the body of 400 responses too
        let status = response.status();
        let body = response.text().await.map_err(failure)?;
        if !status.is_success() && !body.trim_start().starts_with('{') {
            return Err(AdvisorError::RoutingFailure(format!("HTTP error: {}", status.as_u16())));
        }
        parse_osrm_response(&body)
    }
}

impl RouteProvider for OsrmRouteProvider {
    fn get_route(&self, origin: LatLon, destination: LatLon) -> BoxFuture<'static, Result<RoutePolyline>> {
        let provider = self.clone();
        async move { provider.fetch_route(origin, destination).await }.boxed()
    }
}
