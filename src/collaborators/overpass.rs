use super::osm_parser::{parse_osm_json, RoadClass};
use super::road_tree::RoadTree;
use super::RoadAttributeProvider;
use crate::error::ProviderError;
use crate::geometry::distance_m;
use crate::types::LatLon;
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const MAX_RETRIES: u32 = 3;

#[derive(Clone, Debug)]
pub struct OverpassConfig {
    pub base_url: String,
    /// Radius of the area fetched around the query point [m]
    pub fetch_radius_m: f64,
    /// A road further than this from the vehicle doesn't count [m]
    pub match_radius_m: f64,
    pub timeout_secs: u64,
    pub min_interval: Duration,
}

impl Default for OverpassConfig {
    fn default() -> Self {
        OverpassConfig {
            base_url: "https://overpass-api.de/api/interpreter".to_string(),
            fetch_radius_m: 500.0,
            match_radius_m: 25.0,
            timeout_secs: 30,
            min_interval: Duration::from_secs(1),
        }
    }
}

/// Minimum spacing between Overpass requests
struct RateLimit {
    last_request: Instant,
    min_interval: Duration,
}

impl RateLimit {
    fn new(min_interval: Duration) -> Self {
        RateLimit {
            last_request: Instant::now()
                .checked_sub(min_interval)
                .unwrap_or_else(Instant::now),
            min_interval,
        }
    }

    /// Time left before the next request may go out
    fn remaining(&self) -> Duration {
        self.min_interval.saturating_sub(self.last_request.elapsed())
    }
}

/// Roads fetched around one query point
struct FetchedArea {
    center: LatLon,
    radius_m: f64,
    tree: RoadTree,
}

impl FetchedArea {
    /// True while a match radius around `position` stays inside the area
    fn covers(&self, position: LatLon, margin_m: f64) -> bool {
        distance_m(self.center, position) + margin_m <= self.radius_m
    }
}

struct OverpassState {
    rate_limit: RateLimit,
    area: Option<FetchedArea>,
}

/// Road the vehicle is on, as seen in OSM
#[derive(Clone, Debug, PartialEq)]
pub struct RoadMatch {
    pub way_id: u64,
    pub road_class: RoadClass,
    pub name: Option<String>,
    pub max_speed_kmh: Option<f64>,
    pub distance_m: f64,
}

/// Road attributes from the Overpass API
///
/// # Rate Limiting
/// - Minimum 1 second between requests
/// - Overpass runtime timeouts retry up to 3 times with backoff (1s, 2s, 4s)
/// - HTTP 429 is reported as `RateLimited`; the caller's cache absorbs it
///
/// # Area reuse
/// One `around:` query fetches every drivable way within `fetch_radius_m`.
/// Lookups are answered from that R-tree until the vehicle gets within
/// `match_radius_m` of the fetched area's edge.
#[derive(Clone)]
pub struct OverpassRoadProvider {
    client: reqwest::Client,
    config: Arc<OverpassConfig>,
    state: Arc<Mutex<OverpassState>>,
}

impl OverpassRoadProvider {
    pub fn new() -> Self {
        Self::with_config(OverpassConfig::default())
    }

    pub fn with_config(config: OverpassConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("curve_advisor_rs/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        OverpassRoadProvider {
            client,
            state: Arc::new(Mutex::new(OverpassState {
                rate_limit: RateLimit::new(config.min_interval),
                area: None,
            })),
            config: Arc::new(config),
        }
    }

    /// Overpass QL for every drivable way around a point
    ///
    /// # Query Format
    /// ```text
    /// [out:json][timeout:30];
    /// (
    ///   way["highway"~"..."](around:500,lat,lon);
    /// );
    /// out body;
    /// >;
    /// out skel qt;
    /// ```
    fn build_query(&self, center: LatLon) -> String {
        format!(
            "[out:json][timeout:{}];\n\
            (\n  \
              way[\"highway\"~\"^(motorway|trunk|primary|secondary|tertiary|unclassified|residential|living_street|service)(_link)?$\"]\
              (around:{:.0},{:.6},{:.6});\n\
            );\n\
            out body;\n\
            >;\n\
            out skel qt;",
            self.config.timeout_secs, self.config.fetch_radius_m, center.lat, center.lon
        )
    }

    async fn respect_rate_limit(state: &mut OverpassState) {
        let wait = state.rate_limit.remaining();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        state.rate_limit.last_request = Instant::now();
    }

    async fn fetch_area(&self, state: &mut OverpassState, center: LatLon) -> Result<FetchedArea, ProviderError> {
        for attempt in 0..MAX_RETRIES {
            Self::respect_rate_limit(state).await;

            let response = self
                .client
                .post(&self.config.base_url)
                .body(self.build_query(center))
                .send()
                .await?;

            let status = response.status();
            if status.as_u16() == 429 {
                warn!("Rate limited by Overpass API");
                return Err(ProviderError::RateLimited);
            } else if !status.is_success() {
                return Err(ProviderError::Http(status.as_u16()));
            }

            let body = response.text().await?;

            // Overpass reports query timeouts as a remark inside a 200 response
            if body.contains("runtime error") {
                if body.contains("timed out") || body.contains("timeout") {
                    let backoff = 2u64.pow(attempt);
                    warn!(
                        "Overpass timeout on attempt {}/{}, retrying in {}s",
                        attempt + 1,
                        MAX_RETRIES,
                        backoff
                    );
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    continue;
                }
                return Err(ProviderError::Parse("Overpass runtime error".to_string()));
            }

            let segments = parse_osm_json(&body)?;
            debug!("Fetched {} road segments around {}", segments.len(), center);
            return Ok(FetchedArea {
                center,
                radius_m: self.config.fetch_radius_m,
                tree: RoadTree::from_segments(segments),
            });
        }

        Err(ProviderError::NetworkTimeout)
    }

    /// Nearest drivable road within the match radius
    ///
    /// `Ok(None)` means the area was fetched and no road is close enough.
    pub async fn lookup(&self, position: LatLon) -> Result<Option<RoadMatch>, ProviderError> {
        let mut state = self.state.lock().await;

        let covered = state
            .area
            .as_ref()
            .map_or(false, |area| area.covers(position, self.config.match_radius_m));
        if !covered {
            let area = self.fetch_area(&mut state, position).await?;
            state.area = Some(area);
        }

        let Some(area) = state.area.as_ref() else {
            return Err(ProviderError::NoData);
        };
        Ok(area
            .tree
            .nearest(position, self.config.match_radius_m)
            .map(|(segment, distance_m)| RoadMatch {
                way_id: segment.id,
                road_class: segment.road_class,
                name: segment.name.clone(),
                max_speed_kmh: segment.max_speed_kmh,
                distance_m,
            }))
    }
}

impl Default for OverpassRoadProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RoadAttributeProvider for OverpassRoadProvider {
    fn speed_limit(&self, position: LatLon) -> BoxFuture<'static, Result<Option<f64>, ProviderError>> {
        let provider = self.clone();
        async move {
            Ok(provider
                .lookup(position)
                .await?
                .and_then(|road| road.max_speed_kmh))
        }
        .boxed()
    }

    fn is_on_road(&self, position: LatLon) -> BoxFuture<'static, Result<bool, ProviderError>> {
        let provider = self.clone();
        async move { Ok(provider.lookup(position).await?.is_some()) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query() {
        let provider = OverpassRoadProvider::new();
        let query = provider.build_query(LatLon::new(37.7749, -122.4194));

        assert!(query.contains("[out:json]"));
        assert!(query.contains("[timeout:30]"));
        assert!(query.contains("way[\"highway\""));
        assert!(query.contains("motorway"));
        assert!(query.contains("(around:500,37.774900,-122.419400)"));
        assert!(query.contains("out skel qt"));
    }

    #[test]
    fn test_rate_limit_tracking() {
        let mut rate_limit = RateLimit::new(Duration::from_secs(1));
        assert!(rate_limit.remaining().is_zero());

        rate_limit.last_request = Instant::now();
        assert!(rate_limit.remaining() > Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_respect_rate_limit_sleep() {
        let mut state = OverpassState {
            rate_limit: RateLimit::new(Duration::from_millis(200)),
            area: None,
        };
        state.rate_limit.last_request = Instant::now();

        let start = Instant::now();
        OverpassRoadProvider::respect_rate_limit(&mut state).await;
        let elapsed = start.elapsed().as_millis();
        assert!(elapsed >= 150, "slept {} ms", elapsed);
    }

    #[test]
    fn test_area_coverage() {
        let center = LatLon::new(48.0, 11.0);
        let area = FetchedArea {
            center,
            radius_m: 500.0,
            tree: RoadTree::new(),
        };
        assert!(area.covers(center, 25.0));
        assert!(area.covers(crate::geometry::destination_point(center, 90.0, 450.0), 25.0));
        assert!(!area.covers(crate::geometry::destination_point(center, 90.0, 490.0), 25.0));
    }

    // Requires network
    #[tokio::test]
    #[ignore]
    async fn test_lookup_integration() {
        let provider = OverpassRoadProvider::new();
        let on_road = provider.is_on_road(LatLon::new(37.7749, -122.4194)).await;
        assert!(on_road.is_ok());
    }
}
