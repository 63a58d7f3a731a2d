use crate::error::ProviderError;
use log::{debug, warn};

/// Road attributes older than this are not trusted [ms]
pub const DEFAULT_TTL_MS: i64 = 30_000;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Cached<T> {
    value: T,
    fetched_ms: i64,
}

/// What a tick sees of the road under the vehicle
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoadAttributes {
    pub speed_limit_kmh: Option<f64>,
    pub on_road: bool,
}

/// Synchronous view of the last road-attribute lookups
///
/// Lookups finish asynchronously and are recorded here; ticks only read.
/// A failed lookup keeps the previous value while it is fresh. With nothing
/// fresh, the speed limit is unknown and the vehicle is assumed on-road so
/// rerouting stays available.
#[derive(Debug)]
pub struct RoadAttributeCache {
    ttl_ms: i64,
    speed_limit: Option<Cached<Option<f64>>>,
    on_road: Option<Cached<bool>>,
    failures: u64,
}

impl RoadAttributeCache {
    pub fn new(ttl_ms: i64) -> Self {
        RoadAttributeCache {
            ttl_ms,
            speed_limit: None,
            on_road: None,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn is_fresh<T>(&self, entry: &Option<Cached<T>>, now_ms: i64) -> bool {
        entry
            .as_ref()
            .map_or(false, |c| now_ms - c.fetched_ms <= self.ttl_ms)
    }

    pub fn record_speed_limit(&mut self, now_ms: i64, result: Result<Option<f64>, ProviderError>) {
        match result {
            Ok(value) => {
                self.speed_limit = Some(Cached {
                    value,
                    fetched_ms: now_ms,
                })
            }
            Err(e) => {
                let retained = self.is_fresh(&self.speed_limit, now_ms);
                self.record_failure("Speed limit", e, retained)
            }
        }
    }

    pub fn record_on_road(&mut self, now_ms: i64, result: Result<bool, ProviderError>) {
        match result {
            Ok(value) => {
                self.on_road = Some(Cached {
                    value,
                    fetched_ms: now_ms,
                })
            }
            Err(e) => {
                let retained = self.is_fresh(&self.on_road, now_ms);
                self.record_failure("On-road", e, retained)
            }
        }
    }

    fn record_failure(&mut self, what: &str, error: ProviderError, retained: bool) {
        self.failures += 1;
        match error {
            ProviderError::RateLimited | ProviderError::NetworkTimeout => {
                debug!("{} lookup failed ({}), cached value retained: {}", what, error, retained)
            }
            _ => warn!("{} lookup failed ({}), cached value retained: {}", what, error, retained),
        }
    }

    /// Speed limit in km/h, `None` when unknown or stale
    pub fn speed_limit_kmh(&self, now_ms: i64) -> Option<f64> {
        if self.is_fresh(&self.speed_limit, now_ms) {
            self.speed_limit.and_then(|c| c.value)
        } else {
            None
        }
    }

    /// On-road flag, `true` when unknown or stale
    pub fn is_on_road(&self, now_ms: i64) -> bool {
        if self.is_fresh(&self.on_road, now_ms) {
            self.on_road.map_or(true, |c| c.value)
        } else {
            true
        }
    }

    pub fn attributes(&self, now_ms: i64) -> RoadAttributes {
        RoadAttributes {
            speed_limit_kmh: self.speed_limit_kmh(now_ms),
            on_road: self.is_on_road(now_ms),
        }
    }
}

impl Default for RoadAttributeCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_MS)
    }
}
