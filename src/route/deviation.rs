use super::polyline::RoutePolyline;
use super::tracker::{distance_to_adjacent_segments, find_closest_point_on_route, is_off_route};
use crate::config::DeviationConfig;
use crate::types::LatLon;
use log::{debug, info};

/// Why an automatic reroute was not considered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoldReason {
    AutoRecalculateDisabled,
    NoDestination,
    NoRoute,
    OffRoad,
    Cooldown,
    TooSlow,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeviationDecision {
    /// A gate is closed; distance was not evaluated
    Hold(HoldReason),
    /// All gates open and the vehicle is within `max_route_deviation`
    OnRoute { segment_distance_m: f64 },
    /// Request a new route; the cooldown has been stamped
    Recalculate { segment_distance_m: f64 },
}

/// Inputs for one deviation check, all read from the current tick
#[derive(Clone, Copy, Debug)]
pub struct DeviationCheck<'a> {
    pub auto_recalculate: bool,
    pub has_destination: bool,
    pub on_road: bool,
    pub speed_mps: f64,
    pub position: LatLon,
    pub route: Option<&'a RoutePolyline>,
    pub max_route_deviation_m: f64,
}

/// Gates automatic rerouting
///
/// # Gates (all required)
/// 1. Active destination (and auto-recalculate enabled)
/// 2. Vehicle judged on-road by the road-attribute provider
/// 3. Cooldown elapsed since the last recalculation
/// 4. Speed above the minimum
///
/// Only then is the perpendicular distance to the segments adjacent to the
/// nearest vertex compared against the allowed deviation.
#[derive(Debug)]
pub struct DeviationManager {
    config: DeviationConfig,
    last_recalc_ms: Option<i64>,
    recalculations: u64,
}

impl DeviationManager {
    pub fn new(config: DeviationConfig) -> Self {
        DeviationManager {
            config,
            last_recalc_ms: None,
            recalculations: 0,
        }
    }

    pub fn set_config(&mut self, config: DeviationConfig) {
        self.config = config;
    }

    pub fn recalculations(&self) -> u64 {
        self.recalculations
    }

    pub fn last_recalc_ms(&self) -> Option<i64> {
        self.last_recalc_ms
    }

    /// Stamp the cooldown for a recalculation started elsewhere (new destination)
    pub fn mark_recalculated(&mut self, now_ms: i64) {
        self.last_recalc_ms = Some(now_ms);
    }

    pub fn cooldown_elapsed(&self, now_ms: i64) -> bool {
        match self.last_recalc_ms {
            None => true,
            Some(last) => (now_ms - last) as f64 / 1000.0 > self.config.cooldown_secs,
        }
    }

    pub fn evaluate(&mut self, now_ms: i64, check: &DeviationCheck) -> DeviationDecision {
        if !check.auto_recalculate {
            return DeviationDecision::Hold(HoldReason::AutoRecalculateDisabled);
        }
        if !check.has_destination {
            return DeviationDecision::Hold(HoldReason::NoDestination);
        }
        if !check.on_road {
            return DeviationDecision::Hold(HoldReason::OffRoad);
        }
        if !self.cooldown_elapsed(now_ms) {
            return DeviationDecision::Hold(HoldReason::Cooldown);
        }
        if !(check.speed_mps > self.config.min_speed_mps) {
            return DeviationDecision::Hold(HoldReason::TooSlow);
        }
        let Some(route) = check.route else {
            return DeviationDecision::Hold(HoldReason::NoRoute);
        };
        let Some(closest) = find_closest_point_on_route(check.position, route.points()) else {
            return DeviationDecision::Hold(HoldReason::NoRoute);
        };

        let segment_distance_m =
            distance_to_adjacent_segments(check.position, route.points(), closest.index);

        if is_off_route(segment_distance_m, check.max_route_deviation_m) {
            // Stamped before the request goes out, whatever its outcome
            self.last_recalc_ms = Some(now_ms);
            self.recalculations += 1;
            info!(
                "Off route by {:.1} m (max {:.1} m) at {:.1} m/s, requesting recalculation",
                segment_distance_m, check.max_route_deviation_m, check.speed_mps
            );
            DeviationDecision::Recalculate { segment_distance_m }
        } else {
            debug!("On route, {:.1} m from nearest segment", segment_distance_m);
            DeviationDecision::OnRoute { segment_distance_m }
        }
    }
}
