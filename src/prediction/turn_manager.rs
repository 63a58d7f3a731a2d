use super::advisory::bounded_optimal_speed_kmh;
use super::curve_analyzer::{find_sharpest_turn, CurveAnalyzer, CurveGeometry};
use super::{published, refresh_braking, PredictionContext};
use crate::route::RoutePolyline;
use crate::types::{Turn, TurnClassification};
use log::debug;

/// Keeps the gap scan off the vertex that starts the next known turn [m]
const GAP_EPSILON_M: f64 = 0.01;

/// Rolling list of upcoming turns for the discrete scan (V1)
///
/// Each pass recomputes distances, drops exited turns and runs one more
/// discrete scan, so the list grows by at most one turn per pass.
#[derive(Debug, Default)]
pub struct TurnPredictionManager {
    analyzer: CurveAnalyzer,
    turns: Vec<Turn>,
    route_id: Option<u64>,
}

impl TurnPredictionManager {
    pub fn new(analyzer: CurveAnalyzer) -> Self {
        TurnPredictionManager {
            analyzer,
            turns: Vec::new(),
            route_id: None,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn reset(&mut self) {
        self.turns.clear();
        self.route_id = None;
    }

    pub fn update(&mut self, ctx: &PredictionContext) -> Vec<Turn> {
        if self.route_id != Some(ctx.route.id()) {
            self.turns.clear();
            self.route_id = Some(ctx.route.id());
        }

        let along = ctx.position.along_route_m;
        let current_kmh = ctx.vehicle.speed_kmh();

        self.turns.retain(|turn| !turn.is_exited(along));
        for turn in &mut self.turns {
            turn.update_distances(along);
            refresh_braking(turn, current_kmh, ctx.settings.max_deceleration);
        }

        if let Some(turn) = self.scan_ahead(ctx) {
            if !self.is_known(&turn) {
                debug!(
                    "V1 turn at index {} ({}, R={:.0} m) in {:.0} m",
                    turn.start_index, turn.classification, turn.radius_m, turn.distance_to_start_m
                );
                self.turns.push(turn);
            }
        }

        published(&mut self.turns)
    }

    fn is_known(&self, turn: &Turn) -> bool {
        self.turns
            .iter()
            .any(|t| t.start_index == turn.start_index || t.overlaps(turn))
    }

    /// One discrete scan
    ///
    /// The stretch between the vehicle and the nearest known turn is scanned
    /// first so a sharper turn further ahead can't hide a nearer one; when
    /// that gap is clear the scan continues past the furthest known turn.
    fn scan_ahead(&self, ctx: &PredictionContext) -> Option<Turn> {
        let vehicle_index = ctx.position.index;

        let nearest_start = self
            .turns
            .iter()
            .map(|t| t.start_index)
            .filter(|&i| i > vehicle_index)
            .min();
        if let Some(gap_end) = nearest_start {
            let gap_m = ctx.route.along_at_index(gap_end) - ctx.route.along_at_index(vehicle_index);
            if let Some(turn) = self.scan_from(ctx, vehicle_index, gap_m - GAP_EPSILON_M) {
                return Some(turn);
            }
        }

        let furthest_end = self
            .turns
            .iter()
            .map(|t| t.end_index)
            .max()
            .unwrap_or(vehicle_index)
            .max(vehicle_index);
        self.scan_from(ctx, furthest_end, f64::INFINITY)
    }

    fn scan_from(&self, ctx: &PredictionContext, scan_from: usize, max_span_m: f64) -> Option<Turn> {
        let settings = ctx.settings;
        let along = ctx.position.along_route_m;

        let already_ahead = (ctx.route.along_at_index(scan_from) - along).max(0.0);
        let remaining = (settings.prediction_distance - already_ahead).min(max_span_m);
        if remaining <= 0.0 {
            return None;
        }

        let candidate = find_sharpest_turn(
            ctx.route.points(),
            scan_from,
            remaining,
            settings.min_turn_angle,
            settings.max_turn_angle,
        )?;
        let geometry = self.analyzer.analyze(
            ctx.route.points(),
            ctx.route.cumulative_m(),
            candidate.index,
        )?;

        let mut turn = turn_from_geometry(ctx.route, &geometry);
        if turn.is_exited(along) {
            return None;
        }

        let optimal = bounded_optimal_speed_kmh(
            turn.radius_m,
            settings.driving_style,
            settings.min_turn_speed,
            ctx.speed_limit_kmh,
            settings.default_speed,
        );
        turn.speed_limit_kmh = ctx.speed_limit_kmh;
        turn.optimal_speed_kmh = Some(optimal);
        turn.update_distances(along);
        refresh_braking(&mut turn, ctx.vehicle.speed_kmh(), settings.max_deceleration);
        Some(turn)
    }
}

fn turn_from_geometry(route: &RoutePolyline, geometry: &CurveGeometry) -> Turn {
    let points = route.points();
    Turn {
        start_point: points[geometry.start_index],
        start_index: geometry.start_index,
        end_point: points[geometry.end_index],
        end_index: geometry.end_index,
        apex_point: points[geometry.apex_index],
        apex_index: geometry.apex_index,
        length_m: geometry.length_m,
        radius_m: geometry.radius_m,
        signed_angle_deg: geometry.signed_angle_deg,
        classification: TurnClassification::classify(
            geometry.signed_angle_deg,
            geometry.length_m,
            geometry.radius_m,
        ),
        start_along_m: route.along_at_index(geometry.start_index),
        end_along_m: route.along_at_index(geometry.end_index),
        distance_to_start_m: 0.0,
        distance_to_exit_m: None,
        speed_limit_kmh: None,
        optimal_speed_kmh: None,
        required_deceleration_g: None,
        braking_point_m: None,
        sticky: false,
    }
}
