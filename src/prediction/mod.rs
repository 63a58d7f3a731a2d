pub mod advisory;
pub mod curve_analyzer;
pub mod detector_v2;
pub mod state;
pub mod turn_manager;

pub use curve_analyzer::{CurveAnalyzer, CurveGeometry, SharpTurn};
pub use detector_v2::TurnDetectorV2;
pub use state::{PredictionSnapshot, PredictionStateManager};
pub use turn_manager::TurnPredictionManager;

use advisory::{braking_point_m, required_deceleration_g};
use crate::config::Settings;
use crate::route::{RoutePolyline, RoutePosition};
use crate::types::{Turn, VehicleState};

/// Upper bound on the published turn list
pub const MAX_TURNS: usize = 5;

/// Inputs for one prediction pass, borrowed from the current tick
#[derive(Clone, Copy, Debug)]
pub struct PredictionContext<'a> {
    pub route: &'a RoutePolyline,
    pub position: RoutePosition,
    pub vehicle: VehicleState,
    pub settings: &'a Settings,
    /// Speed limit at the vehicle, when the road provider knows it
    pub speed_limit_kmh: Option<f64>,
}

/// Sort ascending by distance to start and drop repeated start indices
/// (first occurrence wins)
pub fn sort_and_dedupe(turns: &mut Vec<Turn>) {
    turns.sort_by(|a, b| {
        a.distance_to_start_m
            .total_cmp(&b.distance_to_start_m)
            .then(a.start_index.cmp(&b.start_index))
    });
    let mut seen = Vec::with_capacity(turns.len());
    turns.retain(|t| {
        if seen.contains(&t.start_index) {
            false
        } else {
            seen.push(t.start_index);
            true
        }
    });
}

/// `sort_and_dedupe`, then keep at most `MAX_TURNS`
pub fn sort_and_cap(turns: &mut Vec<Turn>) {
    sort_and_dedupe(turns);
    turns.truncate(MAX_TURNS);
}

/// Published copy of a detector's tracked turns
///
/// The detector keeps everything it found in its window; only what leaves
/// it is capped.
pub(crate) fn published(turns: &mut Vec<Turn>) -> Vec<Turn> {
    sort_and_dedupe(turns);
    turns.iter().take(MAX_TURNS).cloned().collect()
}

/// Refresh the braking fields of a turn whose distances are current
///
/// Both stay `None` while the vehicle is already at or below the advised
/// speed.
pub fn refresh_braking(turn: &mut Turn, current_kmh: f64, max_deceleration_mps2: f64) {
    let Some(target) = turn.optimal_speed_kmh else {
        turn.required_deceleration_g = None;
        turn.braking_point_m = None;
        return;
    };
    let distance = turn.distance_to_start_m;
    turn.required_deceleration_g = required_deceleration_g(current_kmh, target, distance);
    turn.braking_point_m = turn
        .required_deceleration_g
        .map(|_| braking_point_m(distance, current_kmh, target, max_deceleration_mps2));
}
