use super::advisory::lateral_limited_speed_kmh;
use super::{published, refresh_braking, PredictionContext};
use crate::config::DetectorV2Config;
use crate::geometry::{angle_diff_rad, distance_m, LocalProjection};
use crate::route::RoutePolyline;
use crate::smoothing::moving_average;
use crate::types::{Turn, TurnClassification};
use log::debug;
use ndarray::Array1;

/// Curvature signal resampled along one stretch of route
#[derive(Clone, Debug)]
pub struct CurvatureSignal {
    /// Along-route distance of sample 0
    pub start_along_m: f64,
    pub step_m: f64,
    /// Signed curvature per sample [rad/m], positive = right
    pub curvature: Array1<f64>,
    /// `wheel_track · |curvature|`, moving-averaged
    pub differential: Array1<f64>,
}

impl CurvatureSignal {
    /// Resample `[start_along_m, end_along_m]` every `step_m` and derive the
    /// curvature and differential signals
    pub fn compute(
        route: &RoutePolyline,
        start_along_m: f64,
        end_along_m: f64,
        config: &DetectorV2Config,
    ) -> Self {
        let step = config.step_m;
        let span = (end_along_m - start_along_m).max(0.0);
        let n = (span / step).floor() as usize + 1;

        let projection = LocalProjection::new(route.interpolate_at(start_along_m));
        let mut xs = Array1::<f64>::zeros(n);
        let mut ys = Array1::<f64>::zeros(n);
        for k in 0..n {
            let (x, y) = projection.to_local(route.interpolate_at(start_along_m + k as f64 * step));
            xs[k] = x;
            ys[k] = y;
        }

        // Heading of each resampled chord k -> k+1 (0 = North, clockwise)
        let chords = n.saturating_sub(1);
        let mut headings = Array1::<f64>::zeros(chords);
        for k in 0..chords {
            headings[k] = (xs[k + 1] - xs[k]).atan2(ys[k + 1] - ys[k]);
        }

        let mut curvature = Array1::<f64>::zeros(n);
        for k in 1..chords {
            curvature[k] = angle_diff_rad(headings[k - 1], headings[k]) / step;
        }

        let raw = curvature.mapv(|kappa| config.wheel_track_m * kappa.abs());
        let window = (config.smoothing_window_m / step).round().max(1.0) as usize;
        let differential = Array1::from(moving_average(&raw.to_vec(), window));

        CurvatureSignal {
            start_along_m,
            step_m: step,
            curvature,
            differential,
        }
    }

    pub fn len(&self) -> usize {
        self.differential.len()
    }

    pub fn is_empty(&self) -> bool {
        self.differential.is_empty()
    }

    pub fn along_at(&self, sample: usize) -> f64 {
        self.start_along_m + sample as f64 * self.step_m
    }
}

/// One hysteresis episode, sample indices inclusive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Episode {
    pub start: usize,
    pub end: usize,
}

/// Split the differential into turn episodes
///
/// An episode opens when the signal reaches `diff_on` and closes once it has
/// stayed below `diff_off` for `hold_m`; its end is the last sample at or
/// above `diff_off`. Episodes shorter than `min_turn_length_m` are dropped.
pub fn segment_episodes(signal: &CurvatureSignal, config: &DetectorV2Config) -> Vec<Episode> {
    let hold_samples = (config.hold_m / signal.step_m).round().max(1.0) as usize;
    let mut episodes = Vec::new();

    let mut open: Option<usize> = None;
    let mut last_above = 0;
    let mut below_run = 0;

    for (k, &value) in signal.differential.iter().enumerate() {
        match open {
            None => {
                if value >= config.diff_on {
                    open = Some(k);
                    last_above = k;
                    below_run = 0;
                }
            }
            Some(start) => {
                if value < config.diff_off {
                    below_run += 1;
                    if below_run >= hold_samples {
                        episodes.push(Episode {
                            start,
                            end: last_above,
                        });
                        open = None;
                    }
                } else {
                    below_run = 0;
                    last_above = k;
                }
            }
        }
    }
    if let Some(start) = open {
        episodes.push(Episode {
            start,
            end: last_above,
        });
    }

    episodes.retain(|e| (e.end - e.start) as f64 * signal.step_m >= config.min_turn_length_m);
    episodes
}

/// Build turns from the episodes of one window
fn turns_from_signal(
    route: &RoutePolyline,
    signal: &CurvatureSignal,
    config: &DetectorV2Config,
    ctx: &PredictionContext,
) -> Vec<Turn> {
    let settings = ctx.settings;
    let ceiling_kmh = ctx.speed_limit_kmh.unwrap_or(settings.default_speed);

    segment_episodes(signal, config)
        .into_iter()
        .map(|episode| {
            let range = episode.start..=episode.end;

            let heading_delta_deg = range
                .clone()
                .map(|k| signal.curvature[k] * signal.step_m)
                .sum::<f64>()
                .to_degrees();

            let (apex, peak) = range
                .clone()
                .map(|k| (k, signal.differential[k]))
                .fold((episode.start, f64::MIN), |best, (k, v)| {
                    if v > best.1 {
                        (k, v)
                    } else {
                        best
                    }
                });

            let radius_m = if peak > 0.0 {
                config.wheel_track_m / peak
            } else {
                f64::INFINITY
            };
            let start_along = signal.along_at(episode.start);
            let end_along = signal.along_at(episode.end);
            let apex_along = signal.along_at(apex);
            let length_m = end_along - start_along;

            let suggested = lateral_limited_speed_kmh(
                radius_m,
                config.max_lateral_accel_mps2,
                settings.min_turn_speed,
                ceiling_kmh,
            );

            Turn {
                start_point: route.interpolate_at(start_along),
                start_index: route.index_at(start_along),
                end_point: route.interpolate_at(end_along),
                end_index: route.index_at(end_along),
                apex_point: route.interpolate_at(apex_along),
                apex_index: route.index_at(apex_along),
                length_m,
                radius_m,
                signed_angle_deg: heading_delta_deg,
                classification: TurnClassification::classify(heading_delta_deg, length_m, radius_m),
                start_along_m: start_along,
                end_along_m: end_along,
                distance_to_start_m: 0.0,
                distance_to_exit_m: None,
                speed_limit_kmh: ctx.speed_limit_kmh,
                optimal_speed_kmh: Some(suggested),
                required_deceleration_g: None,
                braking_point_m: None,
                sticky: false,
            }
        })
        .collect()
}

/// Whether a freshly detected turn is the continuation of `previous`
fn is_same_turn(previous: &Turn, candidate: &Turn, config: &DetectorV2Config) -> bool {
    let overlap = (previous.end_along_m.min(candidate.end_along_m)
        - previous.start_along_m.max(candidate.start_along_m))
    .max(0.0);
    let shorter = (previous.end_along_m - previous.start_along_m)
        .min(candidate.end_along_m - candidate.start_along_m)
        .max(config.step_m);

    overlap / shorter >= config.match_overlap_ratio
        && distance_m(previous.apex_point, candidate.apex_point) <= config.match_apex_tolerance_m
}

/// Continuity across a rebuild
///
/// Every previous turn the vehicle is inside either merges into its match
/// in the new window (start pulled back so the vehicle stays inside) or is
/// injected as sticky until exited.
pub fn carry_over(
    previous: &[Turn],
    mut fresh: Vec<Turn>,
    vehicle_along_m: f64,
    config: &DetectorV2Config,
) -> Vec<Turn> {
    for old in previous {
        let mut old = old.clone();
        old.update_distances(vehicle_along_m);
        if !old.is_inside() {
            continue;
        }

        match fresh.iter_mut().find(|t| is_same_turn(&old, t, config)) {
            Some(matched) => {
                if old.start_along_m < matched.start_along_m {
                    matched.start_along_m = old.start_along_m;
                    matched.start_index = old.start_index;
                    matched.start_point = old.start_point;
                    matched.length_m = matched.end_along_m - matched.start_along_m;
                }
            }
            None => {
                debug!(
                    "Keeping turn at index {} sticky across rebuild ({:.0} m to exit)",
                    old.start_index,
                    old.end_along_m - vehicle_along_m
                );
                old.sticky = true;
                fresh.push(old);
            }
        }
    }
    fresh
}

#[derive(Clone, Debug)]
struct DetectionWindow {
    route_id: u64,
    anchor_along_m: f64,
    start_along_m: f64,
    end_along_m: f64,
    reaches_route_end: bool,
}

/// Windowed curvature detector (V2)
///
/// # Window
/// The route is resampled over `[along - look_behind, along + look_ahead]`
/// and rebuilt when the vehicle has advanced `rebuild_step_m` past the
/// anchor, comes within `trailing_margin_m` of the far end, or falls behind
/// the window start. Between rebuilds only the distance fields move.
#[derive(Debug)]
pub struct TurnDetectorV2 {
    config: DetectorV2Config,
    window: Option<DetectionWindow>,
    turns: Vec<Turn>,
    rebuilds: u64,
}

impl TurnDetectorV2 {
    pub fn new(config: DetectorV2Config) -> Self {
        TurnDetectorV2 {
            config,
            window: None,
            turns: Vec::new(),
            rebuilds: 0,
        }
    }

    /// New tuning forces a rebuild on the next pass
    pub fn set_config(&mut self, config: DetectorV2Config) {
        if config != self.config {
            self.config = config;
            self.window = None;
        }
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn reset(&mut self) {
        self.window = None;
        self.turns.clear();
    }

    fn needs_rebuild(&self, route: &RoutePolyline, along: f64) -> bool {
        match &self.window {
            None => true,
            Some(w) if w.route_id != route.id() => true,
            Some(w) => {
                along - w.anchor_along_m >= self.config.rebuild_step_m
                    || along < w.start_along_m
                    || (!w.reaches_route_end
                        && w.end_along_m - along < self.config.trailing_margin_m)
            }
        }
    }

    pub fn update(&mut self, ctx: &PredictionContext) -> Vec<Turn> {
        let route = ctx.route;
        let along = ctx.position.along_route_m;

        let route_changed = self
            .window
            .as_ref()
            .map_or(false, |w| w.route_id != route.id());
        if route_changed {
            // Stale geometry never outlives its route
            self.turns.clear();
        }

        if self.needs_rebuild(route, along) {
            self.rebuild(ctx);
        }

        let current_kmh = ctx.vehicle.speed_kmh();
        self.turns.retain(|t| !t.is_exited(along));
        for turn in &mut self.turns {
            turn.update_distances(along);
            refresh_braking(turn, current_kmh, ctx.settings.max_deceleration);
        }

        published(&mut self.turns)
    }

    fn rebuild(&mut self, ctx: &PredictionContext) {
        let route = ctx.route;
        let along = ctx.position.along_route_m;
        let total = route.total_length_m();

        let start = (along - self.config.look_behind_m).max(0.0);
        let end = (along + self.config.look_ahead_m).min(total);

        let fresh = if end - start >= 2.0 * self.config.step_m {
            let signal = CurvatureSignal::compute(route, start, end, &self.config);
            turns_from_signal(route, &signal, &self.config, ctx)
        } else {
            Vec::new()
        };

        let fresh_count = fresh.len();
        self.turns = carry_over(&self.turns, fresh, along, &self.config);
        self.window = Some(DetectionWindow {
            route_id: route.id(),
            anchor_along_m: along,
            start_along_m: start,
            end_along_m: end,
            reaches_route_end: end >= total,
        });
        self.rebuilds += 1;

        debug!(
            "V2 window rebuilt [{:.0}, {:.0}] m: {} turns detected, {} carried",
            start,
            end,
            fresh_count,
            self.turns.len() - fresh_count
        );
    }
}
