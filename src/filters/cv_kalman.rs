use crate::config::EstimatorConfig;
use crate::error::{AdvisorError, Result};
use crate::geometry::{heading_from_components, LocalProjection};
use crate::types::{
    GainMat4x2, GpsFix, LatLon, MeasMat2, MeasVec2, ObsMat2x4, StateMat4, StateVec4,
    VehicleState,
};
use log::{debug, info, warn};

/// Velocity variance after initialisation or a hard reset [m²/s²]
const RESET_VELOCITY_VAR: f64 = 25.0;

/// Floor on the measurement noise so an over-optimistic accuracy can't lock the filter
const MIN_FIX_ACCURACY_M: f64 = 1.0;

/// Low-pass weight for the acceleration derived from filtered speed
const ACCEL_SMOOTHING: f64 = 0.3;

/// Largest lag a fix stamped before the filter time is carried forward by [s]
const MAX_FIX_LAG_S: f64 = 1.0;

/// What a fix did to the filter
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FixOutcome {
    /// First fix: filter seeded at the measurement
    Initialized,
    /// Regular predict + correct
    Corrected { innovation_m: f64 },
    /// Innovation beyond the hard-reset threshold: state snapped to the fix
    HardReset { innovation_m: f64 },
}

/// Counters for logging and tests
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EstimatorStats {
    pub fix_updates: u64,
    pub hard_resets: u64,
    pub rebases: u64,
    pub predict_steps: u64,
    pub rejected_fixes: u64,
}

/// Constant-velocity Kalman filter producing the smoothed vehicle state
///
/// # State
/// `[x, y, vx, vy]` in meters / m/s, East-North relative to a local
/// projection origin. The origin is rebased onto the current estimate once
/// the state drifts past `rebase_radius_m`, keeping velocity and covariance.
///
/// # Cadence
/// - `process_fix` at whatever rate fixes arrive: predict to the fix time,
///   then correct with the 2D position (or snap on a large innovation)
/// - `predict_to` at the fixed output rate: predict only, never corrects
pub struct VehicleStateEstimator {
    config: EstimatorConfig,
    projection: Option<LocalProjection>,
    state: StateVec4,
    covariance: StateMat4,
    last_time_ms: Option<i64>,
    last_heading_deg: f64,
    acceleration_mps2: f64,
    last_output: Option<(i64, f64)>, // (time, speed)
    stats: EstimatorStats,
}

impl VehicleStateEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            projection: None,
            state: StateVec4::zeros(),
            covariance: StateMat4::identity() * 100.0,
            last_time_ms: None,
            last_heading_deg: 0.0,
            acceleration_mps2: 0.0,
            last_output: None,
            stats: EstimatorStats::default(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.projection.is_some()
    }

    pub fn stats(&self) -> EstimatorStats {
        self.stats
    }

    pub fn set_config(&mut self, config: EstimatorConfig) {
        self.config = config;
    }

    /// Local-frame state vector (for diagnostics)
    pub fn local_state(&self) -> StateVec4 {
        self.state
    }

    /// Feed one external fix
    ///
    /// Invalid fixes (non-finite or out-of-range coordinates) are rejected
    /// with `SensorFixInvalid` and leave the filter untouched.
    pub fn process_fix(&mut self, fix: &GpsFix) -> Result<FixOutcome> {
        if let Err(e) = validate_fix(fix) {
            self.stats.rejected_fixes += 1;
            warn!("Dropping fix at t={}: {}", fix.timestamp_ms, e);
            return Err(e);
        }

        let projection = match self.projection {
            Some(p) => p,
            None => {
                self.initialize(fix);
                return Ok(FixOutcome::Initialized);
            }
        };

        let mut lag_s = 0.0;
        if let Some(last) = self.last_time_ms {
            let dt = (fix.timestamp_ms - last) as f64 / 1000.0;
            if dt > 0.0 {
                self.predict(dt);
            } else {
                lag_s = (-dt).min(MAX_FIX_LAG_S);
            }
        }

        // A fix older than the state is moved along the current velocity to the state time
        let (zx, zy) = projection.to_local(fix.position);
        let measurement = MeasVec2::new(zx + self.state[2] * lag_s, zy + self.state[3] * lag_s);
        let innovation = measurement - Self::observation() * self.state;
        let innovation_m = innovation.norm();

        let outcome = if innovation_m > self.config.hard_reset_distance_m {
            warn!(
                "Fix innovation {:.1} m exceeds {:.1} m, hard reset",
                innovation_m, self.config.hard_reset_distance_m
            );
            self.snap_to(measurement, fix);
            self.stats.hard_resets += 1;
            FixOutcome::HardReset { innovation_m }
        } else {
            match self.correct(measurement, self.fix_accuracy(fix)) {
                Ok(()) => FixOutcome::Corrected { innovation_m },
                Err(e) => {
                    // Recovered locally, never surfaced
                    warn!("{}, snapping to fix", e);
                    self.snap_to(measurement, fix);
                    self.stats.hard_resets += 1;
                    FixOutcome::HardReset { innovation_m }
                }
            }
        };

        self.last_time_ms = Some(
            self.last_time_ms
                .map_or(fix.timestamp_ms, |t| t.max(fix.timestamp_ms)),
        );
        self.stats.fix_updates += 1;
        self.refresh_heading();
        self.maybe_rebase();

        Ok(outcome)
    }

    /// Predict-only step up to `now_ms`, returning the published state
    pub fn predict_to(&mut self, now_ms: i64) -> Option<VehicleState> {
        self.projection?;

        if let Some(last) = self.last_time_ms {
            let dt = (now_ms - last) as f64 / 1000.0;
            if dt > 0.0 {
                self.predict(dt);
                self.last_time_ms = Some(now_ms);
                self.maybe_rebase();
            }
        }

        let speed = self.speed_mps();
        if let Some((t_prev, speed_prev)) = self.last_output {
            let dt = (now_ms - t_prev) as f64 / 1000.0;
            if dt > 0.0 {
                let raw = (speed - speed_prev) / dt;
                self.acceleration_mps2 += ACCEL_SMOOTHING * (raw - self.acceleration_mps2);
            }
        }
        self.last_output = Some((now_ms, speed));

        self.current_state()
    }

    /// Immutable snapshot of the current estimate
    pub fn current_state(&self) -> Option<VehicleState> {
        let projection = self.projection?;
        Some(VehicleState {
            position: projection.to_latlon(self.state[0], self.state[1]),
            speed_mps: self.speed_mps(),
            heading_deg: self.last_heading_deg,
            acceleration_mps2: self.acceleration_mps2,
            timestamp_ms: self.last_time_ms.unwrap_or(0),
        })
    }

    /// Position uncertainty (RMS of x/y std) in meters
    pub fn position_uncertainty_m(&self) -> f64 {
        ((self.covariance[(0, 0)] + self.covariance[(1, 1)]) / 2.0).sqrt()
    }

    fn speed_mps(&self) -> f64 {
        self.state[2].hypot(self.state[3])
    }

    fn fix_accuracy(&self, fix: &GpsFix) -> f64 {
        fix.accuracy_m
            .filter(|a| a.is_finite() && *a > 0.0)
            .unwrap_or(self.config.default_fix_accuracy_m)
            .max(MIN_FIX_ACCURACY_M)
    }

    fn observation() -> ObsMat2x4 {
        ObsMat2x4::new(
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0,
        )
    }

    fn initialize(&mut self, fix: &GpsFix) {
        let projection = LocalProjection::new(fix.position);
        self.projection = Some(projection);
        self.last_time_ms = Some(fix.timestamp_ms);
        self.snap_to(MeasVec2::zeros(), fix);
        self.refresh_heading();
        self.stats.fix_updates += 1;
        info!("Estimator initialised at {}", fix.position);
    }

    /// Set position to the measurement, velocity from the fix's speed/heading
    fn snap_to(&mut self, measurement: MeasVec2, fix: &GpsFix) {
        let (vx, vy) = match fix.speed_mps.filter(|s| s.is_finite()) {
            Some(speed) if speed > self.config.min_heading_speed_mps => {
                let heading = fix
                    .heading_deg
                    .filter(|h| h.is_finite())
                    .unwrap_or(self.last_heading_deg)
                    .to_radians();
                (speed * heading.sin(), speed * heading.cos())
            }
            _ => (0.0, 0.0),
        };

        self.state = StateVec4::new(measurement[0], measurement[1], vx, vy);

        // Widened covariance: don't trust the snapped state more than the fix
        let accuracy = self.fix_accuracy(fix);
        let pos_var = (2.0 * accuracy).powi(2);
        self.covariance = StateMat4::from_diagonal(&StateVec4::new(
            pos_var,
            pos_var,
            RESET_VELOCITY_VAR,
            RESET_VELOCITY_VAR,
        ));
    }

    fn predict(&mut self, dt: f64) {
        let mut f = StateMat4::identity();
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;

        // Discrete white-noise acceleration model, per axis:
        // [dt⁴/4, dt³/2; dt³/2, dt²] * σa²
        let accel_var = self.config.accel_noise_std * self.config.accel_noise_std;
        let q_pos = 0.25 * dt.powi(4) * accel_var;
        let q_cross = 0.5 * dt.powi(3) * accel_var;
        let q_vel = dt.powi(2) * accel_var;
        let mut q = StateMat4::zeros();
        q[(0, 0)] = q_pos;
        q[(1, 1)] = q_pos;
        q[(0, 2)] = q_cross;
        q[(2, 0)] = q_cross;
        q[(1, 3)] = q_cross;
        q[(3, 1)] = q_cross;
        q[(2, 2)] = q_vel;
        q[(3, 3)] = q_vel;

        self.state = f * self.state;
        let propagated = f * self.covariance * f.transpose() + q;

        // Force symmetry
        self.covariance = (propagated + propagated.transpose()) * 0.5;
        self.stats.predict_steps += 1;
    }

    /// 2D position measurement update (Joseph form)
    fn correct(&mut self, measurement: MeasVec2, accuracy_m: f64) -> Result<()> {
        let h = Self::observation();
        let r = MeasMat2::identity() * (accuracy_m * accuracy_m);

        let innovation = measurement - h * self.state;
        let s = h * self.covariance * h.transpose() + r;
        let s_inv = s
            .try_inverse()
            .ok_or_else(|| AdvisorError::FilterDivergence(innovation.norm()))?;
        let k: GainMat4x2 = self.covariance * h.transpose() * s_inv;

        self.state += k * innovation;

        let i_kh = StateMat4::identity() - k * h;
        let joseph = i_kh * self.covariance * i_kh.transpose() + k * r * k.transpose();
        self.covariance = (joseph + joseph.transpose()) * 0.5;

        if !self.state.iter().all(|v| v.is_finite()) {
            return Err(AdvisorError::FilterDivergence(innovation.norm()));
        }
        Ok(())
    }

    /// Heading follows the filtered velocity only above the minimum speed
    fn refresh_heading(&mut self) {
        if self.speed_mps() > self.config.min_heading_speed_mps {
            self.last_heading_deg = heading_from_components(self.state[2], self.state[3]);
        }
    }

    fn maybe_rebase(&mut self) {
        let Some(projection) = self.projection else {
            return;
        };
        let drift = self.state[0].hypot(self.state[1]);
        if drift <= self.config.rebase_radius_m {
            return;
        }

        let new_origin: LatLon = projection.to_latlon(self.state[0], self.state[1]);
        self.projection = Some(LocalProjection::new(new_origin));
        self.state[0] = 0.0;
        self.state[1] = 0.0;
        self.stats.rebases += 1;
        info!(
            "Rebased estimator origin to {} after {:.0} m drift",
            new_origin, drift
        );
    }
}

fn validate_fix(fix: &GpsFix) -> Result<()> {
    let p = fix.position;
    if !p.is_finite() {
        return Err(AdvisorError::SensorFixInvalid(format!(
            "non-finite coordinates {:?}",
            p
        )));
    }
    if p.lat.abs() > 90.0 || p.lon.abs() > 180.0 {
        return Err(AdvisorError::SensorFixInvalid(format!(
            "coordinates out of range {}",
            p
        )));
    }
    if fix.speed_mps.is_some_and(|s| !s.is_finite()) {
        debug!("Fix at t={} carries a non-finite speed", fix.timestamp_ms);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{angle_diff_deg, destination_point, distance_m};
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    const START: LatLon = LatLon {
        lat: 48.1372,
        lon: 11.5756,
    };

    fn fix_at(position: LatLon, t_ms: i64) -> GpsFix {
        GpsFix::new(position, t_ms)
    }

    /// Drive east at `speed` for `secs` with 1 Hz noisy fixes and 10 Hz ticks
    fn drive_east(
        estimator: &mut VehicleStateEstimator,
        speed: f64,
        secs: u64,
        noise_m: f64,
    ) -> (LatLon, i64) {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut truth = START;
        let mut t_ms = 0;
        for i in 0..=secs {
            t_ms = (i * 1000) as i64;
            truth = destination_point(START, 90.0, speed * i as f64);
            let north = (rng.gen::<f64>() * 2.0 - 1.0) * noise_m;
            let east = (rng.gen::<f64>() * 2.0 - 1.0) * noise_m;
            let measured = destination_point(destination_point(truth, 0.0, north), 90.0, east);
            estimator.process_fix(&fix_at(measured, t_ms)).unwrap();
            for tick in 1..10 {
                estimator.predict_to(t_ms + tick * 100);
            }
        }
        (truth, t_ms)
    }

    #[test]
    fn test_first_fix_initializes() {
        let mut est = VehicleStateEstimator::new(EstimatorConfig::default());
        assert!(est.current_state().is_none());
        assert!(est.predict_to(100).is_none());

        let outcome = est.process_fix(&fix_at(START, 0)).unwrap();
        assert_eq!(outcome, FixOutcome::Initialized);

        let state = est.current_state().unwrap();
        assert!(distance_m(state.position, START) < 0.01);
        assert_eq!(state.speed_mps, 0.0);
    }

    #[test]
    fn test_converges_to_ground_truth() {
        let mut est = VehicleStateEstimator::new(EstimatorConfig::default());
        let (truth, t_ms) = drive_east(&mut est, 15.0, 30, 1.5);

        let state = est.predict_to(t_ms + 100).unwrap();
        assert!(
            (state.speed_mps - 15.0).abs() < 2.0,
            "speed {:.2} should be ~15 m/s",
            state.speed_mps
        );
        assert!(
            angle_diff_deg(90.0, state.heading_deg).abs() < 8.0,
            "heading {:.1} should be ~90°",
            state.heading_deg
        );
        // 100 ms of travel beyond the last truth point plus noise
        assert!(distance_m(state.position, truth) < 6.0);
        assert_eq!(est.stats().hard_resets, 0);
    }

    #[test]
    fn test_jump_triggers_hard_reset_not_divergence() {
        let mut est = VehicleStateEstimator::new(EstimatorConfig::default());
        let (truth, t_ms) = drive_east(&mut est, 15.0, 10, 1.0);

        let jumped = destination_point(truth, 0.0, 80.0);
        let outcome = est.process_fix(&fix_at(jumped, t_ms + 1000)).unwrap();
        assert!(matches!(outcome, FixOutcome::HardReset { innovation_m } if innovation_m > 20.0));
        assert_eq!(est.stats().hard_resets, 1);

        let state = est.current_state().unwrap();
        assert!(distance_m(state.position, jumped) < 0.5);
        assert!(state.speed_mps.is_finite());
        // No speed on the fix: velocity zeroed
        assert_eq!(state.speed_mps, 0.0);
    }

    #[test]
    fn test_hard_reset_keeps_fix_velocity() {
        let mut est = VehicleStateEstimator::new(EstimatorConfig::default());
        est.process_fix(&fix_at(START, 0)).unwrap();

        let far = destination_point(START, 180.0, 100.0);
        let mut fix = fix_at(far, 1000);
        fix.speed_mps = Some(12.0);
        fix.heading_deg = Some(180.0);
        est.process_fix(&fix).unwrap();

        let state = est.current_state().unwrap();
        assert!((state.speed_mps - 12.0).abs() < 1e-9);
        assert!(angle_diff_deg(180.0, state.heading_deg).abs() < 1e-6);
    }

    #[test]
    fn test_heading_held_below_min_speed() {
        let mut est = VehicleStateEstimator::new(EstimatorConfig::default());
        let mut first = fix_at(START, 0);
        first.speed_mps = Some(10.0);
        first.heading_deg = Some(90.0);
        est.process_fix(&first).unwrap();
        assert!(angle_diff_deg(90.0, est.current_state().unwrap().heading_deg).abs() < 1e-6);

        // Slow fix far away: snaps with zero velocity, heading must not move
        let mut slow = fix_at(destination_point(START, 200.0, 50.0), 1000);
        slow.speed_mps = Some(0.2);
        slow.heading_deg = Some(200.0);
        est.process_fix(&slow).unwrap();

        let state = est.current_state().unwrap();
        assert_eq!(state.speed_mps, 0.0);
        assert!(angle_diff_deg(90.0, state.heading_deg).abs() < 1e-6);
    }

    #[test]
    fn test_late_fix_is_carried_to_state_time() {
        let mut est = VehicleStateEstimator::new(EstimatorConfig::default());
        let (_, t_ms) = drive_east(&mut est, 15.0, 30, 0.0);
        est.predict_to(t_ms + 1000).unwrap();

        // Stamped 400 ms before the filter time, exactly on the track
        let stale = destination_point(START, 90.0, 15.0 * (t_ms + 600) as f64 / 1000.0);
        let outcome = est.process_fix(&fix_at(stale, t_ms + 600)).unwrap();
        assert!(matches!(outcome, FixOutcome::Corrected { .. }));

        let truth = destination_point(START, 90.0, 15.0 * (t_ms + 1000) as f64 / 1000.0);
        let state = est.current_state().unwrap();
        assert!(
            distance_m(state.position, truth) < 0.3,
            "estimate {:.2} m off the true position",
            distance_m(state.position, truth)
        );
        assert!((state.speed_mps - 15.0).abs() < 0.5);
    }

    #[test]
    fn test_invalid_fix_is_dropped() {
        let mut est = VehicleStateEstimator::new(EstimatorConfig::default());
        est.process_fix(&fix_at(START, 0)).unwrap();
        let before = est.current_state().unwrap();

        let result = est.process_fix(&fix_at(LatLon::new(f64::NAN, 11.0), 1000));
        assert!(matches!(result, Err(AdvisorError::SensorFixInvalid(_))));

        let result = est.process_fix(&fix_at(LatLon::new(91.0, 11.0), 1000));
        assert!(matches!(result, Err(AdvisorError::SensorFixInvalid(_))));

        assert_eq!(est.current_state().unwrap(), before);
        assert_eq!(est.stats().rejected_fixes, 2);
    }

    #[test]
    fn test_predict_only_ticks_never_correct() {
        let mut est = VehicleStateEstimator::new(EstimatorConfig::default());
        drive_east(&mut est, 10.0, 5, 0.0);
        let updates = est.stats().fix_updates;

        let a = est.predict_to(6000).unwrap();
        let b = est.predict_to(6500).unwrap();
        assert_eq!(est.stats().fix_updates, updates);
        // Constant velocity: moves ~speed * 0.5 s between ticks
        let moved = distance_m(a.position, b.position);
        assert!((moved - a.speed_mps * 0.5).abs() < 0.2);
    }

    #[test]
    fn test_origin_rebase_preserves_estimate() {
        let config = EstimatorConfig {
            rebase_radius_m: 100.0,
            ..EstimatorConfig::default()
        };
        let mut est = VehicleStateEstimator::new(config);
        let (truth, t_ms) = drive_east(&mut est, 20.0, 25, 0.0);

        assert!(est.stats().rebases >= 3);
        let local = est.local_state();
        assert!(local[0].hypot(local[1]) <= 100.0);

        let state = est.predict_to(t_ms).unwrap();
        assert!(distance_m(state.position, truth) < 2.0);
        assert!((state.speed_mps - 20.0).abs() < 1.0);
    }
}
