//! Operator settings, read as an immutable snapshot on every tick
//!
//! Stored as JSON with the same camelCase keys the UI persists. Every field
//! has a default so partial files load.

use crate::error::{AdvisorError, Result};
use crate::types::LatLon;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrivingStyle {
    Prudent,
    Normal,
    Sportif,
}

impl DrivingStyle {
    /// Fraction of the physical curve limit the driver is advised to use
    pub fn factor(&self) -> f64 {
        match self {
            DrivingStyle::Prudent => 0.7,
            DrivingStyle::Normal => 0.8,
            DrivingStyle::Sportif => 0.9,
        }
    }
}

impl Default for DrivingStyle {
    fn default() -> Self {
        DrivingStyle::Normal
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnDetectionVersion {
    V1,
    V2,
}

impl Default for TurnDetectionVersion {
    fn default() -> Self {
        TurnDetectionVersion::V2
    }
}

/// Constant-velocity Kalman filter tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EstimatorConfig {
    /// Assumed acceleration noise driving the process model [m/s²]
    pub accel_noise_std: f64,
    /// Measurement noise when a fix carries no accuracy [m]
    pub default_fix_accuracy_m: f64,
    pub hard_reset_distance_m: f64,
    pub min_heading_speed_mps: f64,
    pub rebase_radius_m: f64,
    pub output_rate_hz: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            accel_noise_std: 2.0,
            default_fix_accuracy_m: 5.0,
            hard_reset_distance_m: 20.0,
            min_heading_speed_mps: 0.5,
            rebase_radius_m: 10_000.0,
            output_rate_hz: 10.0,
        }
    }
}

/// Reroute gating
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviationConfig {
    pub cooldown_secs: f64,
    pub min_speed_mps: f64,
}

impl Default for DeviationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 10.0,
            min_speed_mps: 5.0,
        }
    }
}

/// Windowed curvature detector tuning
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectorV2Config {
    pub step_m: f64,
    pub look_ahead_m: f64,
    pub look_behind_m: f64,
    pub wheel_track_m: f64,
    pub smoothing_window_m: f64,
    pub diff_on: f64,
    pub diff_off: f64,
    pub hold_m: f64,
    pub min_turn_length_m: f64,
    pub rebuild_step_m: f64,
    pub trailing_margin_m: f64,
    pub max_lateral_accel_mps2: f64,
    pub match_overlap_ratio: f64,
    pub match_apex_tolerance_m: f64,
}

impl Default for DetectorV2Config {
    fn default() -> Self {
        Self {
            step_m: 1.0,
            look_ahead_m: 1000.0,
            look_behind_m: 200.0,
            wheel_track_m: 1.6,
            smoothing_window_m: 5.0,
            diff_on: 0.006,
            diff_off: 0.004,
            hold_m: 10.0,
            min_turn_length_m: 12.0,
            rebuild_step_m: 500.0,
            trailing_margin_m: 200.0,
            max_lateral_accel_mps2: 3.0,
            match_overlap_ratio: 0.5,
            match_apex_tolerance_m: 30.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub default_speed: f64,
    pub min_turn_speed: f64,
    pub max_turn_angle: f64,
    pub min_turn_angle: f64,
    pub prediction_distance: f64,
    pub max_route_deviation: f64,
    pub driving_style: DrivingStyle,
    pub turn_detection_version: TurnDetectionVersion,
    pub enable_auto_recalculate: bool,
    /// Braking capability used for the braking point [m/s²]
    pub max_deceleration: f64,
    /// Used when no fix has been received yet
    pub fallback_position: Option<LatLon>,
    pub estimator: EstimatorConfig,
    pub deviation: DeviationConfig,
    pub detector_v2: DetectorV2Config,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_speed: 50.0,
            min_turn_speed: 20.0,
            max_turn_angle: 175.0,
            min_turn_angle: 10.0,
            prediction_distance: 500.0,
            max_route_deviation: 30.0,
            driving_style: DrivingStyle::Normal,
            turn_detection_version: TurnDetectionVersion::V2,
            enable_auto_recalculate: true,
            max_deceleration: 3.0,
            fallback_position: None,
            estimator: EstimatorConfig::default(),
            deviation: DeviationConfig::default(),
            detector_v2: DetectorV2Config::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file and validate them
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("predictionDistance", self.prediction_distance),
            ("maxRouteDeviation", self.max_route_deviation),
            ("maxDeceleration", self.max_deceleration),
            ("detectorV2.stepM", self.detector_v2.step_m),
            ("detectorV2.lookAheadM", self.detector_v2.look_ahead_m),
            ("detectorV2.wheelTrackM", self.detector_v2.wheel_track_m),
            ("detectorV2.rebuildStepM", self.detector_v2.rebuild_step_m),
            ("estimator.outputRateHz", self.estimator.output_rate_hz),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(AdvisorError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        if self.min_turn_angle > self.max_turn_angle {
            return Err(AdvisorError::Config(format!(
                "minTurnAngle {} exceeds maxTurnAngle {}",
                self.min_turn_angle, self.max_turn_angle
            )));
        }

        if self.detector_v2.diff_off > self.detector_v2.diff_on {
            return Err(AdvisorError::Config(format!(
                "detectorV2.diffOff {} exceeds diffOn {}",
                self.detector_v2.diff_off, self.detector_v2.diff_on
            )));
        }

        Ok(())
    }
}
