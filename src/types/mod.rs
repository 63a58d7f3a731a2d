pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Geographic position in degrees (WGS84)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        LatLon { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }

    /// geo crate uses (x, y) = (lon, lat)
    pub fn to_point(self) -> geo::Point<f64> {
        geo::Point::new(self.lon, self.lat)
    }
}

impl From<(f64, f64)> for LatLon {
    fn from((lat, lon): (f64, f64)) -> Self {
        LatLon { lat, lon }
    }
}

impl Display for LatLon {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// One raw position sample (GPS callback or simulated playback)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsFix {
    pub position: LatLon,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    #[serde(default)]
    pub heading_deg: Option<f64>,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

impl GpsFix {
    pub fn new(position: LatLon, timestamp_ms: i64) -> Self {
        GpsFix {
            position,
            speed_mps: None,
            heading_deg: None,
            timestamp_ms,
            accuracy_m: None,
        }
    }
}

/// Smoothed vehicle state published by the estimator at 10 Hz
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleState {
    pub position: LatLon,
    pub speed_mps: f64,
    /// [0, 360), 0 = North, 90 = East
    pub heading_deg: f64,
    pub acceleration_mps2: f64,
    pub timestamp_ms: i64,
}

impl VehicleState {
    pub fn speed_kmh(&self) -> f64 {
        self.speed_mps * 3.6
    }
}

/// Turn shape classes produced by the detectors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnClassification {
    UTurn,
    Hairpin,
    Tight,
    Intersection,
    Wide,
    Curve,
}

impl TurnClassification {
    /// Classify an episode from its heading change, length and radius
    ///
    /// # Thresholds
    /// - ≥165°: uturn
    /// - ≥115°: hairpin if radius < 35 m, else tight
    /// - 70–110°: intersection if length ≤ 90 m, else tight
    /// - ≥35°: wide if radius ≥ 120 m, else tight
    /// - otherwise: curve
    pub fn classify(heading_delta_deg: f64, length_m: f64, radius_m: f64) -> Self {
        let angle = heading_delta_deg.abs();

        if angle >= 165.0 {
            TurnClassification::UTurn
        } else if angle >= 115.0 {
            if radius_m < 35.0 {
                TurnClassification::Hairpin
            } else {
                TurnClassification::Tight
            }
        } else if (70.0..=110.0).contains(&angle) {
            if length_m <= 90.0 {
                TurnClassification::Intersection
            } else {
                TurnClassification::Tight
            }
        } else if angle >= 35.0 {
            if radius_m >= 120.0 {
                TurnClassification::Wide
            } else {
                TurnClassification::Tight
            }
        } else {
            TurnClassification::Curve
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TurnClassification::UTurn => "uturn",
            TurnClassification::Hairpin => "hairpin",
            TurnClassification::Tight => "tight",
            TurnClassification::Intersection => "intersection",
            TurnClassification::Wide => "wide",
            TurnClassification::Curve => "curve",
        }
    }
}

impl Display for TurnClassification {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One upcoming turn on the current route
///
/// Index fields reference vertices of the route the turn was detected on;
/// `start_index` is the deduplication key. The `*_along_m` fields are the
/// along-route distances used to recompute the distance fields every tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub start_point: LatLon,
    pub start_index: usize,
    pub end_point: LatLon,
    pub end_index: usize,
    pub apex_point: LatLon,
    pub apex_index: usize,
    pub length_m: f64,
    pub radius_m: f64,
    pub signed_angle_deg: f64,
    pub classification: TurnClassification,
    pub start_along_m: f64,
    pub end_along_m: f64,
    pub distance_to_start_m: f64,
    pub distance_to_exit_m: Option<f64>,
    pub speed_limit_kmh: Option<f64>,
    pub optimal_speed_kmh: Option<f64>,
    pub required_deceleration_g: Option<f64>,
    /// Distance ahead at which braking at `maxDeceleration` has to start [m]
    pub braking_point_m: Option<f64>,
    /// Kept alive across a detection-window rebuild while the vehicle is inside it
    #[serde(default)]
    pub sticky: bool,
}

impl Turn {
    /// Recompute the distance fields from the vehicle's along-route distance
    pub fn update_distances(&mut self, vehicle_along_m: f64) {
        self.distance_to_start_m = (self.start_along_m - vehicle_along_m).max(0.0);
        self.distance_to_exit_m =
            if vehicle_along_m >= self.start_along_m && vehicle_along_m <= self.end_along_m {
                Some(self.end_along_m - vehicle_along_m)
            } else {
                None
            };
    }

    pub fn is_inside(&self) -> bool {
        self.distance_to_start_m == 0.0 && self.distance_to_exit_m.is_some()
    }

    pub fn is_exited(&self, vehicle_along_m: f64) -> bool {
        vehicle_along_m > self.end_along_m
    }

    /// True when the vertex spans overlap by more than a shared endpoint
    pub fn overlaps(&self, other: &Turn) -> bool {
        self.start_index < other.end_index && other.start_index < self.end_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_turn(start_along: f64, end_along: f64) -> Turn {
        let p = LatLon::new(0.0, 0.0);
        Turn {
            start_point: p,
            start_index: 1,
            end_point: p,
            end_index: 3,
            apex_point: p,
            apex_index: 2,
            length_m: end_along - start_along,
            radius_m: 20.0,
            signed_angle_deg: 90.0,
            classification: TurnClassification::Intersection,
            start_along_m: start_along,
            end_along_m: end_along,
            distance_to_start_m: 0.0,
            distance_to_exit_m: None,
            speed_limit_kmh: None,
            optimal_speed_kmh: None,
            required_deceleration_g: None,
            braking_point_m: None,
            sticky: false,
        }
    }

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(TurnClassification::classify(170.0, 40.0, 10.0), TurnClassification::UTurn);
        assert_eq!(TurnClassification::classify(-130.0, 40.0, 20.0), TurnClassification::Hairpin);
        assert_eq!(TurnClassification::classify(130.0, 40.0, 50.0), TurnClassification::Tight);
        assert_eq!(TurnClassification::classify(90.0, 30.0, 20.0), TurnClassification::Intersection);
        assert_eq!(TurnClassification::classify(90.0, 120.0, 80.0), TurnClassification::Tight);
        assert_eq!(TurnClassification::classify(45.0, 200.0, 250.0), TurnClassification::Wide);
        assert_eq!(TurnClassification::classify(45.0, 50.0, 60.0), TurnClassification::Tight);
        assert_eq!(TurnClassification::classify(20.0, 50.0, 150.0), TurnClassification::Curve);
    }

    #[test]
    fn test_distances_ahead_inside_and_exited() {
        let mut turn = make_turn(100.0, 150.0);

        turn.update_distances(40.0);
        assert_eq!(turn.distance_to_start_m, 60.0);
        assert!(turn.distance_to_exit_m.is_none());
        assert!(!turn.is_inside());

        turn.update_distances(120.0);
        assert_eq!(turn.distance_to_start_m, 0.0);
        assert_eq!(turn.distance_to_exit_m, Some(30.0));
        assert!(turn.is_inside());

        assert!(turn.is_exited(150.5));
        assert!(!turn.is_exited(150.0));
    }

    #[test]
    fn test_fix_json_defaults() {
        let json = r#"{"position": {"lat": 48.1, "lon": 11.5}, "timestampMs": 1000}"#;
        let fix: GpsFix = serde_json::from_str(json).unwrap();
        assert_eq!(fix.timestamp_ms, 1000);
        assert!(fix.speed_mps.is_none());
        assert!(fix.accuracy_m.is_none());
    }
}
