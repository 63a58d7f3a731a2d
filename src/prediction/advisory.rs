//! Curve-speed physics
//!
//! Speeds cross this API in km/h (what the driver sees), distances in
//! meters, decelerations in g (negative = braking).

use crate::config::DrivingStyle;

pub const GRAVITY: f64 = 9.81;

/// Tyre/road adhesion coefficient for a dry road
pub const ADHESION_COEFFICIENT: f64 = 0.7;

/// Upper bound on any curve speed [km/h]
pub const MAX_CURVE_SPEED_KMH: f64 = 180.0;

/// Distance floor so the deceleration stays finite at the turn start [m]
const MIN_DECEL_DISTANCE_M: f64 = 1.0;

fn kmh_to_ms(kmh: f64) -> f64 {
    kmh / 3.6
}

/// Highest speed the radius allows before the tyres let go [km/h]
///
/// `min(sqrt(R·g·µ)·3.6, 180)`; an infinite radius (straight) is capped.
pub fn max_curve_speed_kmh(radius_m: f64) -> f64 {
    if !(radius_m > 0.0) {
        return 0.0;
    }
    ((radius_m * GRAVITY * ADHESION_COEFFICIENT).sqrt() * 3.6).min(MAX_CURVE_SPEED_KMH)
}

/// Advised speed through a curve for the driving style [km/h]
pub fn optimal_speed_kmh(radius_m: f64, style: DrivingStyle) -> f64 {
    max_curve_speed_kmh(radius_m) * style.factor()
}

/// V1 advised speed: physics bounded by the minimum turn speed and the
/// speed limit (or the default speed when no limit is known)
pub fn bounded_optimal_speed_kmh(
    radius_m: f64,
    style: DrivingStyle,
    min_turn_speed_kmh: f64,
    speed_limit_kmh: Option<f64>,
    default_speed_kmh: f64,
) -> f64 {
    let ceiling = speed_limit_kmh.unwrap_or(default_speed_kmh);
    optimal_speed_kmh(radius_m, style)
        .max(min_turn_speed_kmh)
        .min(ceiling.max(min_turn_speed_kmh))
}

/// V2 advised speed from a lateral-acceleration budget
///
/// `clamp(sqrt(a_lat·R)·3.6, minTurnSpeed, speedLimitOrDefault)`. If the
/// ceiling is below the floor the floor wins.
pub fn lateral_limited_speed_kmh(
    radius_m: f64,
    max_lateral_accel_mps2: f64,
    min_turn_speed_kmh: f64,
    speed_limit_or_default_kmh: f64,
) -> f64 {
    let physical = if radius_m.is_finite() && radius_m > 0.0 {
        (max_lateral_accel_mps2 * radius_m).sqrt() * 3.6
    } else {
        speed_limit_or_default_kmh
    };
    physical
        .min(speed_limit_or_default_kmh)
        .max(min_turn_speed_kmh)
}

/// Deceleration needed to reach `target_kmh` within `distance_m` [g]
///
/// `(v_t² − v_c²) / (2·d·g)`. `None` when no braking is needed
/// (current ≤ target); otherwise strictly negative.
pub fn required_deceleration_g(current_kmh: f64, target_kmh: f64, distance_m: f64) -> Option<f64> {
    if !(current_kmh > target_kmh) {
        return None;
    }
    let current = kmh_to_ms(current_kmh);
    let target = kmh_to_ms(target_kmh);
    let distance = distance_m.max(MIN_DECEL_DISTANCE_M);
    Some((target * target - current * current) / (2.0 * distance * GRAVITY))
}

/// Distance needed to slow from current to target at `max_deceleration_mps2` [m]
pub fn braking_distance_m(current_kmh: f64, target_kmh: f64, max_deceleration_mps2: f64) -> f64 {
    if current_kmh <= target_kmh || max_deceleration_mps2 <= 0.0 {
        return 0.0;
    }
    let current = kmh_to_ms(current_kmh);
    let target = kmh_to_ms(target_kmh);
    (current * current - target * target) / (2.0 * max_deceleration_mps2)
}

/// Distance from the vehicle at which braking has to start [m]
pub fn braking_point_m(
    distance_to_start_m: f64,
    current_kmh: f64,
    target_kmh: f64,
    max_deceleration_mps2: f64,
) -> f64 {
    (distance_to_start_m - braking_distance_m(current_kmh, target_kmh, max_deceleration_mps2))
        .max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_ninety_degree_twenty_meter_scenario() {
        let max = max_curve_speed_kmh(20.0);
        assert_abs_diff_eq!(max, 42.4, epsilon = 0.3);

        let optimal = optimal_speed_kmh(20.0, DrivingStyle::Normal);
        assert_abs_diff_eq!(optimal, 33.9, epsilon = 0.3);

        let decel = required_deceleration_g(54.0, optimal, 200.0).unwrap();
        assert!(decel.is_finite());
        assert!(decel < 0.0);
    }

    #[test]
    fn test_straight_is_capped() {
        assert_eq!(max_curve_speed_kmh(f64::INFINITY), MAX_CURVE_SPEED_KMH);
        assert_eq!(max_curve_speed_kmh(0.0), 0.0);
    }

    #[test]
    fn test_no_deceleration_when_already_slow() {
        assert!(required_deceleration_g(30.0, 30.0, 100.0).is_none());
        assert!(required_deceleration_g(20.0, 40.0, 100.0).is_none());
    }

    #[test]
    fn test_deceleration_grows_as_distance_shrinks() {
        let mut previous = 0.0;
        for distance in [400.0, 200.0, 100.0, 50.0, 10.0, 1.0] {
            let d = required_deceleration_g(90.0, 40.0, distance).unwrap();
            assert!(d < previous, "{} should be below {}", d, previous);
            assert!(d.is_finite());
            previous = d;
        }
        // Clamped at 1 m
        assert_eq!(
            required_deceleration_g(90.0, 40.0, 0.0),
            required_deceleration_g(90.0, 40.0, 1.0)
        );
    }

    #[test]
    fn test_braking_point() {
        // 72 -> 36 km/h at 3 m/s²: (400 - 100) / 6 = 50 m
        assert_abs_diff_eq!(braking_distance_m(72.0, 36.0, 3.0), 50.0, epsilon = 1e-9);
        assert_abs_diff_eq!(braking_point_m(120.0, 72.0, 36.0, 3.0), 70.0, epsilon = 1e-9);
        assert_eq!(braking_point_m(20.0, 72.0, 36.0, 3.0), 0.0);
        assert_eq!(braking_distance_m(30.0, 40.0, 3.0), 0.0);
    }

    #[test]
    fn test_speed_bounds() {
        // Tight hairpin: physics below the floor
        assert_eq!(
            bounded_optimal_speed_kmh(5.0, DrivingStyle::Prudent, 20.0, None, 50.0),
            20.0
        );
        // Gentle curve: capped by the limit
        assert_eq!(
            bounded_optimal_speed_kmh(500.0, DrivingStyle::Normal, 20.0, Some(70.0), 50.0),
            70.0
        );
        assert_eq!(lateral_limited_speed_kmh(1000.0, 3.0, 20.0, 50.0), 50.0);
        assert_eq!(lateral_limited_speed_kmh(4.0, 3.0, 20.0, 50.0), 20.0);
        assert_abs_diff_eq!(
            lateral_limited_speed_kmh(75.0, 3.0, 20.0, 90.0),
            54.0,
            epsilon = 1e-9
        );
    }
}
