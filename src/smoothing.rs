use crate::types::LatLon;

/// Centered box moving average
///
/// The window shrinks symmetrically at the edges so the output has the same
/// length as the input and no sample is padded with made-up values.
/// A window of 0 or 1 returns the input unchanged.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || values.len() <= 1 {
        return values.to_vec();
    }

    let half = window / 2;
    let n = values.len();

    // Prefix sums keep this O(n) for the 1 m resampled signals
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    let mut acc = 0.0;
    for v in values {
        acc += v;
        prefix.push(acc);
    }

    (0..n)
        .map(|i| {
            let reach = half.min(i).min(n - 1 - i);
            let lo = i - reach;
            let hi = i + reach + 1;
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

/// Moving average applied to latitude and longitude independently
///
/// Fine for the short windows used on route geometry; the endpoints are
/// kept exactly because their window shrinks to one sample.
pub fn smooth_positions(points: &[LatLon], window: usize) -> Vec<LatLon> {
    let lats: Vec<f64> = points.iter().map(|p| p.lat).collect();
    let lons: Vec<f64> = points.iter().map(|p| p.lon).collect();

    moving_average(&lats, window)
        .into_iter()
        .zip(moving_average(&lons, window))
        .map(|(lat, lon)| LatLon::new(lat, lon))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_value() {
        assert_eq!(moving_average(&[5.0], 9), vec![5.0]);
    }

    #[test]
    fn test_window_of_one_is_identity() {
        let values = [1.0, 4.0, 2.0];
        assert_eq!(moving_average(&values, 1), values.to_vec());
    }

    #[test]
    fn test_centered_window() {
        let result = moving_average(&[0.0, 0.0, 3.0, 0.0, 0.0], 3);
        assert_eq!(result.len(), 5);
        assert!((result[1] - 1.0).abs() < 1e-12);
        assert!((result[2] - 1.0).abs() < 1e-12);
        assert!((result[3] - 1.0).abs() < 1e-12);
        // Edges shrink to a single sample
        assert_eq!(result[0], 0.0);
        assert_eq!(result[4], 0.0);
    }

    #[test]
    fn test_constant_signal_unchanged() {
        let values = vec![2.5; 20];
        let result = moving_average(&values, 5);
        assert!(result.iter().all(|v| (v - 2.5).abs() < 1e-12));
    }

    #[test]
    fn test_positions_keep_endpoints() {
        let points = vec![
            LatLon::new(0.0, 0.0),
            LatLon::new(0.001, 0.0),
            LatLon::new(0.001, 0.001),
        ];
        let smoothed = smooth_positions(&points, 3);
        assert_eq!(smoothed[0], points[0]);
        assert_eq!(smoothed[2], points[2]);
        assert!((smoothed[1].lat - 2.0 * 0.001 / 3.0).abs() < 1e-12);
    }
}
