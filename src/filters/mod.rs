pub mod cv_kalman;

pub use cv_kalman::{EstimatorStats, FixOutcome, VehicleStateEstimator};
