//! Linear algebra type system for the vehicle state estimator
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the constant-velocity Kalman filter.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM_CV: usize = 4; // [x, y, vx, vy]

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_POS: usize = 2; // (x, y) East/North

// ===== Constant-Velocity Filter Types =====
pub type StateVec4 = SVector<f64, STATE_DIM_CV>;
pub type StateMat4 = SMatrix<f64, STATE_DIM_CV, STATE_DIM_CV>;

// Position measurement types
pub type MeasVec2 = SVector<f64, MEASURE_DIM_POS>;
pub type MeasMat2 = SMatrix<f64, MEASURE_DIM_POS, MEASURE_DIM_POS>;

// Observation and gain
pub type ObsMat2x4 = SMatrix<f64, MEASURE_DIM_POS, STATE_DIM_CV>; // 2×4
pub type GainMat4x2 = SMatrix<f64, STATE_DIM_CV, MEASURE_DIM_POS>; // 4×2
