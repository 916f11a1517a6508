//! Linear algebra type system for the position filter
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the constant-velocity Kalman filter.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM_4: usize = 4;

// ===== Measurement Dimensions =====
pub const MEASURE_DIM_GPS_POS: usize = 2; // (lat, lon)

// ===== 4-State Filter Types =====
// [lat, lon, vel_lat, vel_lon]
pub type StateVec4 = SVector<f64, STATE_DIM_4>;
pub type StateMat4 = SMatrix<f64, STATE_DIM_4, STATE_DIM_4>;

// Measurement types
pub type GpsPosVec = SVector<f64, MEASURE_DIM_GPS_POS>;
pub type GpsPosNoise = SMatrix<f64, MEASURE_DIM_GPS_POS, MEASURE_DIM_GPS_POS>;

// Kalman gain types
pub type KalmanGainGpsPos = SMatrix<f64, STATE_DIM_4, MEASURE_DIM_GPS_POS>; // 4×2

// Jacobian types
pub type JacobianGpsPos = SMatrix<f64, MEASURE_DIM_GPS_POS, STATE_DIM_4>; // 2×4
