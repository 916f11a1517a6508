//! Batch GPS / inertial / wheel-speed position fusion.
//!
//! A 4-state constant-velocity Kalman filter is corrected by GPS fixes when
//! they are present and falls back to acceleration or wheel-speed velocity
//! when they are not.

pub mod calibration;
pub mod error;
pub mod filters;
pub mod io;
pub mod query;
pub mod sensor_fusion;
pub mod types;

pub use error::{FusionError, FusionResult};
pub use filters::kf_4d::{Kf4d, Kf4dState};
pub use sensor_fusion::{run_batch, FusionConfig, RunSummary, SensorFusion};
