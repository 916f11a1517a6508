/// 4-Dimensional Linear Kalman Filter (constant-velocity model)
///
/// State Vector (4D):
/// [0-1]: Position (lat, lon) in the units of the input fixes
/// [2-3]: Velocity (vel_lat, vel_lon) in units/second
///
/// GPS is the only measurement that goes through the full covariance
/// update. Inertial and wheel-speed fallbacks write velocity directly.

use serde::{Deserialize, Serialize};

use crate::error::{FusionError, FusionResult};
use crate::types::{
    GpsPosNoise, GpsPosVec, JacobianGpsPos, KalmanGainGpsPos, StateMat4, StateVec4,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Kf4dState {
    /// Position (lat, lon)
    pub position: (f64, f64),

    /// Velocity (vel_lat, vel_lon) [units/s]
    pub velocity: (f64, f64),

    /// Covariance trace for uncertainty
    pub covariance_trace: f64,

    /// Update counters
    pub predictions: u64,
    pub gps_updates: u64,
    pub velocity_writes: u64,
}

pub struct Kf4d {
    /// State vector [4D]
    state: StateVec4,

    /// Covariance matrix [4x4]
    covariance: StateMat4,

    /// Process noise matrix [4x4], fixed for the run
    process_noise: StateMat4,

    /// GPS measurement noise [2x2], from stationary calibration
    measurement_noise: GpsPosNoise,

    /// Added to the innovation diagonal before inversion
    epsilon: f64,

    /// Update counters
    predictions: u64,
    gps_updates: u64,
    velocity_writes: u64,
}

impl Kf4d {
    /// Create a new 4D filter starting at the zero state.
    ///
    /// # Arguments
    /// * `initial_variance` - Diagonal of the initial covariance
    /// * `q_position` - Process noise on the position terms
    /// * `q_velocity` - Process noise on the velocity terms
    /// * `measurement_noise` - Calibrated GPS noise R
    /// * `epsilon` - Innovation regularization
    pub fn new(
        initial_variance: f64,
        q_position: f64,
        q_velocity: f64,
        measurement_noise: GpsPosNoise,
        epsilon: f64,
    ) -> Self {
        let process_noise =
            StateMat4::from_diagonal(&StateVec4::new(q_position, q_position, q_velocity, q_velocity));

        Self {
            state: StateVec4::zeros(),
            covariance: StateMat4::identity() * initial_variance,
            process_noise,
            measurement_noise,
            epsilon,
            predictions: 0,
            gps_updates: 0,
            velocity_writes: 0,
        }
    }

    /// Constant-velocity transition: position advances by velocity * dt.
    pub fn transition_matrix(dt: f64) -> StateMat4 {
        let mut f = StateMat4::identity();
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        f
    }

    /// H selects [lat, lon] out of the state.
    pub fn measurement_matrix() -> JacobianGpsPos {
        let mut h = JacobianGpsPos::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        h
    }

    /// Time update: x = F x, P = F P F^T + Q
    pub fn predict(&mut self, dt: f64) {
        let f = Self::transition_matrix(dt);
        self.state = f * self.state;
        self.covariance = f * self.covariance * f.transpose() + self.process_noise;
        self.symmetrize();
        self.predictions += 1;
    }

    /// GPS position update (full covariance correction).
    pub fn update_gps(&mut self, z: &GpsPosVec) -> FusionResult<()> {
        let h = Self::measurement_matrix();
        let h_t = h.transpose();

        // Measurement residual
        let residual = *z - h * self.state;

        // Innovation covariance with stability term: S = H P H^T + R + eps*I
        let s = h * self.covariance * h_t
            + self.measurement_noise
            + GpsPosNoise::identity() * self.epsilon;
        let s_inv = s.try_inverse().ok_or(FusionError::SingularInnovation)?;

        // Kalman gain: K = P H^T S^-1
        let k: KalmanGainGpsPos = self.covariance * h_t * s_inv;

        self.state += k * residual;

        // Covariance update: P = (I - K H) P
        self.covariance = (StateMat4::identity() - k * h) * self.covariance;
        self.symmetrize();

        self.gps_updates += 1;
        Ok(())
    }

    /// Overwrite the velocity terms. Covariance is left untouched.
    pub fn set_velocity(&mut self, vel_lat: f64, vel_lon: f64) {
        self.state[2] = vel_lat;
        self.state[3] = vel_lon;
        self.velocity_writes += 1;
    }

    /// Add to the velocity terms. Covariance is left untouched.
    pub fn add_velocity(&mut self, d_vel_lat: f64, d_vel_lon: f64) {
        self.state[2] += d_vel_lat;
        self.state[3] += d_vel_lon;
        self.velocity_writes += 1;
    }

    /// Place the position at a known fix, keeping velocity and covariance.
    pub fn seed_position(&mut self, lat: f64, lon: f64) {
        self.state[0] = lat;
        self.state[1] = lon;
    }

    pub fn position(&self) -> (f64, f64) {
        (self.state[0], self.state[1])
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.state[2], self.state[3])
    }

    pub fn state(&self) -> &StateVec4 {
        &self.state
    }

    pub fn covariance(&self) -> &StateMat4 {
        &self.covariance
    }

    pub fn covariance_trace(&self) -> f64 {
        self.covariance.trace()
    }

    pub fn is_finite(&self) -> bool {
        self.state.iter().all(|v| v.is_finite()) && self.covariance.iter().all(|v| v.is_finite())
    }

    /// Get current state snapshot
    pub fn get_state(&self) -> Kf4dState {
        Kf4dState {
            position: self.position(),
            velocity: self.velocity(),
            covariance_trace: self.covariance_trace(),
            predictions: self.predictions,
            gps_updates: self.gps_updates,
            velocity_writes: self.velocity_writes,
        }
    }

    // Rounding in F P F^T and (I - KH) P drifts P off symmetric.
    fn symmetrize(&mut self) {
        self.covariance = (self.covariance + self.covariance.transpose()) * 0.5;
    }
}
