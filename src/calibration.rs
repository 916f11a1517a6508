/// Stationary GPS noise calibration
///
/// Turns a batch of fixes recorded while the platform was parked into the
/// measurement-noise matrix R used by the position filter.

use crate::error::{FusionError, FusionResult};
use crate::types::{GpsFix, GpsPosNoise};

/// Default regularization added to each diagonal entry of R.
pub const DEFAULT_EPSILON: f64 = 1e-5;

/// Build R = diag(var(lat) + eps, var(lon) + eps) from stationary fixes.
///
/// Uses the unbiased (n - 1) sample variance. A single sample has no spread,
/// so its variance is taken as zero and R collapses to eps * I.
/// Non-finite samples are ignored.
pub fn calibrate_measurement_noise(samples: &[GpsFix], epsilon: f64) -> FusionResult<GpsPosNoise> {
    let finite: Vec<&GpsFix> = samples
        .iter()
        .filter(|s| s.latitude.is_finite() && s.longitude.is_finite())
        .collect();

    if finite.is_empty() {
        return Err(FusionError::EmptyCalibration);
    }
    if finite.len() < samples.len() {
        log::warn!(
            "Ignoring {} non-finite stationary samples",
            samples.len() - finite.len()
        );
    }

    let lat_var = sample_variance(finite.iter().map(|s| s.latitude));
    let lon_var = sample_variance(finite.iter().map(|s| s.longitude));
    log::info!(
        "Calibrated GPS noise from {} samples: var_lat={:.3e} var_lon={:.3e}",
        finite.len(),
        lat_var,
        lon_var
    );

    let mut r = GpsPosNoise::zeros();
    r[(0, 0)] = lat_var + epsilon;
    r[(1, 1)] = lon_var + epsilon;
    Ok(r)
}

fn sample_variance(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count();
    if n < 2 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let sum_sq: f64 = values.map(|v| (v - mean).powi(2)).sum();
    sum_sq / (n - 1) as f64
}
