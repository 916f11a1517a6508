pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Row timestamp split into whole seconds and a nanosecond part
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: f64,
    pub nanoseconds: f64,
}

impl Timestamp {
    pub fn new(seconds: f64, nanoseconds: f64) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.seconds + self.nanoseconds * 1e-9
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsFix {
    pub fn as_vector(&self) -> GpsPosVec {
        GpsPosVec::new(self.latitude, self.longitude)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WheelSpeeds {
    pub left_front: f64,
    pub right_front: f64,
    pub left_back: f64,
    pub right_back: f64,
}

impl WheelSpeeds {
    pub fn mean(&self) -> f64 {
        (self.left_front + self.right_front + self.left_back + self.right_back) / 4.0
    }
}

/// One row of the movement log after ingestion.
///
/// Sensor groups are `Some` only when every component parsed to a finite
/// number. `has_latitude`/`has_longitude` keep the per-column presence so a row
/// with only one GPS coordinate survives the drop rule but still takes the
/// fallback branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub timestamp: Timestamp,
    pub gps: Option<GpsFix>,
    pub accel: Option<AccelSample>,
    pub wheels: Option<WheelSpeeds>,
    pub has_latitude: bool,
    pub has_longitude: bool,
}

impl MeasurementRecord {
    /// Build a record from raw column values, treating non-finite values as absent.
    pub fn from_columns(
        timestamp: Timestamp,
        latitude: Option<f64>,
        longitude: Option<f64>,
        accel_x: Option<f64>,
        accel_y: Option<f64>,
        wheels: [Option<f64>; 4],
    ) -> Self {
        let latitude = latitude.filter(|v| v.is_finite());
        let longitude = longitude.filter(|v| v.is_finite());
        let accel_x = accel_x.filter(|v| v.is_finite());
        let accel_y = accel_y.filter(|v| v.is_finite());
        let [lf, rf, lb, rb] = wheels.map(|w| w.filter(|v| v.is_finite()));

        let gps = match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Some(GpsFix {
                latitude,
                longitude,
            }),
            _ => None,
        };
        let accel = match (accel_x, accel_y) {
            (Some(x), Some(y)) => Some(AccelSample { x, y }),
            _ => None,
        };
        let wheels = match (lf, rf, lb, rb) {
            (Some(left_front), Some(right_front), Some(left_back), Some(right_back)) => {
                Some(WheelSpeeds {
                    left_front,
                    right_front,
                    left_back,
                    right_back,
                })
            }
            _ => None,
        };

        Self {
            timestamp,
            gps,
            accel,
            wheels,
            has_latitude: latitude.is_some(),
            has_longitude: longitude.is_some(),
        }
    }

    /// Rows with neither coordinate carry nothing the filter can use.
    pub fn lacks_position(&self) -> bool {
        !self.has_latitude && !self.has_longitude
    }
}

/// Filtered position emitted once per processed record
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    #[serde(rename = "Longitude")]
    pub longitude: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_combines_nanoseconds() {
        let ts = Timestamp::new(10.0, 500_000_000.0);
        assert!((ts.as_secs_f64() - 10.5).abs() < 1e-12);
    }

    #[test]
    fn test_partial_gps_is_not_a_fix() {
        let record = MeasurementRecord::from_columns(
            Timestamp::new(0.0, 0.0),
            Some(32.2),
            None,
            None,
            None,
            [None; 4],
        );
        assert!(record.gps.is_none());
        assert!(!record.lacks_position());
    }

    #[test]
    fn test_nan_counts_as_absent() {
        let record = MeasurementRecord::from_columns(
            Timestamp::new(0.0, 0.0),
            Some(f64::NAN),
            Some(f64::NAN),
            Some(1.0),
            Some(f64::NAN),
            [Some(1.0), Some(2.0), Some(3.0), Some(f64::NAN)],
        );
        assert!(record.lacks_position());
        assert!(record.accel.is_none());
        assert!(record.wheels.is_none());
    }

    #[test]
    fn test_wheel_mean() {
        let wheels = WheelSpeeds {
            left_front: 4.0,
            right_front: 6.0,
            left_back: 5.0,
            right_back: 5.0,
        };
        assert_eq!(wheels.mean(), 5.0);
    }
}
