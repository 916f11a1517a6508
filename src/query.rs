//! Time queries over a fused position track
//!
//! The output table has no time column by default, so the caller either
//! reads times from a `Time` column or supplies a start time and a fixed
//! interval between rows.

use serde::Serialize;

use crate::error::{FusionError, FusionResult};
use crate::io::PositionTrack;

#[derive(Clone, Debug, PartialEq)]
pub enum TrackTimes {
    Column(Vec<f64>),
    Uniform { start: f64, interval: f64 },
}

impl TrackTimes {
    /// Expand to one time per track row.
    pub fn resolve(&self, len: usize) -> FusionResult<Vec<f64>> {
        match self {
            TrackTimes::Column(times) => Ok(times.clone()),
            TrackTimes::Uniform { start, interval } => {
                if *interval <= 0.0 || !interval.is_finite() {
                    return Err(FusionError::InvalidInterval(*interval));
                }
                Ok((0..len).map(|i| start + interval * i as f64).collect())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryResult {
    pub time: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// The query fell outside the sampled times and the endpoint was held
    pub out_of_range: bool,
}

/// Piecewise-linear lookup of a position at `time`.
///
/// `times` must be ascending. Outside the sampled range the first or last
/// position is returned.
pub fn interpolate_position(
    time: f64,
    times: &[f64],
    latitudes: &[f64],
    longitudes: &[f64],
) -> FusionResult<QueryResult> {
    let n = times.len().min(latitudes.len()).min(longitudes.len());
    if n == 0 {
        return Err(FusionError::EmptyInput("position track".to_string()));
    }

    let out_of_range = time < times[0] || time > times[n - 1];
    if out_of_range {
        log::warn!(
            "Query time {} is outside the track range [{}, {}]",
            time,
            times[0],
            times[n - 1]
        );
    }

    let (latitude, longitude) = if time <= times[0] {
        (latitudes[0], longitudes[0])
    } else if time >= times[n - 1] {
        (latitudes[n - 1], longitudes[n - 1])
    } else {
        // first index with times[idx] > time; idx is in 1..n here
        let idx = times[..n].partition_point(|t| *t <= time);
        let (t0, t1) = (times[idx - 1], times[idx]);
        let frac = if t1 > t0 { (time - t0) / (t1 - t0) } else { 0.0 };
        (
            lerp(latitudes[idx - 1], latitudes[idx], frac),
            lerp(longitudes[idx - 1], longitudes[idx], frac),
        )
    };

    Ok(QueryResult {
        time,
        latitude,
        longitude,
        out_of_range,
    })
}

/// Query a loaded track. A `Time` column in the track wins over `fallback`.
pub fn query_track(
    track: &PositionTrack,
    time: f64,
    fallback: Option<TrackTimes>,
) -> FusionResult<QueryResult> {
    let times = match (&track.times, fallback) {
        (Some(column), _) => column.clone(),
        (None, Some(spec)) => spec.resolve(track.len())?,
        (None, None) => {
            return Err(FusionError::Malformed {
                row: 0,
                message: "track has no Time column; supply a start time and interval".to_string(),
            })
        }
    };
    interpolate_position(time, &times, &track.latitudes, &track.longitudes)
}

fn lerp(a: f64, b: f64, frac: f64) -> f64 {
    a + (b - a) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_midpoint_interpolation() {
        let result =
            interpolate_position(1.5, &[0.0, 1.0, 2.0], &[0.0, 10.0, 20.0], &[5.0, 5.0, 3.0])
                .unwrap();
        assert_relative_eq!(result.latitude, 15.0);
        assert_relative_eq!(result.longitude, 4.0);
        assert!(!result.out_of_range);
    }

    #[test]
    fn test_exact_sample_hit() {
        let result = interpolate_position(1.0, &[0.0, 1.0, 2.0], &[0.0, 10.0, 20.0], &[0.0; 3])
            .unwrap();
        assert_eq!(result.latitude, 10.0);
    }

    #[test]
    fn test_out_of_range_holds_endpoints() {
        let before = interpolate_position(-5.0, &[0.0, 1.0], &[1.0, 2.0], &[3.0, 4.0]).unwrap();
        assert!(before.out_of_range);
        assert_eq!((before.latitude, before.longitude), (1.0, 3.0));

        let after = interpolate_position(9.0, &[0.0, 1.0], &[1.0, 2.0], &[3.0, 4.0]).unwrap();
        assert!(after.out_of_range);
        assert_eq!((after.latitude, after.longitude), (2.0, 4.0));
    }

    #[test]
    fn test_uniform_times() {
        let times = TrackTimes::Uniform {
            start: 10.0,
            interval: 0.5,
        };
        assert_eq!(times.resolve(3).unwrap(), vec![10.0, 10.5, 11.0]);

        let bad = TrackTimes::Uniform {
            start: 0.0,
            interval: 0.0,
        };
        assert!(matches!(bad.resolve(3), Err(FusionError::InvalidInterval(_))));
    }

    #[test]
    fn test_query_track_needs_times() {
        let track = PositionTrack {
            times: None,
            latitudes: vec![1.0, 2.0],
            longitudes: vec![3.0, 4.0],
        };
        assert!(query_track(&track, 0.5, None).is_err());

        let result = query_track(
            &track,
            0.5,
            Some(TrackTimes::Uniform {
                start: 0.0,
                interval: 1.0,
            }),
        )
        .unwrap();
        assert_relative_eq!(result.latitude, 1.5);
    }

    #[test]
    fn test_empty_track() {
        assert!(interpolate_position(0.0, &[], &[], &[]).is_err());
    }
}
