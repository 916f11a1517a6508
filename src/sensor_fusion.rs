// sensor_fusion.rs — Pure computation layer for batch position fusion
//
// Everything in this module is independent of file formats and the CLI.
// It takes measurement records in, produces position estimates and events
// out, so it can be unit-tested with synthetic records and driven by any
// PositionSink.

use geo::{HaversineDistance, Point};
use serde::{Deserialize, Serialize};

use crate::error::{FusionError, FusionResult};
use crate::filters::kf_4d::{Kf4d, Kf4dState};
use crate::io::PositionSink;
use crate::types::{GpsPosNoise, GpsPosVec, MeasurementRecord, PositionEstimate};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Where the filter state starts before the first record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialState {
    /// All-zero state vector
    #[default]
    Zero,
    /// Position taken from the first record carrying a full GPS fix
    FirstFix,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    // ── Filter construction ──
    pub initial_variance: f64,
    pub q_position: f64,
    pub q_velocity: f64,
    pub epsilon: f64,
    pub initial_state: InitialState,

    // ── Timing ──
    /// dt used for the first record, which has nothing to difference against
    pub first_step_dt: f64,
    /// Replacement for zero or negative dt (duplicate / out-of-order rows)
    pub min_dt: f64,

    // ── Numerical guard ──
    pub reject_non_finite: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            initial_variance: 100.0,
            q_position: 0.1,
            q_velocity: 1.0,
            epsilon: crate::calibration::DEFAULT_EPSILON,
            initial_state: InitialState::Zero,
            first_step_dt: 1.0,
            min_dt: 1e-3,
            reject_non_finite: true,
        }
    }
}

// ─── Corrections ─────────────────────────────────────────────────────────────

/// One correction the policy wants applied after the predict step.
#[derive(Clone, Debug, PartialEq)]
pub enum Correction {
    Gps(GpsPosVec),
    InertialVelocity { ax: f64, ay: f64 },
    WheelSpeedVelocity { average_speed: f64 },
}

/// Decide the ordered list of corrections for a record.
///
/// A full GPS fix is exclusive. Without one, the inertial and wheel-speed
/// corrections are independent and applied in that order, so wheel speed
/// overwrites whatever the acceleration just added to velocity.
pub fn plan_corrections(record: &MeasurementRecord) -> Vec<Correction> {
    if let Some(fix) = record.gps.as_ref() {
        return vec![Correction::Gps(fix.as_vector())];
    }

    let mut corrections = Vec::with_capacity(2);
    if let Some(accel) = record.accel.as_ref() {
        corrections.push(Correction::InertialVelocity {
            ax: accel.x,
            ay: accel.y,
        });
    }
    if let Some(wheels) = record.wheels.as_ref() {
        corrections.push(Correction::WheelSpeedVelocity {
            average_speed: wheels.mean(),
        });
    }
    corrections
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    GpsCorrected { lat: f64, lon: f64 },
    InertialVelocity { ax: f64, ay: f64, dt: f64 },
    WheelSpeedVelocity { average_speed: f64, dt: f64 },
    DeadReckoned,
    DtClamped { raw_dt: f64, dt: f64 },
    StateSeeded { lat: f64, lon: f64 },
}

// ─── Fusion driver ───────────────────────────────────────────────────────────

pub struct SensorFusion {
    config: FusionConfig,
    kf: Kf4d,
    last_timestamp: Option<f64>,
    last_dt: Option<f64>,
    steps: usize,
    seeded: bool,
}

impl SensorFusion {
    pub fn new(config: FusionConfig, measurement_noise: GpsPosNoise) -> Self {
        let kf = Kf4d::new(
            config.initial_variance,
            config.q_position,
            config.q_velocity,
            measurement_noise,
            config.epsilon,
        );
        Self {
            config,
            kf,
            last_timestamp: None,
            last_dt: None,
            steps: 0,
            seeded: false,
        }
    }

    /// Run one predict + correction cycle for a record.
    pub fn feed_record(
        &mut self,
        record: &MeasurementRecord,
    ) -> FusionResult<(PositionEstimate, Vec<FusionEvent>)> {
        let mut events = Vec::new();
        let now = record.timestamp.as_secs_f64();

        let dt = match self.last_timestamp {
            None => self.config.first_step_dt,
            Some(prev) => {
                let raw_dt = now - prev;
                if raw_dt > 0.0 {
                    raw_dt
                } else {
                    log::warn!(
                        "Non-positive dt {:.6}s at step {}, using {:.6}s",
                        raw_dt,
                        self.steps,
                        self.config.min_dt
                    );
                    events.push(FusionEvent::DtClamped {
                        raw_dt,
                        dt: self.config.min_dt,
                    });
                    self.config.min_dt
                }
            }
        };

        if self.config.initial_state == InitialState::FirstFix && !self.seeded {
            if let Some(fix) = record.gps.as_ref() {
                self.kf.seed_position(fix.latitude, fix.longitude);
                self.seeded = true;
                events.push(FusionEvent::StateSeeded {
                    lat: fix.latitude,
                    lon: fix.longitude,
                });
            }
        }

        self.kf.predict(dt);

        let corrections = plan_corrections(record);
        if corrections.is_empty() {
            events.push(FusionEvent::DeadReckoned);
        }
        for correction in corrections {
            match correction {
                Correction::Gps(z) => {
                    self.kf.update_gps(&z)?;
                    events.push(FusionEvent::GpsCorrected {
                        lat: z[0],
                        lon: z[1],
                    });
                }
                Correction::InertialVelocity { ax, ay } => {
                    self.kf.add_velocity(ax * dt, ay * dt);
                    events.push(FusionEvent::InertialVelocity { ax, ay, dt });
                }
                Correction::WheelSpeedVelocity { average_speed } => {
                    // No heading: the same scalar goes on both axes.
                    let v = average_speed * dt;
                    self.kf.set_velocity(v, v);
                    events.push(FusionEvent::WheelSpeedVelocity { average_speed, dt });
                }
            }
        }

        if self.config.reject_non_finite && !self.kf.is_finite() {
            return Err(FusionError::NonFiniteState { step: self.steps });
        }

        self.last_timestamp = Some(now);
        self.last_dt = Some(dt);
        self.steps += 1;

        let (latitude, longitude) = self.kf.position();
        Ok((
            PositionEstimate {
                latitude,
                longitude,
            },
            events,
        ))
    }

    pub fn filter(&self) -> &Kf4d {
        &self.kf
    }

    pub fn last_dt(&self) -> Option<f64> {
        self.last_dt
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }
}

// ─── Batch run ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BranchCounts {
    pub gps_updates: u64,
    pub inertial_updates: u64,
    pub wheel_speed_updates: u64,
    pub dead_reckoned: u64,
    pub dt_clamps: u64,
}

impl BranchCounts {
    fn record(&mut self, event: &FusionEvent) {
        match event {
            FusionEvent::GpsCorrected { .. } => self.gps_updates += 1,
            FusionEvent::InertialVelocity { .. } => self.inertial_updates += 1,
            FusionEvent::WheelSpeedVelocity { .. } => self.wheel_speed_updates += 1,
            FusionEvent::DeadReckoned => self.dead_reckoned += 1,
            FusionEvent::DtClamped { .. } => self.dt_clamps += 1,
            FusionEvent::StateSeeded { .. } => {}
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub records_processed: usize,
    pub branches: BranchCounts,
    pub final_state: Kf4dState,
    /// Haversine length of the estimated track, treating positions as degrees
    pub track_length_m: f64,
}

/// Fold the filter over an ordered batch, emitting one estimate per record.
///
/// The sink is finished only on success. On error the caller drops it, and
/// rows already pushed stay on disk.
pub fn run_batch<S: PositionSink + ?Sized>(
    records: &[MeasurementRecord],
    fusion: &mut SensorFusion,
    sink: &mut S,
) -> FusionResult<RunSummary> {
    log::info!("Fusing {} records", records.len());

    let mut branches = BranchCounts::default();
    let mut processed = 0;
    let mut track_length_m = 0.0;
    let mut previous: Option<Point<f64>> = None;

    for record in records {
        let (estimate, events) = fusion.feed_record(record)?;
        for event in &events {
            log::debug!("step {}: {:?}", fusion.steps(), event);
            branches.record(event);
        }
        sink.push(&estimate)?;
        processed += 1;

        let point = Point::new(estimate.longitude, estimate.latitude);
        if let Some(prev) = previous {
            track_length_m += prev.haversine_distance(&point);
        }
        previous = Some(point);
    }
    sink.finish()?;

    let summary = RunSummary {
        records_processed: processed,
        branches,
        final_state: fusion.filter().get_state(),
        track_length_m,
    };
    log::info!(
        "Processed {} records: {} GPS, {} inertial, {} wheel speed, {} dead reckoned",
        summary.records_processed,
        summary.branches.gps_updates,
        summary.branches.inertial_updates,
        summary.branches.wheel_speed_updates,
        summary.branches.dead_reckoned
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{read_movement, VecSink};
    use crate::types::{AccelSample, GpsFix, Timestamp, WheelSpeeds};
    use approx::assert_relative_eq;

    fn record(
        seconds: f64,
        gps: Option<(f64, f64)>,
        accel: Option<(f64, f64)>,
        wheel_speed: Option<f64>,
    ) -> MeasurementRecord {
        MeasurementRecord {
            timestamp: Timestamp::new(seconds, 0.0),
            gps: gps.map(|(latitude, longitude)| GpsFix {
                latitude,
                longitude,
            }),
            accel: accel.map(|(x, y)| AccelSample { x, y }),
            wheels: wheel_speed.map(|s| WheelSpeeds {
                left_front: s,
                right_front: s,
                left_back: s,
                right_back: s,
            }),
            has_latitude: true,
            has_longitude: gps.is_some(),
        }
    }

    fn fusion() -> SensorFusion {
        SensorFusion::new(FusionConfig::default(), GpsPosNoise::identity() * 1e-5)
    }

    #[test]
    fn test_gps_is_exclusive() {
        let r = record(0.0, Some((1.0, 2.0)), Some((1.0, 1.0)), Some(3.0));
        let plan = plan_corrections(&r);
        assert_eq!(plan, vec![Correction::Gps(GpsPosVec::new(1.0, 2.0))]);
    }

    #[test]
    fn test_fallbacks_are_ordered() {
        let r = record(0.0, None, Some((1.0, 1.0)), Some(3.0));
        let plan = plan_corrections(&r);
        assert_eq!(
            plan,
            vec![
                Correction::InertialVelocity { ax: 1.0, ay: 1.0 },
                Correction::WheelSpeedVelocity { average_speed: 3.0 },
            ]
        );
    }

    #[test]
    fn test_wheel_speed_overwrites_inertial() {
        let mut fusion = fusion();
        let r = MeasurementRecord {
            wheels: Some(WheelSpeeds {
                left_front: 4.0,
                right_front: 6.0,
                left_back: 5.0,
                right_back: 5.0,
            }),
            ..record(0.0, None, Some((2.0, 3.0)), None)
        };
        let (_, events) = fusion.feed_record(&r).unwrap();

        assert_eq!(fusion.filter().velocity(), (5.0, 5.0));
        assert!(matches!(events[0], FusionEvent::InertialVelocity { .. }));
        assert!(matches!(events[1], FusionEvent::WheelSpeedVelocity { .. }));
    }

    #[test]
    fn test_inertial_only_integrates() {
        let mut fusion = fusion();
        fusion
            .feed_record(&record(0.0, None, Some((2.0, 3.0)), None))
            .unwrap();
        assert_eq!(fusion.filter().velocity(), (2.0, 3.0));

        // Next predict carries the velocity into position
        fusion.feed_record(&record(0.5, None, None, None)).unwrap();
        let (lat, lon) = fusion.filter().position();
        assert_relative_eq!(lat, 1.0);
        assert_relative_eq!(lon, 1.5);
    }

    #[test]
    fn test_dead_reckoning_keeps_prediction() {
        let mut fusion = fusion();
        fusion
            .feed_record(&record(0.0, None, None, Some(2.0)))
            .unwrap();
        let trace_before = fusion.filter().covariance_trace();

        let (estimate, events) = fusion.feed_record(&record(2.0, None, None, None)).unwrap();
        assert_eq!(events, vec![FusionEvent::DeadReckoned]);
        // velocity 2.0 (avg 2 * dt 1) for dt 2
        assert_relative_eq!(estimate.latitude, 4.0);
        assert_relative_eq!(estimate.longitude, 4.0);
        assert!(fusion.filter().covariance_trace() > trace_before);
    }

    #[test]
    fn test_first_step_dt_ignores_timestamp() {
        let mut fusion = fusion();
        fusion
            .feed_record(&record(98_765.4321, None, None, Some(5.0)))
            .unwrap();
        assert_eq!(fusion.last_dt(), Some(1.0));
        assert_eq!(fusion.filter().velocity(), (5.0, 5.0));

        fusion
            .feed_record(&record(98_766.4321, Some((1.0, 1.0)), None, None))
            .unwrap();
        assert_relative_eq!(fusion.last_dt().unwrap(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_dropped_row_does_not_consume_dt() {
        let text = "Seconds,Nanoseconds,Latitude,Longitude,LinearAccel.x,LinearAccel.y,LeftFrontSpeed,RightFrontSpeed,LeftBackSpeed,RightBackSpeed\n\
            10,0,1.0,1.0,,,,,,\n\
            11,0,1.1,1.1,,,,,,\n\
            12,0,,,0.5,0.5,,,,\n\
            14,0,1.4,1.4,,,,,,\n\
            15,0,1.5,1.5,,,,,,\n";
        let log = read_movement(text.as_bytes(), "movement").unwrap();

        let mut fusion = fusion();
        let mut dts = Vec::new();
        for r in &log.records {
            fusion.feed_record(r).unwrap();
            dts.push(fusion.last_dt().unwrap());
        }
        assert_eq!(dts, vec![1.0, 1.0, 3.0, 1.0]);

        let mut fusion = self::fusion();
        let mut sink = VecSink::default();
        let summary = run_batch(&log.records, &mut fusion, &mut sink).unwrap();
        assert_eq!(sink.estimates.len(), 4);
        assert_eq!(summary.records_processed, 4);
        assert_eq!(summary.branches.gps_updates, 4);
    }

    #[test]
    fn test_duplicate_timestamp_is_clamped() {
        let mut fusion = fusion();
        fusion.feed_record(&record(1.0, Some((1.0, 1.0)), None, None)).unwrap();
        let (_, events) = fusion
            .feed_record(&record(1.0, Some((1.0, 1.0)), None, None))
            .unwrap();

        assert_eq!(fusion.last_dt(), Some(1e-3));
        assert!(events.contains(&FusionEvent::DtClamped { raw_dt: 0.0, dt: 1e-3 }));
    }

    #[test]
    fn test_first_fix_seeding() {
        let config = FusionConfig {
            initial_state: InitialState::FirstFix,
            ..FusionConfig::default()
        };
        let mut fusion = SensorFusion::new(config, GpsPosNoise::identity() * 1e-5);
        let (estimate, events) = fusion
            .feed_record(&record(0.0, Some((32.2, -110.9)), None, None))
            .unwrap();

        assert!(events.contains(&FusionEvent::StateSeeded {
            lat: 32.2,
            lon: -110.9
        }));
        assert_relative_eq!(estimate.latitude, 32.2, epsilon = 1e-9);
        assert_relative_eq!(fusion.filter().velocity().0, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_non_finite_state_is_fatal() {
        let mut fusion = fusion();
        fusion
            .feed_record(&record(0.0, None, Some((f64::MAX, 0.0)), None))
            .unwrap();
        let err = fusion
            .feed_record(&record(1.0, None, Some((f64::MAX, 0.0)), None))
            .unwrap_err();
        assert!(matches!(err, FusionError::NonFiniteState { step: 1 }));
    }

    #[test]
    fn test_summary_counts_only_this_batch() {
        let batch = vec![
            record(0.0, Some((1.0, 1.0)), None, None),
            record(1.0, None, None, None),
        ];
        let mut fusion = fusion();
        let mut sink = VecSink::default();
        run_batch(&batch, &mut fusion, &mut sink).unwrap();
        let second = run_batch(&batch[1..], &mut fusion, &mut sink).unwrap();

        assert_eq!(second.records_processed, 1);
        assert_eq!(fusion.steps(), 3);
        assert_eq!(sink.estimates.len(), 3);
    }

    #[test]
    fn test_failed_run_keeps_rows_written_so_far() {
        use crate::io::CsvPositionSink;

        let records = vec![
            record(0.0, Some((1.0, 2.0)), None, None),
            record(1.0, None, Some((f64::MAX, 0.0)), None),
            record(2.0, None, Some((f64::MAX, 0.0)), None),
        ];
        let path = std::env::temp_dir().join("position_fusion_partial_test.csv");

        let result = {
            let mut fusion = fusion();
            let mut sink = CsvPositionSink::create(&path).unwrap();
            run_batch(&records, &mut fusion, &mut sink)
        };
        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert!(matches!(result, Err(FusionError::NonFiniteState { step: 2 })));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Latitude,Longitude");
    }

    #[test]
    fn test_batch_is_deterministic() {
        let records: Vec<MeasurementRecord> = (0..50)
            .map(|i| {
                let t = i as f64 * 0.1;
                match i % 4 {
                    0 => record(t, None, Some((0.1, -0.2)), Some(1.5)),
                    1 => record(t, None, None, None),
                    _ => record(t, Some((32.0 + t * 1e-4, -110.0 - t * 1e-4)), None, None),
                }
            })
            .collect();

        let run = || {
            let mut fusion = fusion();
            let mut sink = VecSink::default();
            run_batch(&records, &mut fusion, &mut sink).unwrap();
            sink.estimates
        };
        let first = run();
        let second = run();
        assert_eq!(first.len(), 50);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.latitude.to_bits(), b.latitude.to_bits());
            assert_eq!(a.longitude.to_bits(), b.longitude.to_bits());
        }
    }
}
