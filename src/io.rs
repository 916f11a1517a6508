// io.rs — CSV ingestion and output for the batch position filter
//
// Column names are the external contract:
//   movement:   Seconds, Nanoseconds, Latitude, Longitude, LinearAccel.x,
//               LinearAccel.y, LeftFrontSpeed, RightFrontSpeed, LeftBackSpeed,
//               RightBackSpeed
//   stationary: Latitude, Longitude
//   output:     Latitude, Longitude (optional Time when read back for queries)

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::{Deserialize, Deserializer};

use crate::error::{FusionError, FusionResult};
use crate::types::{GpsFix, MeasurementRecord, PositionEstimate, Timestamp};

pub const MOVEMENT_COLUMNS: [&str; 10] = [
    "Seconds",
    "Nanoseconds",
    "Latitude",
    "Longitude",
    "LinearAccel.x",
    "LinearAccel.y",
    "LeftFrontSpeed",
    "RightFrontSpeed",
    "LeftBackSpeed",
    "RightBackSpeed",
];

pub const POSITION_COLUMNS: [&str; 2] = ["Latitude", "Longitude"];

// ─── Cell parsing ────────────────────────────────────────────────────────────

/// Empty, `nan` and `null` cells are absent; anything else must parse.
fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    match opt {
        None => Ok(None),
        Some(s) => {
            let t = s.trim();
            if t.is_empty() || t.eq_ignore_ascii_case("nan") || t.eq_ignore_ascii_case("null") {
                return Ok(None);
            }
            t.parse::<f64>().map(Some).map_err(serde::de::Error::custom)
        }
    }
}

#[derive(Debug, Deserialize)]
struct MovementRow {
    #[serde(rename = "Seconds", default, deserialize_with = "de_opt_f64")]
    seconds: Option<f64>,
    #[serde(rename = "Nanoseconds", default, deserialize_with = "de_opt_f64")]
    nanoseconds: Option<f64>,
    #[serde(rename = "Latitude", default, deserialize_with = "de_opt_f64")]
    latitude: Option<f64>,
    #[serde(rename = "Longitude", default, deserialize_with = "de_opt_f64")]
    longitude: Option<f64>,
    #[serde(rename = "LinearAccel.x", default, deserialize_with = "de_opt_f64")]
    accel_x: Option<f64>,
    #[serde(rename = "LinearAccel.y", default, deserialize_with = "de_opt_f64")]
    accel_y: Option<f64>,
    #[serde(rename = "LeftFrontSpeed", default, deserialize_with = "de_opt_f64")]
    left_front: Option<f64>,
    #[serde(rename = "RightFrontSpeed", default, deserialize_with = "de_opt_f64")]
    right_front: Option<f64>,
    #[serde(rename = "LeftBackSpeed", default, deserialize_with = "de_opt_f64")]
    left_back: Option<f64>,
    #[serde(rename = "RightBackSpeed", default, deserialize_with = "de_opt_f64")]
    right_back: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PositionRow {
    #[serde(rename = "Time", default, deserialize_with = "de_opt_f64")]
    time: Option<f64>,
    #[serde(rename = "Latitude", default, deserialize_with = "de_opt_f64")]
    latitude: Option<f64>,
    #[serde(rename = "Longitude", default, deserialize_with = "de_opt_f64")]
    longitude: Option<f64>,
}

// ─── Readers ─────────────────────────────────────────────────────────────────

/// Open a path for reading, decompressing `.gz` files on the fly.
pub fn open_input(path: &Path) -> FusionResult<Box<dyn Read>> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

/// Read the header record, treating a zero-byte input as empty rather than
/// as a table missing every column.
fn read_headers<R: Read>(
    rdr: &mut csv::Reader<R>,
    source_name: &str,
) -> FusionResult<csv::StringRecord> {
    let headers = rdr.headers().map_err(|e| malformed(0, e))?.clone();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(FusionError::EmptyInput(source_name.to_string()));
    }
    Ok(headers)
}

fn require_columns(
    headers: &csv::StringRecord,
    required: &[&str],
    source_name: &str,
) -> FusionResult<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(FusionError::MissingColumns {
            source_name: source_name.to_string(),
            columns: missing,
        })
    }
}

fn malformed(row: usize, err: csv::Error) -> FusionError {
    FusionError::Malformed {
        row,
        message: err.to_string(),
    }
}

/// Movement log after the drop pass
#[derive(Debug, Clone)]
pub struct MovementLog {
    pub records: Vec<MeasurementRecord>,
    pub total_rows: usize,
    pub dropped_rows: usize,
}

/// Parse a movement table. Rows with both coordinates absent are dropped here
/// and never reach the filter.
pub fn read_movement<R: Read>(reader: R, source_name: &str) -> FusionResult<MovementLog> {
    let mut rdr = csv_reader(reader);
    let headers = read_headers(&mut rdr, source_name)?;
    require_columns(&headers, &MOVEMENT_COLUMNS, source_name)?;

    let mut records = Vec::new();
    let mut total_rows = 0;
    let mut dropped_rows = 0;

    for (i, result) in rdr.deserialize::<MovementRow>().enumerate() {
        let row_number = i + 1;
        let row = result.map_err(|e| malformed(row_number, e))?;
        total_rows += 1;

        // Drop before looking at anything else in the row
        let has_latitude = row.latitude.is_some_and(f64::is_finite);
        let has_longitude = row.longitude.is_some_and(f64::is_finite);
        if !has_latitude && !has_longitude {
            log::debug!("Dropping row {} (no latitude or longitude)", row_number);
            dropped_rows += 1;
            continue;
        }

        let (seconds, nanoseconds) = match (row.seconds, row.nanoseconds) {
            (Some(s), Some(ns)) => (s, ns),
            _ => {
                return Err(FusionError::Malformed {
                    row: row_number,
                    message: "missing Seconds/Nanoseconds".to_string(),
                })
            }
        };

        records.push(MeasurementRecord::from_columns(
            Timestamp::new(seconds, nanoseconds),
            row.latitude,
            row.longitude,
            row.accel_x,
            row.accel_y,
            [row.left_front, row.right_front, row.left_back, row.right_back],
        ));
    }

    if total_rows == 0 {
        return Err(FusionError::EmptyInput(source_name.to_string()));
    }
    if records.is_empty() {
        log::warn!("Every row of {} lacks a position; output will be empty", source_name);
    }

    Ok(MovementLog {
        records,
        total_rows,
        dropped_rows,
    })
}

pub fn load_movement_csv(path: &Path) -> FusionResult<MovementLog> {
    let reader = open_input(path)?;
    read_movement(reader, &path.display().to_string())
}

/// Parse a stationary calibration table. Missing cells become NaN and are
/// skipped by the calibrator.
pub fn read_stationary<R: Read>(reader: R, source_name: &str) -> FusionResult<Vec<GpsFix>> {
    let mut rdr = csv_reader(reader);
    let headers = read_headers(&mut rdr, source_name)?;
    require_columns(&headers, &POSITION_COLUMNS, source_name)?;

    let mut samples = Vec::new();
    for (i, result) in rdr.deserialize::<PositionRow>().enumerate() {
        let row = result.map_err(|e| malformed(i + 1, e))?;
        samples.push(GpsFix {
            latitude: row.latitude.unwrap_or(f64::NAN),
            longitude: row.longitude.unwrap_or(f64::NAN),
        });
    }

    if samples.is_empty() {
        return Err(FusionError::EmptyInput(source_name.to_string()));
    }
    Ok(samples)
}

pub fn load_stationary_csv(path: &Path) -> FusionResult<Vec<GpsFix>> {
    let reader = open_input(path)?;
    read_stationary(reader, &path.display().to_string())
}

/// Filter output read back for time queries
#[derive(Debug, Clone)]
pub struct PositionTrack {
    /// Present when the table carries a `Time` column
    pub times: Option<Vec<f64>>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
}

impl PositionTrack {
    pub fn len(&self) -> usize {
        self.latitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latitudes.is_empty()
    }
}

pub fn read_track<R: Read>(reader: R, source_name: &str) -> FusionResult<PositionTrack> {
    let mut rdr = csv_reader(reader);
    let headers = read_headers(&mut rdr, source_name)?;
    require_columns(&headers, &POSITION_COLUMNS, source_name)?;
    let has_time = headers.iter().any(|h| h == "Time");

    let mut times = Vec::new();
    let mut latitudes = Vec::new();
    let mut longitudes = Vec::new();
    for (i, result) in rdr.deserialize::<PositionRow>().enumerate() {
        let row_number = i + 1;
        let row = result.map_err(|e| malformed(row_number, e))?;
        let (lat, lon) = match (row.latitude, row.longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(FusionError::Malformed {
                    row: row_number,
                    message: "track rows need both Latitude and Longitude".to_string(),
                })
            }
        };
        if has_time {
            let t = row.time.ok_or_else(|| FusionError::Malformed {
                row: row_number,
                message: "missing Time".to_string(),
            })?;
            times.push(t);
        }
        latitudes.push(lat);
        longitudes.push(lon);
    }

    if latitudes.is_empty() {
        return Err(FusionError::EmptyInput(source_name.to_string()));
    }

    Ok(PositionTrack {
        times: has_time.then_some(times),
        latitudes,
        longitudes,
    })
}

pub fn load_track_csv(path: &Path) -> FusionResult<PositionTrack> {
    let reader = open_input(path)?;
    read_track(reader, &path.display().to_string())
}

// ─── Position sinks ──────────────────────────────────────────────────────────

/// Destination for the per-record position estimates.
pub trait PositionSink {
    fn push(&mut self, estimate: &PositionEstimate) -> FusionResult<()>;

    /// Flush everything written so far. Called once at the end of a run.
    fn finish(&mut self) -> FusionResult<()>;
}

/// In-memory sink
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    pub estimates: Vec<PositionEstimate>,
}

impl PositionSink for VecSink {
    fn push(&mut self, estimate: &PositionEstimate) -> FusionResult<()> {
        self.estimates.push(*estimate);
        Ok(())
    }

    fn finish(&mut self) -> FusionResult<()> {
        Ok(())
    }
}

/// CSV sink holding one writer for the whole run.
///
/// The header is written on construction. The inner `csv::Writer` flushes
/// its buffer when dropped, so an early error still leaves the rows pushed
/// so far on disk.
pub struct CsvPositionSink<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl<W: Write> CsvPositionSink<W> {
    pub fn new(inner: W) -> FusionResult<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(POSITION_COLUMNS)?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> FusionResult<W> {
        self.writer
            .into_inner()
            .map_err(|e| FusionError::Io(e.into_error()))
    }
}

impl CsvPositionSink<File> {
    /// Truncate/create the output file.
    pub fn create(path: &Path) -> FusionResult<Self> {
        Self::new(File::create(path)?)
    }
}

impl<W: Write> PositionSink for CsvPositionSink<W> {
    fn push(&mut self, estimate: &PositionEstimate) -> FusionResult<()> {
        self.writer.serialize(estimate)?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> FusionResult<()> {
        self.writer.flush()?;
        log::debug!("Flushed {} position rows", self.rows);
        Ok(())
    }
}
