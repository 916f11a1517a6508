use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;

use position_fusion_rs::calibration::calibrate_measurement_noise;
use position_fusion_rs::io::{load_movement_csv, load_stationary_csv, load_track_csv, CsvPositionSink};
use position_fusion_rs::query::{query_track, TrackTimes};
use position_fusion_rs::sensor_fusion::InitialState;
use position_fusion_rs::{run_batch, FusionConfig, SensorFusion};

#[derive(Parser, Debug)]
#[command(name = "position_fusion")]
#[command(about = "Kalman-filtered position track from GPS, IMU and wheel-speed logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fuse a movement log into a position track
    Fuse(FuseArgs),
    /// Look up the position at a given time in a fused track
    Query(QueryArgs),
}

/// Command-line names for the filter's starting state
#[derive(Clone, Copy, Debug, ValueEnum)]
enum InitialStateArg {
    Zero,
    FirstFix,
}

impl From<InitialStateArg> for InitialState {
    fn from(arg: InitialStateArg) -> Self {
        match arg {
            InitialStateArg::Zero => InitialState::Zero,
            InitialStateArg::FirstFix => InitialState::FirstFix,
        }
    }
}

#[derive(Args, Debug)]
struct FuseArgs {
    /// Stationary GPS log used for noise calibration
    #[arg(long, default_value = "data/stationary.csv")]
    stationary: PathBuf,

    /// Movement log (.csv or .csv.gz)
    #[arg(long, default_value = "data/movement.csv")]
    movement: PathBuf,

    /// Output position track
    #[arg(long, default_value = "data/position.csv")]
    output: PathBuf,

    /// JSON file with filter settings; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Initial state (zero, first-fix)
    #[arg(long, value_enum)]
    initial_state: Option<InitialStateArg>,

    /// Initial covariance diagonal
    #[arg(long)]
    initial_variance: Option<f64>,

    /// Position process noise
    #[arg(long)]
    q_position: Option<f64>,

    /// Velocity process noise
    #[arg(long)]
    q_velocity: Option<f64>,

    /// Regularization added to R and to the innovation covariance
    #[arg(long)]
    epsilon: Option<f64>,

    /// dt substituted for zero or negative timestamp steps (seconds)
    #[arg(long)]
    min_dt: Option<f64>,

    /// Also write the run summary JSON here
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Fused position track
    #[arg(long, default_value = "data/position.csv")]
    track: PathBuf,

    /// Time (seconds) to look up
    #[arg(long)]
    time: f64,

    /// Time of the first row, when the track has no Time column
    #[arg(long, requires = "interval")]
    start_time: Option<f64>,

    /// Seconds between rows, when the track has no Time column
    #[arg(long, requires = "start_time")]
    interval: Option<f64>,
}

fn load_config(args: &FuseArgs) -> Result<FusionConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => FusionConfig::default(),
    };

    if let Some(v) = args.initial_state {
        config.initial_state = v.into();
    }
    if let Some(v) = args.initial_variance {
        config.initial_variance = v;
    }
    if let Some(v) = args.q_position {
        config.q_position = v;
    }
    if let Some(v) = args.q_velocity {
        config.q_velocity = v;
    }
    if let Some(v) = args.epsilon {
        config.epsilon = v;
    }
    if let Some(v) = args.min_dt {
        config.min_dt = v;
    }
    Ok(config)
}

fn run_fuse(args: &FuseArgs) -> Result<()> {
    let config = load_config(args)?;
    log::info!("Filter config: {:?}", config);

    // Validate both inputs before touching the output file
    let stationary = load_stationary_csv(&args.stationary)
        .with_context(|| format!("loading {}", args.stationary.display()))?;
    let movement = load_movement_csv(&args.movement)
        .with_context(|| format!("loading {}", args.movement.display()))?;
    log::info!(
        "Loaded {} movement rows ({} dropped without position)",
        movement.total_rows,
        movement.dropped_rows
    );

    let r = calibrate_measurement_noise(&stationary, config.epsilon)?;
    let mut fusion = SensorFusion::new(config, r);

    let mut sink = CsvPositionSink::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let summary = run_batch(&movement.records, &mut fusion, &mut sink)?;

    let report = json!({
        "generated_at": Utc::now().to_rfc3339(),
        "movement": args.movement.display().to_string(),
        "output": args.output.display().to_string(),
        "rows_read": movement.total_rows,
        "rows_dropped": movement.dropped_rows,
        "summary": summary,
    });
    let text = serde_json::to_string_pretty(&report)?;
    if let Some(path) = args.summary.as_ref() {
        write_summary(path, &text)?;
    }
    println!("{}", text);
    Ok(())
}

fn write_summary(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).with_context(|| format!("writing summary {}", path.display()))
}

fn run_query(args: &QueryArgs) -> Result<()> {
    let track = load_track_csv(&args.track)
        .with_context(|| format!("loading {}", args.track.display()))?;
    let fallback = match (args.start_time, args.interval) {
        (Some(start), Some(interval)) => Some(TrackTimes::Uniform { start, interval }),
        _ => None,
    };

    let result = query_track(&track, args.time, fallback)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Fuse(args) => run_fuse(args),
        Command::Query(args) => run_query(args),
    }
}
