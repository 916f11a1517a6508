use thiserror::Error;

/// Position fusion error types
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Missing columns in {source_name}: {}", .columns.join(", "))]
    MissingColumns {
        source_name: String,
        columns: Vec<String>,
    },

    #[error("Malformed input at row {row}: {message}")]
    Malformed { row: usize, message: String },

    #[error("No data rows in {0}")]
    EmptyInput(String),

    #[error("Calibration requires at least one stationary sample")]
    EmptyCalibration,

    #[error("Innovation covariance is singular")]
    SingularInnovation,

    #[error("State became non-finite at step {step}")]
    NonFiniteState { step: usize },

    #[error("Time interval must be positive, got {0}")]
    InvalidInterval(f64),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for fusion operations
pub type FusionResult<T> = Result<T, FusionError>;
