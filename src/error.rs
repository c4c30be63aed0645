// error.rs - Error taxonomy for reading, analysis and sweep orchestration

use std::path::PathBuf;

use thiserror::Error;

/// Every failure the crate can report.
///
/// Per-point variants (`NotFound` … `Process`, `Cancelled`) are downgraded to a
/// recorded failure by the sweep engine; `Config` aborts a sweep before dispatch.
#[derive(Error, Debug)]
pub enum SqmError {
    /// Data file does not exist
    #[error("data file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Data file exists but has zero length
    #[error("data file is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    /// Corrupt header, out-of-range lattice size or truncated record
    #[error("format error: {0}")]
    Format(String),

    /// Too few samples for the requested estimator
    #[error("statistical error: {0}")]
    Statistical(String),

    /// External simulation binary exited unsuccessfully
    #[error("simulation exited with {status}: {stderr}")]
    Process { status: String, stderr: String },

    /// Invalid sweep or run configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Job was stopped by an interrupt
    #[error("cancelled")]
    Cancelled,

    /// Worker pool or interrupt handler could not be set up
    #[error("runtime setup error: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, SqmError>;
