//! Error types for the Taskflow orchestrator core

use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    /// Workflow/DAG failed validation before any job ran
    #[error("validation failed: {0}")]
    Validation(String),

    /// Resource manager refused to admit a job
    #[error("admission denied: {0}")]
    AdmissionDenied(String),

    /// A single job attempt failed (recovered locally via retry policy)
    #[error("execution failed: {0}")]
    Execution(String),

    /// External cancellation was requested
    #[error("execution was cancelled")]
    Cancelled,

    /// Unexpected failure inside a subsystem, not attributable to one job
    #[error("subsystem error: {0}")]
    Subsystem(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors (process spawn, temp file, etc.)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP job kind transport errors
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic wrapper for errors that don't need their own variant
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias used throughout the workspace
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether retrying the operation that produced this error could help
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Execution(_) | Error::Http(_) | Error::Io(_))
    }
}
