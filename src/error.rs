//! Error types for the model trainer
//!
//! `TrainerError` is the differentiated error used inside the crate.
//! `PipelineError` is what the public stage methods hand back: every failure
//! is wrapped once, tagged with the stage and the place it was caught.

use std::fmt;
use std::panic::Location;
use thiserror::Error;

/// Result type alias for trainer operations
pub type Result<T> = std::result::Result<T, TrainerError>;

/// Main error type for the trainer internals
#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("Data error: {0}")]
    Data(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    Shape { expected: String, actual: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Training error: {0}")]
    Training(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Tracking error: {0}")]
    Tracking(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<polars::error::PolarsError> for TrainerError {
    fn from(err: polars::error::PolarsError) -> Self {
        TrainerError::Data(err.to_string())
    }
}

impl From<serde_json::Error> for TrainerError {
    fn from(err: serde_json::Error) -> Self {
        TrainerError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for TrainerError {
    fn from(err: bincode::Error) -> Self {
        TrainerError::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for TrainerError {
    fn from(err: ndarray::ShapeError) -> Self {
        TrainerError::Shape {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

/// Stage-tagged error returned by the public pipeline methods.
#[derive(Debug)]
pub struct PipelineError {
    stage: &'static str,
    file: &'static str,
    line: u32,
    source: TrainerError,
}

impl PipelineError {
    /// Wrap `source`, recording the caller's location.
    #[track_caller]
    pub fn new(stage: &'static str, source: TrainerError) -> Self {
        let location = Location::caller();
        Self {
            stage,
            file: location.file(),
            line: location.line(),
            source,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn file(&self) -> &'static str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// The underlying cause
    pub fn cause(&self) -> &TrainerError {
        &self.source
    }

    pub fn into_cause(self) -> TrainerError {
        self.source
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error in stage [{}] at {}:{}: {}",
            self.stage, self.file, self.line, self.source
        )
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Extension for tagging a `Result` with its pipeline stage.
pub trait StageContext<T> {
    fn stage(self, stage: &'static str) -> std::result::Result<T, PipelineError>;
}

impl<T> StageContext<T> for Result<T> {
    #[track_caller]
    fn stage(self, stage: &'static str) -> std::result::Result<T, PipelineError> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(PipelineError::new(stage, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = TrainerError::Data("test error".to_string());
        assert_eq!(err.to_string(), "Data error: test error");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TrainerError = io_err.into();
        assert!(matches!(err, TrainerError::Io(_)));
    }

    #[test]
    fn test_pipeline_error_records_location() {
        let result: Result<()> = Err(TrainerError::ModelNotFitted);
        let line = line!() + 1;
        let err = result.stage("model_trainer").unwrap_err();

        assert_eq!(err.stage(), "model_trainer");
        assert_eq!(err.line(), line);
        assert!(err.file().ends_with("error.rs"));
        assert!(err.to_string().contains("Model not fitted"));
        assert!(err.source().is_some());
    }
}
