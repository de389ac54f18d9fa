//! Experiment tracker contract

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Scheduled,
    Finished,
    Failed,
    Killed,
}

impl RunStatus {
    /// Wire name used by the tracking server
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Scheduled => "SCHEDULED",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
            RunStatus::Killed => "KILLED",
        }
    }
}

/// Identity of a started run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment_id: String,
    pub run_name: Option<String>,
    /// Root URI artifacts of this run are stored under
    pub artifact_uri: String,
    /// Milliseconds since the Unix epoch
    pub start_time: i64,
}

/// A backend that records runs, metrics, params and model artifacts.
///
/// Every call is a single request; nothing is retried.
pub trait ExperimentTracker: Send + Sync {
    /// Open a new run in the configured experiment, creating the experiment
    /// when it does not exist yet
    fn start_run(&self, run_name: Option<&str>) -> impl Future<Output = Result<RunInfo>> + Send;

    fn log_metric(&self, run: &RunInfo, key: &str, value: f64) -> impl Future<Output = Result<()>> + Send;

    fn log_param(&self, run: &RunInfo, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    /// Upload a serialized model under `artifact_path`; returns its URI
    fn log_model(
        &self,
        run: &RunInfo,
        artifact_path: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Register the model logged at `artifact_path` of `run` under `name`;
    /// returns the new version
    fn register_model(
        &self,
        name: &str,
        run: &RunInfo,
        artifact_path: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn end_run(&self, run: &RunInfo, status: RunStatus) -> impl Future<Output = Result<()>> + Send;

    /// Whether `register_model` is available on this backend
    fn supports_registry(&self) -> bool;
}

/// File name a model is stored under inside its artifact directory
pub const MODEL_ARTIFACT_FILE: &str = "model.bin";

/// Reject keys that would escape their directory or break a URL path
pub(crate) fn check_key(kind: &str, key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(crate::error::TrainerError::Validation(format!(
            "invalid {} name '{}'",
            kind, key
        )));
    }
    Ok(())
}
