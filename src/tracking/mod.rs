//! Experiment tracking
//!
//! Records training runs (metrics, parameters and the model artifact) either
//! on an MLflow tracking server or in a local MLflow-style file store.

mod mlflow;
mod storage;
mod tracker;

pub use mlflow::MlflowClient;
pub use storage::LocalTracker;
pub use tracker::{ExperimentTracker, RunInfo, RunStatus, MODEL_ARTIFACT_FILE};

use crate::config::TrackingConfig;
use crate::error::Result;
use tracing::info;

/// Tracker chosen at runtime from the tracking URI
#[derive(Debug, Clone)]
pub enum Tracker {
    Local(LocalTracker),
    Mlflow(MlflowClient),
}

/// `file` URIs (and bare paths) get the local store, anything else the REST client
pub fn tracker_from_config(config: &TrackingConfig) -> Result<Tracker> {
    let tracker = if config.tracking_scheme() == "file" {
        Tracker::Local(LocalTracker::new(config.local_root()?, config.experiment_name.clone()))
    } else {
        Tracker::Mlflow(MlflowClient::new(config)?)
    };
    info!(
        backend = match &tracker {
            Tracker::Local(_) => "local",
            Tracker::Mlflow(_) => "mlflow",
        },
        uri = %config.tracking_uri,
        experiment = %config.experiment_name,
        "experiment tracker ready"
    );
    Ok(tracker)
}

impl ExperimentTracker for Tracker {
    async fn start_run(&self, run_name: Option<&str>) -> Result<RunInfo> {
        match self {
            Tracker::Local(t) => t.start_run(run_name).await,
            Tracker::Mlflow(t) => t.start_run(run_name).await,
        }
    }

    async fn log_metric(&self, run: &RunInfo, key: &str, value: f64) -> Result<()> {
        match self {
            Tracker::Local(t) => t.log_metric(run, key, value).await,
            Tracker::Mlflow(t) => t.log_metric(run, key, value).await,
        }
    }

    async fn log_param(&self, run: &RunInfo, key: &str, value: &str) -> Result<()> {
        match self {
            Tracker::Local(t) => t.log_param(run, key, value).await,
            Tracker::Mlflow(t) => t.log_param(run, key, value).await,
        }
    }

    async fn log_model(&self, run: &RunInfo, artifact_path: &str, bytes: Vec<u8>) -> Result<String> {
        match self {
            Tracker::Local(t) => t.log_model(run, artifact_path, bytes).await,
            Tracker::Mlflow(t) => t.log_model(run, artifact_path, bytes).await,
        }
    }

    async fn register_model(&self, name: &str, run: &RunInfo, artifact_path: &str) -> Result<String> {
        match self {
            Tracker::Local(t) => t.register_model(name, run, artifact_path).await,
            Tracker::Mlflow(t) => t.register_model(name, run, artifact_path).await,
        }
    }

    async fn end_run(&self, run: &RunInfo, status: RunStatus) -> Result<()> {
        match self {
            Tracker::Local(t) => t.end_run(run, status).await,
            Tracker::Mlflow(t) => t.end_run(run, status).await,
        }
    }

    fn supports_registry(&self) -> bool {
        match self {
            Tracker::Local(t) => t.supports_registry(),
            Tracker::Mlflow(t) => t.supports_registry(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_selection() {
        let local = tracker_from_config(&TrackingConfig::local("/tmp/mlruns")).unwrap();
        assert!(matches!(local, Tracker::Local(_)));

        let file_uri = TrackingConfig {
            tracking_uri: "file:///tmp/mlruns".into(),
            ..Default::default()
        };
        match tracker_from_config(&file_uri).unwrap() {
            Tracker::Local(t) => assert_eq!(t.root(), std::path::Path::new("/tmp/mlruns")),
            Tracker::Mlflow(_) => panic!("file URI must use the local store"),
        }

        let remote = TrackingConfig {
            tracking_uri: "https://dagshub.com/user/repo.mlflow".into(),
            ..Default::default()
        };
        let tracker = tracker_from_config(&remote).unwrap();
        assert!(matches!(tracker, Tracker::Mlflow(_)));
        assert!(tracker.supports_registry());
    }
}
