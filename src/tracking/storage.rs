//! Local file store for experiment tracking
//!
//! The directory layout is modelled on MLflow's file store. Run metadata is
//! JSON rather than MLflow's `meta.yaml`, so the MLflow UI cannot read it.
//!
//! ```text
//! <root>/<experiment_id>/meta.json
//! <root>/<experiment_id>/<run_id>/meta.json
//! <root>/<experiment_id>/<run_id>/metrics/<key>     "<timestamp_ms> <value> <step>" lines
//! <root>/<experiment_id>/<run_id>/params/<key>
//! <root>/<experiment_id>/<run_id>/artifacts/<path>/model.bin
//! ```

use super::tracker::{check_key, ExperimentTracker, RunInfo, RunStatus, MODEL_ARTIFACT_FILE};
use crate::error::{Result, TrainerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const DEFAULT_EXPERIMENT: &str = "Default";
const DEFAULT_EXPERIMENT_ID: &str = "0";
const META_FILE: &str = "meta.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExperimentMeta {
    experiment_id: String,
    name: String,
    artifact_location: String,
    lifecycle_stage: String,
    creation_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunMeta {
    run_id: String,
    experiment_id: String,
    run_name: Option<String>,
    status: RunStatus,
    start_time: i64,
    end_time: Option<i64>,
    artifact_uri: String,
    lifecycle_stage: String,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Tracker writing to a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalTracker {
    root: PathBuf,
    experiment_name: String,
}

impl LocalTracker {
    pub fn new(root: impl Into<PathBuf>, experiment_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            experiment_name: experiment_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run: &RunInfo) -> PathBuf {
        self.root.join(&run.experiment_id).join(&run.run_id)
    }

    /// Directory holding the artifacts of `run`
    pub fn artifact_dir(&self, run: &RunInfo) -> PathBuf {
        self.run_dir(run).join("artifacts")
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
        let bytes = fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)?;
        fs::write(path, json).await?;
        Ok(())
    }

    /// Id of the configured experiment, created on first use
    async fn experiment_id(&self) -> Result<String> {
        fs::create_dir_all(&self.root).await?;

        let mut max_id: i64 = -1;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta_path = entry.path().join(META_FILE);
            if !fs::try_exists(&meta_path).await.unwrap_or(false) {
                continue;
            }
            let meta: ExperimentMeta = Self::read_json(&meta_path).await?;
            if meta.name == self.experiment_name {
                return Ok(meta.experiment_id);
            }
            if let Ok(id) = meta.experiment_id.parse::<i64>() {
                max_id = max_id.max(id);
            }
        }

        let experiment_id = if self.experiment_name == DEFAULT_EXPERIMENT && max_id < 0 {
            DEFAULT_EXPERIMENT_ID.to_string()
        } else {
            (max_id + 1).max(1).to_string()
        };

        let dir = self.root.join(&experiment_id);
        fs::create_dir_all(&dir).await?;
        let meta = ExperimentMeta {
            experiment_id: experiment_id.clone(),
            name: self.experiment_name.clone(),
            artifact_location: dir.to_string_lossy().into_owned(),
            lifecycle_stage: "active".to_string(),
            creation_time: now_ms(),
        };
        Self::write_json(&dir.join(META_FILE), &meta).await?;
        debug!(experiment = %self.experiment_name, id = %experiment_id, "experiment created");

        Ok(experiment_id)
    }

    /// Load the stored metadata of a run
    pub async fn run_status(&self, run: &RunInfo) -> Result<RunStatus> {
        let meta: RunMeta = Self::read_json(&self.run_dir(run).join(META_FILE)).await?;
        Ok(meta.status)
    }
}

impl ExperimentTracker for LocalTracker {
    async fn start_run(&self, run_name: Option<&str>) -> Result<RunInfo> {
        let experiment_id = self.experiment_id().await?;
        let run_id = uuid::Uuid::new_v4().simple().to_string();

        let run_dir = self.root.join(&experiment_id).join(&run_id);
        for sub in ["metrics", "params", "artifacts"] {
            fs::create_dir_all(run_dir.join(sub)).await?;
        }

        let info = RunInfo {
            run_id: run_id.clone(),
            experiment_id: experiment_id.clone(),
            run_name: run_name.map(str::to_string),
            artifact_uri: run_dir.join("artifacts").to_string_lossy().into_owned(),
            start_time: now_ms(),
        };
        let meta = RunMeta {
            run_id,
            experiment_id,
            run_name: info.run_name.clone(),
            status: RunStatus::Running,
            start_time: info.start_time,
            end_time: None,
            artifact_uri: info.artifact_uri.clone(),
            lifecycle_stage: "active".to_string(),
        };
        Self::write_json(&run_dir.join(META_FILE), &meta).await?;

        Ok(info)
    }

    async fn log_metric(&self, run: &RunInfo, key: &str, value: f64) -> Result<()> {
        check_key("metric", key)?;
        let path = self.run_dir(run).join("metrics").join(key);
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(format!("{} {} 0\n", now_ms(), value).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn log_param(&self, run: &RunInfo, key: &str, value: &str) -> Result<()> {
        check_key("param", key)?;
        let path = self.run_dir(run).join("params").join(key);
        fs::write(path, value).await?;
        Ok(())
    }

    async fn log_model(&self, run: &RunInfo, artifact_path: &str, bytes: Vec<u8>) -> Result<String> {
        check_key("artifact", artifact_path)?;
        let dir = self.artifact_dir(run).join(artifact_path);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(MODEL_ARTIFACT_FILE);
        fs::write(&path, bytes).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn register_model(&self, name: &str, _run: &RunInfo, _artifact_path: &str) -> Result<String> {
        Err(TrainerError::Tracking(format!(
            "cannot register '{}': the local file store has no model registry",
            name
        )))
    }

    async fn end_run(&self, run: &RunInfo, status: RunStatus) -> Result<()> {
        let path = self.run_dir(run).join(META_FILE);
        let mut meta: RunMeta = Self::read_json(&path).await?;
        meta.status = status;
        meta.end_time = Some(now_ms());
        Self::write_json(&path, &meta).await
    }

    fn supports_registry(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_layout() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = LocalTracker::new(dir.path(), "Default");

        let run = tracker.start_run(Some("train")).await.unwrap();
        assert_eq!(run.experiment_id, "0");

        tracker.log_metric(&run, "f1_score", 0.75).await.unwrap();
        tracker.log_metric(&run, "f1_score", 0.8).await.unwrap();
        tracker.log_param(&run, "criterion", "gini").await.unwrap();
        tracker.log_model(&run, "model", vec![1, 2, 3]).await.unwrap();
        tracker.end_run(&run, RunStatus::Finished).await.unwrap();

        let run_dir = dir.path().join("0").join(&run.run_id);
        let metric = std::fs::read_to_string(run_dir.join("metrics/f1_score")).unwrap();
        let lines: Vec<&str> = metric.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" 0.75 0"));
        assert_eq!(std::fs::read_to_string(run_dir.join("params/criterion")).unwrap(), "gini");
        assert_eq!(std::fs::read(run_dir.join("artifacts/model/model.bin")).unwrap(), vec![1, 2, 3]);
        assert_eq!(tracker.run_status(&run).await.unwrap(), RunStatus::Finished);
    }

    #[tokio::test]
    async fn test_experiments_reused_and_numbered() {
        let dir = tempfile::tempdir().unwrap();
        let default = LocalTracker::new(dir.path(), "Default");
        let other = LocalTracker::new(dir.path(), "phishing");

        let a = default.start_run(None).await.unwrap();
        let b = other.start_run(None).await.unwrap();
        let c = other.start_run(None).await.unwrap();

        assert_eq!(a.experiment_id, "0");
        assert_eq!(b.experiment_id, "1");
        assert_eq!(c.experiment_id, "1");
        assert_ne!(b.run_id, c.run_id);
    }

    #[tokio::test]
    async fn test_no_registry() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = LocalTracker::new(dir.path(), "Default");
        let run = tracker.start_run(None).await.unwrap();
        assert!(!tracker.supports_registry());
        assert!(tracker.register_model("m", &run, "model").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = LocalTracker::new(dir.path(), "Default");
        let run = tracker.start_run(None).await.unwrap();
        assert!(tracker.log_param(&run, "../x", "1").await.is_err());
    }
}
