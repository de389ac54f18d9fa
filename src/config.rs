//! Trainer and tracking configuration

use crate::error::{Result, TrainerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the raw model copy picked up by the pusher stage.
pub const FINAL_MODEL_FILE_PATH: &str = "final_model/model.bin";

/// Conventional file name of the bundled model under the artifact directory.
pub const TRAINED_MODEL_FILE_NAME: &str = "model.bin";

/// Configuration for the model training stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTrainerConfig {
    /// Where the preprocessor + model bundle is written
    pub trained_model_file_path: PathBuf,
    /// Where the bare winning model is written
    pub final_model_file_path: PathBuf,
    /// Minimum acceptable test f1 before a warning is raised
    pub expected_score: f64,
    /// Largest tolerated gap between train and test f1
    pub overfitting_threshold: f64,
    /// Folds used by the grid search
    pub cv_folds: usize,
    /// Seed shared by every stochastic estimator
    pub random_state: u64,
    /// Size of the rayon pool used while fitting (None = rayon default)
    pub n_jobs: Option<usize>,
}

impl Default for ModelTrainerConfig {
    fn default() -> Self {
        Self::from_artifact_dir("artifacts")
    }
}

impl ModelTrainerConfig {
    /// Build the conventional layout `<dir>/model_trainer/trained_model/model.bin`
    pub fn from_artifact_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            trained_model_file_path: dir
                .as_ref()
                .join("model_trainer")
                .join("trained_model")
                .join(TRAINED_MODEL_FILE_NAME),
            final_model_file_path: PathBuf::from(FINAL_MODEL_FILE_PATH),
            expected_score: 0.6,
            overfitting_threshold: 0.05,
            cv_folds: 3,
            random_state: 42,
            n_jobs: None,
        }
    }

    /// Load from a JSON file; missing fields fall back to defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_trained_model_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.trained_model_file_path = path.into();
        self
    }

    pub fn with_final_model_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.final_model_file_path = path.into();
        self
    }

    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn with_expected_score(mut self, score: f64) -> Self {
        self.expected_score = score;
        self
    }

    pub fn with_n_jobs(mut self, n_jobs: usize) -> Self {
        self.n_jobs = Some(n_jobs);
        self
    }

    /// Reject values that would make the run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.cv_folds < 2 {
            return Err(TrainerError::Config(format!(
                "cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        if !(0.0..=1.0).contains(&self.expected_score) {
            return Err(TrainerError::Config(format!(
                "expected_score must lie in [0, 1], got {}",
                self.expected_score
            )));
        }
        if self.overfitting_threshold < 0.0 {
            return Err(TrainerError::Config(
                "overfitting_threshold must be non-negative".to_string(),
            ));
        }
        if self.trained_model_file_path.as_os_str().is_empty() {
            return Err(TrainerError::Config(
                "trained_model_file_path is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Environment variable names understood by [`TrackingConfig::from_env`]
pub mod env {
    pub const TRACKING_URI: &str = "MLFLOW_TRACKING_URI";
    pub const REGISTRY_URI: &str = "MLFLOW_REGISTRY_URI";
    pub const USERNAME: &str = "MLFLOW_TRACKING_USERNAME";
    pub const PASSWORD: &str = "MLFLOW_TRACKING_PASSWORD";
    pub const TOKEN: &str = "MLFLOW_TRACKING_TOKEN";
    pub const EXPERIMENT_NAME: &str = "MLFLOW_EXPERIMENT_NAME";
}

/// Experiment tracker connection settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// `http(s)://` for a tracking server, `file://` or a bare path for a local store
    pub tracking_uri: String,
    /// Model registry endpoint (defaults to the tracking URI)
    pub registry_uri: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub experiment_name: String,
    pub registered_model_name: String,
    /// Request timeout for the REST client
    pub timeout_secs: u64,
}

// Credentials stay out of logs.
impl std::fmt::Debug for TrackingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingConfig")
            .field("tracking_uri", &self.tracking_uri)
            .field("registry_uri", &self.registry_uri)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("experiment_name", &self.experiment_name)
            .field("registered_model_name", &self.registered_model_name)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tracking_uri: "./mlruns".to_string(),
            registry_uri: None,
            username: None,
            password: None,
            token: None,
            experiment_name: "Default".to_string(),
            registered_model_name: "Best_Classification_Model".to_string(),
            timeout_secs: 60,
        }
    }
}

impl TrackingConfig {
    /// Local file store rooted at `dir`
    pub fn local(dir: impl AsRef<Path>) -> Self {
        Self {
            tracking_uri: dir.as_ref().to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    /// Read settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            tracking_uri: non_empty(env::TRACKING_URI).unwrap_or(defaults.tracking_uri),
            registry_uri: non_empty(env::REGISTRY_URI),
            username: non_empty(env::USERNAME),
            password: non_empty(env::PASSWORD),
            token: non_empty(env::TOKEN),
            experiment_name: non_empty(env::EXPERIMENT_NAME).unwrap_or(defaults.experiment_name),
            ..defaults
        }
    }

    pub fn with_experiment_name(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = name.into();
        self
    }

    pub fn with_registered_model_name(mut self, name: impl Into<String>) -> Self {
        self.registered_model_name = name.into();
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Scheme of the tracking URI; bare paths count as `file`
    pub fn tracking_scheme(&self) -> String {
        scheme_of(&self.tracking_uri)
    }

    /// Scheme of the registry URI, falling back to the tracking URI
    pub fn registry_scheme(&self) -> String {
        scheme_of(self.registry_uri.as_deref().unwrap_or(&self.tracking_uri))
    }

    /// Filesystem root for a `file` tracking URI
    pub fn local_root(&self) -> Result<PathBuf> {
        if self.tracking_scheme() != "file" {
            return Err(TrainerError::Config(format!(
                "tracking URI '{}' is not a local store",
                self.tracking_uri
            )));
        }
        match url::Url::parse(&self.tracking_uri) {
            Ok(parsed) if parsed.scheme() == "file" => parsed.to_file_path().map_err(|_| {
                TrainerError::Config(format!("invalid file URI '{}'", self.tracking_uri))
            }),
            _ => Ok(PathBuf::from(&self.tracking_uri)),
        }
    }
}

fn scheme_of(uri: &str) -> String {
    match url::Url::parse(uri) {
        // Single-letter schemes are Windows drive letters
        Ok(parsed) if parsed.scheme().len() > 1 => parsed.scheme().to_string(),
        _ => "file".to_string(),
    }
}
