//! Model training stage
//!
//! Takes the transformed train/test arrays, tunes and compares the candidate
//! classifiers, records the winner with the experiment tracker and persists
//! it bundled with the fitted preprocessor.

use crate::config::{ModelTrainerConfig, TrackingConfig};
use crate::entity::{ClassificationMetricArtifact, DataTransformationArtifact, ModelTrainerArtifact};
use crate::error::{PipelineError, Result, StageContext, TrainerError};
use crate::export::{load_object, save_object, to_bytes, ModelBundle, ModelMetadata};
use crate::preprocessing::Preprocessor;
use crate::tracking::{tracker_from_config, ExperimentTracker, RunInfo, RunStatus, Tracker};
use crate::training::{
    default_candidates, evaluate_models, get_classification_score, Candidate, Classifier, EvaluatedModel,
    GridSearchCV, ModelReport,
};
use crate::utils::{load_numeric_array, split_features_target};
use ndarray::{Array1, Array2};
use tracing::{error, info, warn};

/// Stage name attached to every error this stage returns
pub const STAGE: &str = "model_trainer";

/// Artifact path the model is logged under in each run
pub const MODEL_ARTIFACT_PATH: &str = "model";

/// The model training stage
pub struct ModelTrainer<T: ExperimentTracker> {
    config: ModelTrainerConfig,
    data_transformation_artifact: DataTransformationArtifact,
    tracker: T,
    registered_model_name: String,
    candidates: Vec<Candidate>,
}

impl ModelTrainer<Tracker> {
    /// Build the stage with the tracker described by `tracking`
    pub fn from_tracking_config(
        config: ModelTrainerConfig,
        data_transformation_artifact: DataTransformationArtifact,
        tracking: &TrackingConfig,
    ) -> std::result::Result<Self, PipelineError> {
        let tracker = tracker_from_config(tracking).stage(STAGE)?;
        Ok(Self::new(config, data_transformation_artifact, tracker)
            .with_registered_model_name(tracking.registered_model_name.clone()))
    }
}

impl<T: ExperimentTracker> ModelTrainer<T> {
    pub fn new(config: ModelTrainerConfig, data_transformation_artifact: DataTransformationArtifact, tracker: T) -> Self {
        let candidates = default_candidates(config.random_state);
        Self {
            config,
            data_transformation_artifact,
            tracker,
            registered_model_name: TrackingConfig::default().registered_model_name,
            candidates,
        }
    }

    /// Replace the candidate table
    pub fn with_candidates(mut self, candidates: Vec<Candidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_registered_model_name(mut self, name: impl Into<String>) -> Self {
        self.registered_model_name = name.into();
        self
    }

    pub fn config(&self) -> &ModelTrainerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Record one evaluation of `model` as a tracker run.
    ///
    /// Logs the three metrics and the model's hyperparameters, uploads the
    /// serialized model and, on backends with a registry, registers it. The
    /// run is closed as FINISHED, or FAILED when any call failed; in that
    /// case the failure is still returned.
    pub async fn track_experiment(
        &self,
        model: &EvaluatedModel,
        metrics: &ClassificationMetricArtifact,
        tag: &str,
    ) -> std::result::Result<RunInfo, PipelineError> {
        let run = self.tracker.start_run(Some(tag)).await.stage(STAGE)?;
        info!(run_id = %run.run_id, model = %model.name, tag, "tracking run started");

        let outcome = self.log_run(&run, model, metrics).await;
        let status = if outcome.is_ok() {
            RunStatus::Finished
        } else {
            RunStatus::Failed
        };

        let closed = self.tracker.end_run(&run, status).await;
        match (outcome, closed) {
            (Ok(()), Ok(())) => {
                info!(run_id = %run.run_id, status = status.as_str(), "tracking run closed");
                Ok(run)
            }
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!(run_id = %run.run_id, error = %close_err, "could not mark run as failed");
                }
                error!(run_id = %run.run_id, error = %e, "tracking run failed");
                Err(PipelineError::new(STAGE, e))
            }
            (Ok(()), Err(e)) => Err(PipelineError::new(STAGE, e)),
        }
    }

    async fn log_run(&self, run: &RunInfo, model: &EvaluatedModel, metrics: &ClassificationMetricArtifact) -> Result<()> {
        self.tracker.log_metric(run, "f1_score", metrics.f1_score).await?;
        self.tracker.log_metric(run, "precision", metrics.precision_score).await?;
        self.tracker.log_metric(run, "recall_score", metrics.recall_score).await?;

        for (key, value) in model.model.params() {
            self.tracker.log_param(run, &key, &value.to_string()).await?;
        }

        let bytes = to_bytes(&model.model)?;
        let uri = self.tracker.log_model(run, MODEL_ARTIFACT_PATH, bytes).await?;
        info!(uri = %uri, "model artifact logged");

        if self.tracker.supports_registry() {
            let version = self
                .tracker
                .register_model(&self.registered_model_name, run, MODEL_ARTIFACT_PATH)
                .await?;
            info!(name = %self.registered_model_name, version = %version, "model registered");
        }
        Ok(())
    }

    /// Tune every candidate, keep the best on the test set, track it and
    /// persist it with the preprocessor.
    pub async fn train_model(
        &self,
        x_train: &Array2<f64>,
        y_train: &Array1<f64>,
        x_test: &Array2<f64>,
        y_test: &Array1<f64>,
    ) -> std::result::Result<ModelTrainerArtifact, PipelineError> {
        self.config.validate().stage(STAGE)?;

        let report = self
            .search_candidates(x_train.clone(), y_train.clone(), x_test.clone(), y_test.clone())
            .await
            .stage(STAGE)?;
        for (name, score) in report.scores() {
            info!(model = name, test_score = score, "model report");
        }
        let best = report
            .into_best()
            .ok_or_else(|| TrainerError::Training("no model was evaluated".to_string()))
            .stage(STAGE)?;
        info!(model = %best.name, test_score = best.test_score, "best model selected");

        let y_train_pred = best.model.predict(x_train).stage(STAGE)?;
        let train_metric = get_classification_score(y_train, &y_train_pred).stage(STAGE)?;
        self.track_experiment(&best, &train_metric, "train").await?;

        let y_test_pred = best.model.predict(x_test).stage(STAGE)?;
        let test_metric = get_classification_score(y_test, &y_test_pred).stage(STAGE)?;
        self.track_experiment(&best, &test_metric, "test").await?;

        self.check_quality(&train_metric, &test_metric);

        let preprocessor: Preprocessor =
            load_object(&self.data_transformation_artifact.transformed_object_file_path).stage(STAGE)?;
        let metadata = ModelMetadata::new(best.name.clone(), best.best_params.clone(), train_metric, test_metric);
        let bundle = ModelBundle::new(preprocessor, best.model.clone(), metadata);

        save_object(&self.config.trained_model_file_path, &bundle).stage(STAGE)?;
        save_object(&self.config.final_model_file_path, &best.model).stage(STAGE)?;
        info!(
            bundle = %self.config.trained_model_file_path.display(),
            model = %self.config.final_model_file_path.display(),
            "model saved"
        );

        let artifact = ModelTrainerArtifact {
            trained_model_file_path: self.config.trained_model_file_path.clone(),
            train_metric_artifact: train_metric,
            test_metric_artifact: test_metric,
        };
        info!(artifact = %artifact, "model trainer artifact");
        Ok(artifact)
    }

    /// Run the grid searches off the async runtime, in a sized rayon pool when
    /// `n_jobs` is set
    async fn search_candidates(
        &self,
        x_train: Array2<f64>,
        y_train: Array1<f64>,
        x_test: Array2<f64>,
        y_test: Array1<f64>,
    ) -> Result<ModelReport> {
        let candidates = self.candidates.clone();
        let search = GridSearchCV::with_folds(self.config.cv_folds).with_random_state(self.config.random_state);
        let n_jobs = self.config.n_jobs;

        tokio::task::spawn_blocking(move || {
            let run = || evaluate_models(&x_train, &y_train, &x_test, &y_test, &candidates, &search);
            match n_jobs {
                Some(n) => rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| TrainerError::Config(format!("cannot build a pool of {} threads: {}", n, e)))?
                    .install(run),
                None => run(),
            }
        })
        .await
        .map_err(|e| TrainerError::Training(format!("model search task failed: {}", e)))?
    }

    fn check_quality(&self, train: &ClassificationMetricArtifact, test: &ClassificationMetricArtifact) {
        if test.f1_score < self.config.expected_score {
            warn!(
                f1 = test.f1_score,
                expected = self.config.expected_score,
                "best model is below the expected score"
            );
        }
        let gap = (train.f1_score - test.f1_score).abs();
        if gap > self.config.overfitting_threshold {
            warn!(
                train_f1 = train.f1_score,
                test_f1 = test.f1_score,
                threshold = self.config.overfitting_threshold,
                "train/test f1 gap suggests over- or underfitting"
            );
        }
    }

    /// Load the transformed arrays named by the upstream artifact and train
    pub async fn initiate_model_trainer(&self) -> std::result::Result<ModelTrainerArtifact, PipelineError> {
        info!("Entered initiate_model_trainer");
        let artifact = &self.data_transformation_artifact;

        let train = load_numeric_array(&artifact.transformed_train_file_path).stage(STAGE)?;
        let test = load_numeric_array(&artifact.transformed_test_file_path).stage(STAGE)?;
        let (x_train, y_train) = split_features_target(&train).stage(STAGE)?;
        let (x_test, y_test) = split_features_target(&test).stage(STAGE)?;
        info!(
            train_rows = x_train.nrows(),
            test_rows = x_test.nrows(),
            features = x_train.ncols(),
            "transformed arrays loaded"
        );

        self.train_model(&x_train, &y_train, &x_test, &y_test).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::LocalTracker;
    use crate::training::{DecisionTree, Estimator, LogisticRegression, ParamGrid};
    use ndarray::array;

    fn small_candidates() -> Vec<Candidate> {
        vec![
            Candidate::new(
                "Logistic Regression",
                Estimator::LogisticRegression(LogisticRegression::new()),
                ParamGrid::new(),
            ),
            Candidate::new(
                "Decision Tree",
                Estimator::DecisionTree(DecisionTree::new_classifier()),
                ParamGrid::new().add("criterion", ["gini", "entropy"]),
            ),
        ]
    }

    #[tokio::test]
    async fn test_track_experiment_closes_run() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = LocalTracker::new(dir.path().join("mlruns"), "Default");
        let trainer = ModelTrainer::new(
            ModelTrainerConfig::from_artifact_dir(dir.path()),
            DataTransformationArtifact::new("p.bin", "train.npy", "test.npy"),
            tracker,
        );

        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut model = Estimator::DecisionTree(DecisionTree::new_classifier());
        model.fit(&x, &y).unwrap();
        let evaluated = EvaluatedModel {
            name: "Decision Tree".into(),
            best_params: model.params(),
            model,
            cv_score: 1.0,
            test_score: 1.0,
            training_time_secs: 0.0,
        };
        let metrics = ClassificationMetricArtifact {
            f1_score: 1.0,
            precision_score: 1.0,
            recall_score: 1.0,
        };

        let run = trainer.track_experiment(&evaluated, &metrics, "train").await.unwrap();
        assert_eq!(trainer.tracker().run_status(&run).await.unwrap(), RunStatus::Finished);

        let run_dir = dir.path().join("mlruns").join(&run.experiment_id).join(&run.run_id);
        assert!(run_dir.join("metrics/precision").exists());
        assert_eq!(std::fs::read_to_string(run_dir.join("params/criterion")).unwrap(), "gini");
        assert!(run_dir.join("artifacts/model/model.bin").exists());
    }

    #[tokio::test]
    async fn test_missing_preprocessor_is_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = ModelTrainer::new(
            ModelTrainerConfig::from_artifact_dir(dir.path())
                .with_final_model_file_path(dir.path().join("final/model.bin")),
            DataTransformationArtifact::new(dir.path().join("missing.bin"), "train.npy", "test.npy"),
            LocalTracker::new(dir.path().join("mlruns"), "Default"),
        )
        .with_candidates(small_candidates());

        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let err = trainer.train_model(&x, &y, &x, &y).await.unwrap_err();

        assert_eq!(err.stage(), STAGE);
        assert!(matches!(err.cause(), TrainerError::Io(_)));
        assert!(!trainer.config().trained_model_file_path.exists());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = ModelTrainer::new(
            ModelTrainerConfig::from_artifact_dir(dir.path()).with_cv_folds(1),
            DataTransformationArtifact::new("p.bin", "train.npy", "test.npy"),
            LocalTracker::new(dir.path(), "Default"),
        );
        let x = array![[0.0], [1.0]];
        let y = array![0.0, 1.0];
        let err = trainer.train_model(&x, &y, &x, &y).await.unwrap_err();
        assert!(matches!(err.cause(), TrainerError::Config(_)));
    }
}
