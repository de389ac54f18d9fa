//! Artifacts passed between pipeline stages

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Output of the upstream data-transformation stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTransformationArtifact {
    /// Fitted preprocessor persisted by the transformation stage
    pub transformed_object_file_path: PathBuf,
    pub transformed_train_file_path: PathBuf,
    pub transformed_test_file_path: PathBuf,
}

impl DataTransformationArtifact {
    pub fn new(
        transformed_object_file_path: impl Into<PathBuf>,
        transformed_train_file_path: impl Into<PathBuf>,
        transformed_test_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transformed_object_file_path: transformed_object_file_path.into(),
            transformed_train_file_path: transformed_train_file_path.into(),
            transformed_test_file_path: transformed_test_file_path.into(),
        }
    }
}

/// Binary classification scores for one split
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationMetricArtifact {
    pub f1_score: f64,
    pub precision_score: f64,
    pub recall_score: f64,
}

impl fmt::Display for ClassificationMetricArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "f1={:.4} precision={:.4} recall={:.4}",
            self.f1_score, self.precision_score, self.recall_score
        )
    }
}

/// Result of the model training stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTrainerArtifact {
    pub trained_model_file_path: PathBuf,
    pub train_metric_artifact: ClassificationMetricArtifact,
    pub test_metric_artifact: ClassificationMetricArtifact,
}

impl fmt::Display for ModelTrainerArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ModelTrainerArtifact(path={}, train=[{}], test=[{}])",
            self.trained_model_file_path.display(),
            self.train_metric_artifact,
            self.test_metric_artifact
        )
    }
}
