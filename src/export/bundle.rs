//! Preprocessor + model bundle

use crate::entity::ClassificationMetricArtifact;
use crate::error::Result;
use crate::preprocessing::{Preprocessor, Transformer};
use crate::training::{Classifier, Estimator, Params};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Provenance stored next to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_name: String,
    pub best_params: Params,
    pub train_metrics: ClassificationMetricArtifact,
    pub test_metrics: ClassificationMetricArtifact,
    /// RFC 3339 timestamp
    pub trained_at: String,
    pub crate_version: String,
}

impl ModelMetadata {
    pub fn new(
        model_name: impl Into<String>,
        best_params: Params,
        train_metrics: ClassificationMetricArtifact,
        test_metrics: ClassificationMetricArtifact,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            best_params,
            train_metrics,
            test_metrics,
            trained_at: chrono::Utc::now().to_rfc3339(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The fitted preprocessor and the winning model, persisted as one object
/// so that inference transforms raw features exactly like training did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub preprocessor: Preprocessor,
    pub model: Estimator,
    pub metadata: ModelMetadata,
}

impl ModelBundle {
    pub fn new(preprocessor: Preprocessor, model: Estimator, metadata: ModelMetadata) -> Self {
        Self {
            preprocessor,
            model,
            metadata,
        }
    }

    /// Transform raw features, then predict
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let transformed = self.preprocessor.transform(x)?;
        self.model.predict(&transformed)
    }
}
