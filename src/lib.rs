//! Model trainer - the model training stage of a binary classification pipeline
//!
//! This crate provides:
//! - Native candidate classifiers with grid-searched hyperparameters
//! - Held-out model selection and binary classification metrics
//! - Experiment tracking against an MLflow server or a local file store
//! - Persistence of the fitted preprocessor bundled with the winning model
//!
//! # Modules
//!
//! ## Core ML Modules
//! - [`preprocessing`] - Fitted transformers carried into the model bundle
//! - [`training`] - Classifiers, cross-validation, grid search, metrics
//!
//! ## Stage
//! - [`pipeline`] - The model training stage
//! - [`entity`] - Artifacts exchanged between stages
//! - [`config`] - Trainer and tracker settings
//!
//! ## Infrastructure
//! - [`tracking`] - Experiment tracking
//! - [`export`] - Model serialization
//! - [`utils`] - Array IO
//!
//! ## Services
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Core ML modules
pub mod preprocessing;
pub mod training;

// Stage
pub mod config;
pub mod entity;
pub mod pipeline;

// Infrastructure
pub mod export;
pub mod tracking;
pub mod utils;

// Services
pub mod cli;

pub use error::{PipelineError, Result, TrainerError};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{PipelineError, Result, StageContext, TrainerError};

    // Configuration and artifacts
    pub use crate::config::{ModelTrainerConfig, TrackingConfig};
    pub use crate::entity::{ClassificationMetricArtifact, DataTransformationArtifact, ModelTrainerArtifact};

    // Preprocessing
    pub use crate::preprocessing::{KNNImputer, Preprocessor, StandardScaler, Transformer};

    // Training
    pub use crate::training::{
        default_candidates, evaluate_models, get_classification_score, Candidate, Classifier, Estimator,
        GridSearchCV, ParamGrid, Params,
    };

    // Experiment tracking
    pub use crate::tracking::{tracker_from_config, ExperimentTracker, LocalTracker, MlflowClient, Tracker};

    // Export
    pub use crate::export::{load_object, save_object, ModelBundle, ModelMetadata};

    // Stage
    pub use crate::pipeline::ModelTrainer;

    // Array IO
    pub use crate::utils::{load_numeric_array, save_numpy_array, split_features_target};
}
