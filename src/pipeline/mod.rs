//! Pipeline stages

mod model_trainer;

pub use model_trainer::{ModelTrainer, MODEL_ARTIFACT_PATH, STAGE};
