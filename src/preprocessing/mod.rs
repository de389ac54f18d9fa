//! Preprocessing transformers
//!
//! The data-transformation stage fits one of these and persists it; the
//! trainer loads it back and bundles it with the winning model so that
//! inference applies exactly the same transformation.

mod knn_imputer;
mod scaler;

pub use knn_imputer::{KNNImputer, NeighborWeights};
pub use scaler::StandardScaler;

use crate::error::Result;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Fit/transform contract shared by the preprocessors
pub trait Transformer: Send + Sync {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()>;

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }
}

/// Missing values are encoded as NaN
#[inline]
pub fn is_missing(v: f64) -> bool {
    v.is_nan()
}

/// A persisted, fitted preprocessor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Preprocessor {
    KnnImputer(KNNImputer),
    StandardScaler(StandardScaler),
    Identity,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Preprocessor::KnnImputer(KNNImputer::default())
    }
}

impl Preprocessor {
    pub fn name(&self) -> &'static str {
        match self {
            Preprocessor::KnnImputer(_) => "knn_imputer",
            Preprocessor::StandardScaler(_) => "standard_scaler",
            Preprocessor::Identity => "identity",
        }
    }
}

impl Transformer for Preprocessor {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        match self {
            Preprocessor::KnnImputer(t) => t.fit(x),
            Preprocessor::StandardScaler(t) => t.fit(x),
            Preprocessor::Identity => Ok(()),
        }
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            Preprocessor::KnnImputer(t) => t.transform(x),
            Preprocessor::StandardScaler(t) => t.transform(x),
            Preprocessor::Identity => Ok(x.clone()),
        }
    }
}
