//! Classifier contract and hyperparameter values

use super::metrics::accuracy_score;
use crate::error::{Result, TrainerError};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single hyperparameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl ParamValue {
    fn invalid(&self, name: &str, reason: &str) -> TrainerError {
        TrainerError::InvalidParameter {
            name: name.to_string(),
            value: self.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Read as a positive integer
    pub fn as_positive_usize(&self, name: &str) -> Result<usize> {
        match self {
            ParamValue::Int(v) if *v > 0 => Ok(*v as usize),
            _ => Err(self.invalid(name, "expected a positive integer")),
        }
    }

    /// Read as a float; integers are widened
    pub fn as_f64(&self, name: &str) -> Result<f64> {
        match self {
            ParamValue::Float(v) if v.is_finite() => Ok(*v),
            ParamValue::Int(v) => Ok(*v as f64),
            _ => Err(self.invalid(name, "expected a finite number")),
        }
    }

    /// Read as a float in the half-open interval (0, 1]
    pub fn as_fraction(&self, name: &str) -> Result<f64> {
        let v = self.as_f64(name)?;
        if v > 0.0 && v <= 1.0 {
            Ok(v)
        } else {
            Err(self.invalid(name, "expected a value in (0, 1]"))
        }
    }

    pub fn as_str(&self, name: &str) -> Result<&str> {
        match self {
            ParamValue::Str(s) => Ok(s),
            _ => Err(self.invalid(name, "expected a string")),
        }
    }
}

/// Named hyperparameters; keys are kept sorted
pub type Params = BTreeMap<String, ParamValue>;

/// Error for a parameter the estimator does not know
pub(crate) fn unknown_param(estimator: &str, name: &str, value: &ParamValue) -> TrainerError {
    TrainerError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
        reason: format!("unknown parameter for {}", estimator),
    }
}

/// Render params as `k=v, k=v` for logs
pub fn format_params(params: &Params) -> String {
    if params.is_empty() {
        return "{}".to_string();
    }
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Trait implemented by every candidate classifier
pub trait Classifier: Send + Sync {
    /// Display name
    fn name(&self) -> &'static str;

    /// Fit the model to training data
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    /// Predict class labels
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Apply hyperparameters; unknown names are an error
    fn set_params(&mut self, params: &Params) -> Result<()>;

    /// Current hyperparameters
    fn params(&self) -> Params;

    /// Mean accuracy on the given data
    fn score(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64> {
        let y_pred = self.predict(x)?;
        accuracy_score(y, &y_pred)
    }
}

/// Shape check shared by the estimators
pub(crate) fn check_xy(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(TrainerError::Shape {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    if x.nrows() == 0 {
        return Err(TrainerError::Validation("cannot fit on zero samples".to_string()));
    }
    Ok(())
}

/// Sorted distinct labels
pub(crate) fn unique_classes(y: &Array1<f64>) -> Vec<f64> {
    let mut classes: Vec<f64> = y.iter().copied().collect();
    classes.sort_by(|a, b| a.total_cmp(b));
    classes.dedup();
    classes
}

/// Binary estimators encode the larger of two labels as 1.0
pub(crate) fn binary_targets(y: &Array1<f64>, classes: &[f64], estimator: &str) -> Result<Array1<f64>> {
    match classes {
        [_] => Ok(Array1::zeros(y.len())),
        [_, positive] => Ok(y.mapv(|v| if v == *positive { 1.0 } else { 0.0 })),
        _ => Err(TrainerError::Training(format!(
            "{} supports at most two classes, got {}",
            estimator,
            classes.len()
        ))),
    }
}

/// Map a probability of the positive class back to the original label
pub(crate) fn decode_binary(p: f64, classes: &[f64]) -> f64 {
    match classes {
        [only] => *only,
        [negative, positive] => {
            if p >= 0.5 {
                *positive
            } else {
                *negative
            }
        }
        _ => f64::NAN,
    }
}
