//! Feature scaling

use super::{is_missing, Transformer};
use crate::error::{Result, TrainerError};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Standard scaling (z-score normalization): (x - mean) / std.
/// Missing values are ignored while fitting and passed through unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    pub fn scale(&self) -> Option<&Array1<f64>> {
        self.scale.as_ref()
    }
}

impl Transformer for StandardScaler {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        if x.nrows() == 0 {
            return Err(TrainerError::Validation("cannot fit scaler on empty data".to_string()));
        }

        let mut means = Array1::zeros(x.ncols());
        let mut scales = Array1::ones(x.ncols());

        for (j, col) in x.axis_iter(Axis(1)).enumerate() {
            let present: Vec<f64> = col.iter().copied().filter(|v| !is_missing(*v)).collect();
            if present.is_empty() {
                continue;
            }
            let n = present.len() as f64;
            let mean = present.iter().sum::<f64>() / n;
            let var = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            means[j] = mean;
            // constant columns keep unit scale
            scales[j] = if var > 0.0 { var.sqrt() } else { 1.0 };
        }

        self.mean = Some(means);
        self.scale = Some(scales);
        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = match (&self.mean, &self.scale) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(TrainerError::ModelNotFitted),
        };

        if x.ncols() != mean.len() {
            return Err(TrainerError::Shape {
                expected: format!("{} features", mean.len()),
                actual: format!("{} features", x.ncols()),
            });
        }

        let mut out = x.clone();
        for mut row in out.rows_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                if !is_missing(*v) {
                    *v = (*v - mean[j]) / scale[j];
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_standard_scaler() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let mut scaler = StandardScaler::new();
        let out = scaler.fit_transform(&x).unwrap();

        assert_eq!(out, array![[-1.0, 0.0], [1.0, 0.0]]);
        assert_eq!(scaler.scale().unwrap()[1], 1.0);
    }

    #[test]
    fn test_feature_count_mismatch() {
        let mut scaler = StandardScaler::new();
        scaler.fit(&array![[1.0, 2.0]]).unwrap();
        assert!(scaler.transform(&array![[1.0]]).is_err());
    }
}
