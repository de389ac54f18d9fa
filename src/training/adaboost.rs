//! AdaBoost (Adaptive Boosting) implementation
//!
//! SAMME boosting of decision stumps, weighting misclassified samples more
//! heavily in subsequent rounds.

use super::models::{check_xy, unique_classes, unknown_param, Classifier, Params};
use crate::error::{Result, TrainerError};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// A single decision stump: splits on one feature at one threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Stump {
    feature_index: usize,
    threshold: f64,
    /// Class index when feature <= threshold
    left_class: usize,
    /// Class index when feature > threshold
    right_class: usize,
}

impl Stump {
    fn predict_row(&self, row: ArrayView1<f64>) -> usize {
        if row[self.feature_index] <= self.threshold {
            self.left_class
        } else {
            self.right_class
        }
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) })
        .0
}

/// AdaBoost Classifier (SAMME, supports multi-class)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaBoostClassifier {
    pub n_estimators: usize,
    pub learning_rate: f64,
    stumps: Vec<Stump>,
    alphas: Vec<f64>,
    classes: Vec<f64>,
    n_features: usize,
}

impl Default for AdaBoostClassifier {
    fn default() -> Self {
        Self::new(50, 1.0)
    }
}

impl AdaBoostClassifier {
    pub fn new(n_estimators: usize, learning_rate: f64) -> Self {
        Self {
            n_estimators,
            learning_rate,
            stumps: Vec::new(),
            alphas: Vec::new(),
            classes: Vec::new(),
            n_features: 0,
        }
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Lowest weighted-error stump. Each feature is swept once in sorted
    /// order with running per-class weights on the left side.
    fn fit_stump(x: &Array2<f64>, class_idx: &[usize], weights: &Array1<f64>, n_classes: usize) -> Stump {
        let n_samples = x.nrows();
        let mut total = vec![0.0; n_classes];
        for (i, &c) in class_idx.iter().enumerate() {
            total[c] += weights[i];
        }
        let total_weight: f64 = total.iter().sum();

        // constant stump: every sample goes left
        let majority = argmax(&total);
        let mut best_error = total_weight - total[majority];
        let mut best = Stump {
            feature_index: 0,
            threshold: f64::INFINITY,
            left_class: majority,
            right_class: majority,
        };

        let mut order: Vec<usize> = (0..n_samples).collect();
        for f in 0..x.ncols() {
            order.sort_by(|&a, &b| x[[a, f]].total_cmp(&x[[b, f]]));

            let mut left = vec![0.0; n_classes];
            for pos in 0..n_samples.saturating_sub(1) {
                let i = order[pos];
                left[class_idx[i]] += weights[i];

                let value = x[[i, f]];
                let next = x[[order[pos + 1], f]];
                if next.is_nan() || next <= value {
                    continue;
                }

                let right: Vec<f64> = total.iter().zip(&left).map(|(t, l)| t - l).collect();
                let left_class = argmax(&left);
                let right_class = argmax(&right);
                let error = total_weight - left[left_class] - right[right_class];

                if error < best_error - 1e-12 {
                    best_error = error;
                    best = Stump {
                        feature_index: f,
                        threshold: (value + next) / 2.0,
                        left_class,
                        right_class,
                    };
                }
            }
        }
        best
    }

    /// Fit the boosted ensemble
    pub fn fit_boosting(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        if self.n_estimators == 0 || !(self.learning_rate > 0.0) {
            return Err(TrainerError::InvalidParameter {
                name: "n_estimators/learning_rate".to_string(),
                value: format!("{}/{}", self.n_estimators, self.learning_rate),
                reason: "both must be positive".to_string(),
            });
        }

        let n_samples = x.nrows();
        self.n_features = x.ncols();
        self.classes = unique_classes(y);
        let n_classes = self.classes.len();
        let class_idx: Vec<usize> = y
            .iter()
            .map(|v| self.classes.iter().position(|c| c == v).unwrap_or(0))
            .collect();

        let mut weights = Array1::from_elem(n_samples, 1.0 / n_samples as f64);
        self.stumps.clear();
        self.alphas.clear();

        for _round in 0..self.n_estimators {
            let stump = Self::fit_stump(x, &class_idx, &weights, n_classes);

            let miss: Vec<bool> = x
                .rows()
                .into_iter()
                .zip(&class_idx)
                .map(|(row, &c)| stump.predict_row(row) != c)
                .collect();
            let error: f64 = weights
                .iter()
                .zip(&miss)
                .filter(|&(_, &m)| m)
                .map(|(w, _)| w)
                .sum::<f64>()
                / weights.sum();

            // a perfect stump ends boosting
            if error <= 0.0 {
                self.stumps.push(stump);
                self.alphas.push(1.0);
                break;
            }

            // no better than chance for K classes
            if error >= 1.0 - 1.0 / n_classes as f64 {
                if self.stumps.is_empty() {
                    self.stumps.push(stump);
                    self.alphas.push(1.0);
                }
                break;
            }

            let alpha = self.learning_rate
                * (((1.0 - error) / error).ln() + (n_classes as f64 - 1.0).ln());

            for (w, &m) in weights.iter_mut().zip(&miss) {
                if m {
                    *w *= alpha.exp();
                }
            }
            let w_sum = weights.sum();
            if w_sum > 0.0 {
                weights /= w_sum;
            }

            self.stumps.push(stump);
            self.alphas.push(alpha);
        }

        Ok(())
    }

    /// Alpha-weighted class votes per sample
    fn decision_scores(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.stumps.is_empty() {
            return Err(TrainerError::ModelNotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(TrainerError::Shape {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        let mut scores = Array2::zeros((x.nrows(), self.classes.len()));
        for (i, row) in x.rows().into_iter().enumerate() {
            for (stump, &alpha) in self.stumps.iter().zip(&self.alphas) {
                scores[[i, stump.predict_row(row)]] += alpha;
            }
        }
        Ok(scores)
    }

    /// Softmax over the weighted votes
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let mut scores = self.decision_scores(x)?;
        for mut row in scores.rows_mut() {
            let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row /= sum;
        }
        Ok(scores)
    }

    /// Alpha-weighted stump usage, normalized
    pub fn feature_importances(&self) -> Option<Array1<f64>> {
        if self.stumps.is_empty() || self.n_features == 0 {
            return None;
        }
        let mut importances = Array1::zeros(self.n_features);
        for (stump, &alpha) in self.stumps.iter().zip(&self.alphas) {
            if stump.threshold.is_finite() {
                importances[stump.feature_index] += alpha.abs();
            }
        }
        let total = importances.sum();
        if total > 0.0 {
            importances /= total;
        }
        Some(importances)
    }

    pub fn n_stumps(&self) -> usize {
        self.stumps.len()
    }
}

impl Classifier for AdaBoostClassifier {
    fn name(&self) -> &'static str {
        "AdaBoost"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.fit_boosting(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let scores = self.decision_scores(x)?;
        Ok(scores
            .rows()
            .into_iter()
            .map(|row| self.classes[argmax(&row.to_vec())])
            .collect())
    }

    fn set_params(&mut self, params: &Params) -> Result<()> {
        for (name, value) in params {
            match name.as_str() {
                "n_estimators" => self.n_estimators = value.as_positive_usize(name)?,
                "learning_rate" => self.learning_rate = value.as_f64(name)?,
                _ => return Err(unknown_param(self.name(), name, value)),
            }
        }
        Ok(())
    }

    fn params(&self) -> Params {
        let mut params = Params::new();
        params.insert("n_estimators".into(), self.n_estimators.into());
        params.insert("learning_rate".into(), self.learning_rate.into());
        params
    }
}
