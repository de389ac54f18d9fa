//! Gradient Boosting implementation
//!
//! Binary log-loss boosting: each round fits a regression tree to the
//! negative gradient (y - p), replaces its leaves with a Newton step and
//! adds it, shrunk by the learning rate, to the log-odds of every sample.

use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use super::decision_tree::DecisionTree;
use super::models::{
    binary_targets, check_xy, decode_binary, unique_classes, unknown_param, Classifier, Params,
};
use crate::error::{Result, TrainerError};

/// Gradient Boosting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingConfig {
    /// Number of boosting rounds (trees)
    pub n_estimators: usize,
    /// Learning rate (shrinkage)
    pub learning_rate: f64,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Minimum samples per leaf
    pub min_samples_leaf: usize,
    /// Fraction of rows drawn (without replacement) for each tree
    pub subsample: f64,
    /// Random seed
    pub random_state: Option<u64>,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 1,
            subsample: 1.0,
            random_state: Some(42),
        }
    }
}

const LOG_ODDS_CLAMP: f64 = 1e-10;

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Gradient Boosting Classifier (binary)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    config: GradientBoostingConfig,
    trees: Vec<DecisionTree>,
    initial_log_odds: f64,
    classes: Vec<f64>,
}

impl Default for GradientBoostingClassifier {
    fn default() -> Self {
        Self::new(GradientBoostingConfig::default())
    }
}

impl GradientBoostingClassifier {
    pub fn new(config: GradientBoostingConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            initial_log_odds: 0.0,
            classes: Vec::new(),
        }
    }

    pub fn config(&self) -> &GradientBoostingConfig {
        &self.config
    }

    fn validate(&self) -> Result<()> {
        let c = &self.config;
        let invalid = |name: &str, value: String, reason: &str| TrainerError::InvalidParameter {
            name: name.to_string(),
            value,
            reason: reason.to_string(),
        };
        if c.n_estimators == 0 {
            return Err(invalid("n_estimators", "0".into(), "at least one round is required"));
        }
        if !(c.learning_rate > 0.0) {
            return Err(invalid("learning_rate", c.learning_rate.to_string(), "must be positive"));
        }
        if !(c.subsample > 0.0 && c.subsample <= 1.0) {
            return Err(invalid("subsample", c.subsample.to_string(), "expected a value in (0, 1]"));
        }
        Ok(())
    }

    /// Fit the boosted ensemble
    pub fn fit_boosting(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        self.validate()?;

        self.classes = unique_classes(y);
        let target = binary_targets(y, &self.classes, "Gradient Boosting")?;
        let n_samples = x.nrows();

        let p = target.mean().unwrap_or(0.5).clamp(LOG_ODDS_CLAMP, 1.0 - LOG_ODDS_CLAMP);
        self.initial_log_odds = (p / (1.0 - p)).ln();
        self.trees.clear();

        let mut log_odds = Array1::from_elem(n_samples, self.initial_log_odds);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state.unwrap_or(42));

        for round in 0..self.config.n_estimators {
            let residuals: Array1<f64> = target
                .iter()
                .zip(log_odds.iter())
                .map(|(&t, &lo)| t - sigmoid(lo))
                .collect();

            let rows = self.subsample_indices(n_samples, &mut rng);
            let x_sub = x.select(ndarray::Axis(0), &rows);
            let r_sub = residuals.select(ndarray::Axis(0), &rows);

            let mut tree = DecisionTree::new_regressor()
                .with_max_depth(self.config.max_depth)
                .with_min_samples_leaf(self.config.min_samples_leaf)
                .with_random_state(self.config.random_state.unwrap_or(42).wrapping_add(round as u64));
            tree.fit_tree(&x_sub, &r_sub)?;

            // one Newton step per leaf: sum(y - p) / sum(p(1 - p))
            let p_sub: Vec<f64> = rows.iter().map(|&i| sigmoid(log_odds[i])).collect();
            tree.refit_leaves(&x_sub, |leaf_rows| {
                let num: f64 = leaf_rows.iter().map(|&i| r_sub[i]).sum();
                let den: f64 = leaf_rows.iter().map(|&i| p_sub[i] * (1.0 - p_sub[i])).sum();
                if den.abs() < 1e-150 {
                    0.0
                } else {
                    num / den
                }
            })?;

            // the tree is fit on the subsample but every row moves
            let update = tree.predict_tree(x)?;
            log_odds.scaled_add(self.config.learning_rate, &update);

            self.trees.push(tree);
        }

        Ok(())
    }

    /// Probability of the positive (larger) class
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(TrainerError::ModelNotFitted);
        }
        let mut log_odds = Array1::from_elem(x.nrows(), self.initial_log_odds);
        for tree in &self.trees {
            let update = tree.predict_tree(x)?;
            log_odds.scaled_add(self.config.learning_rate, &update);
        }
        Ok(log_odds.mapv(sigmoid))
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn subsample_indices(&self, n: usize, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
        if self.config.subsample >= 1.0 {
            return (0..n).collect();
        }
        let sample_size = (((n as f64) * self.config.subsample).ceil() as usize).max(1);
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(rng);
        indices.truncate(sample_size);
        indices.sort_unstable();
        indices
    }
}

impl Classifier for GradientBoostingClassifier {
    fn name(&self) -> &'static str {
        "Gradient Boosting"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.fit_boosting(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        Ok(proba.mapv(|p| decode_binary(p, &self.classes)))
    }

    fn set_params(&mut self, params: &Params) -> Result<()> {
        for (name, value) in params {
            match name.as_str() {
                "n_estimators" => self.config.n_estimators = value.as_positive_usize(name)?,
                "learning_rate" => self.config.learning_rate = value.as_f64(name)?,
                "subsample" => self.config.subsample = value.as_fraction(name)?,
                "max_depth" => self.config.max_depth = value.as_positive_usize(name)?,
                "min_samples_leaf" => self.config.min_samples_leaf = value.as_positive_usize(name)?,
                "random_state" => self.config.random_state = Some(value.as_positive_usize(name)? as u64),
                _ => return Err(unknown_param(self.name(), name, value)),
            }
        }
        self.validate()
    }

    fn params(&self) -> Params {
        let mut params = Params::new();
        params.insert("n_estimators".into(), self.config.n_estimators.into());
        params.insert("learning_rate".into(), self.config.learning_rate.into());
        params.insert("subsample".into(), self.config.subsample.into());
        params.insert("max_depth".into(), self.config.max_depth.into());
        params.insert("min_samples_leaf".into(), self.config.min_samples_leaf.into());
        params
    }
}
