//! Exhaustive hyperparameter search with cross-validation

use super::cross_validation::{CVResults, CVStrategy, CrossValidator};
use super::models::{format_params, Classifier, ParamValue, Params};
use crate::error::{Result, TrainerError};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Candidate values per hyperparameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    values: BTreeMap<String, Vec<ParamValue>>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the candidate values of one parameter
    pub fn add<V, I>(mut self, name: &str, values: I) -> Self
    where
        V: Into<ParamValue>,
        I: IntoIterator<Item = V>,
    {
        self.values
            .insert(name.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of combinations `combinations()` yields
    pub fn len(&self) -> usize {
        self.values.values().map(Vec::len).product()
    }

    /// Cartesian product in stable order: keys sorted, the last key varies
    /// fastest. An empty grid yields one empty combination.
    pub fn combinations(&self) -> Vec<Params> {
        let mut out = vec![Params::new()];
        for (name, candidates) in &self.values {
            out = out
                .into_iter()
                .flat_map(|base| {
                    candidates.iter().map(move |v| {
                        let mut p = base.clone();
                        p.insert(name.clone(), v.clone());
                        p
                    })
                })
                .collect();
        }
        out
    }
}

/// Cross-validated score of one combination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridPoint {
    pub params: Params,
    pub cv: CVResults,
}

/// Outcome of a grid search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSearchResult {
    pub best_params: Params,
    pub best_score: f64,
    /// Every combination, in grid order
    pub cv_results: Vec<GridPoint>,
}

/// Grid search scored by mean fold accuracy
#[derive(Debug, Clone)]
pub struct GridSearchCV {
    cv: CrossValidator,
}

impl Default for GridSearchCV {
    fn default() -> Self {
        Self::new(CVStrategy::default())
    }
}

impl GridSearchCV {
    pub fn new(strategy: CVStrategy) -> Self {
        Self {
            cv: CrossValidator::new(strategy),
        }
    }

    /// Stratified k-fold without shuffling
    pub fn with_folds(n_splits: usize) -> Self {
        Self::new(CVStrategy::StratifiedKFold { n_splits, shuffle: false })
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.cv = self.cv.with_random_state(seed);
        self
    }

    /// Score every combination; best is the highest mean, earliest on ties.
    /// Combinations run in parallel and results keep grid order.
    pub fn fit<C>(&self, estimator: &C, grid: &ParamGrid, x: &Array2<f64>, y: &Array1<f64>) -> Result<GridSearchResult>
    where
        C: Classifier + Clone,
    {
        let combinations = grid.combinations();
        if combinations.is_empty() {
            return Err(TrainerError::Validation(format!(
                "parameter grid for {} has a key with no values",
                estimator.name()
            )));
        }

        let splits = self.cv.split(y)?;
        let folds: Vec<_> = splits
            .iter()
            .map(|s| {
                (
                    x.select(Axis(0), &s.train_indices),
                    y.select(Axis(0), &s.train_indices),
                    x.select(Axis(0), &s.test_indices),
                    y.select(Axis(0), &s.test_indices),
                )
            })
            .collect();

        let cv_results = combinations
            .into_par_iter()
            .map(|params| -> Result<GridPoint> {
                let mut scores = Vec::with_capacity(folds.len());
                for (x_tr, y_tr, x_te, y_te) in &folds {
                    let mut model = estimator.clone();
                    model.set_params(&params)?;
                    model.fit(x_tr, y_tr)?;
                    scores.push(model.score(x_te, y_te)?);
                }
                let cv = CVResults::from_scores(scores);
                debug!(
                    model = estimator.name(),
                    params = %format_params(&params),
                    mean = cv.mean_score,
                    "grid point scored"
                );
                Ok(GridPoint { params, cv })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut best = 0;
        for (i, point) in cv_results.iter().enumerate() {
            if point.cv.mean_score > cv_results[best].cv.mean_score {
                best = i;
            }
        }

        Ok(GridSearchResult {
            best_params: cv_results[best].params.clone(),
            best_score: cv_results[best].cv.mean_score,
            cv_results,
        })
    }
}
