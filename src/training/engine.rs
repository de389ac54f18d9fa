//! Candidate models and held-out model selection

use super::adaboost::AdaBoostClassifier;
use super::decision_tree::DecisionTree;
use super::gradient_boosting::{GradientBoostingClassifier, GradientBoostingConfig};
use super::grid_search::{GridSearchCV, ParamGrid};
use super::linear_models::LogisticRegression;
use super::metrics::r2_score;
use super::models::{format_params, Classifier, Params};
use super::random_forest::RandomForest;
use crate::error::{Result, TrainerError};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Any of the candidate classifiers, persisted as one type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Estimator {
    DecisionTree(DecisionTree),
    RandomForest(RandomForest),
    GradientBoosting(GradientBoostingClassifier),
    LogisticRegression(LogisticRegression),
    AdaBoost(AdaBoostClassifier),
}

impl Estimator {
    fn inner(&self) -> &dyn Classifier {
        match self {
            Estimator::DecisionTree(m) => m,
            Estimator::RandomForest(m) => m,
            Estimator::GradientBoosting(m) => m,
            Estimator::LogisticRegression(m) => m,
            Estimator::AdaBoost(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Estimator::DecisionTree(m) => m,
            Estimator::RandomForest(m) => m,
            Estimator::GradientBoosting(m) => m,
            Estimator::LogisticRegression(m) => m,
            Estimator::AdaBoost(m) => m,
        }
    }
}

impl Classifier for Estimator {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.inner_mut().fit(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.inner().predict(x)
    }

    fn set_params(&mut self, params: &Params) -> Result<()> {
        self.inner_mut().set_params(params)
    }

    fn params(&self) -> Params {
        self.inner().params()
    }
}

/// A named model with its search grid
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub estimator: Estimator,
    pub grid: ParamGrid,
}

impl Candidate {
    pub fn new(name: impl Into<String>, estimator: Estimator, grid: ParamGrid) -> Self {
        Self {
            name: name.into(),
            estimator,
            grid,
        }
    }
}

/// The five classifiers compared by the training stage, in ranking order
pub fn default_candidates(random_state: u64) -> Vec<Candidate> {
    vec![
        Candidate::new(
            "Random Forest",
            Estimator::RandomForest(RandomForest::default().with_random_state(random_state)),
            ParamGrid::new().add("n_estimators", [8usize, 16, 32, 128, 256]),
        ),
        Candidate::new(
            "Decision Tree",
            Estimator::DecisionTree(DecisionTree::new_classifier().with_random_state(random_state)),
            ParamGrid::new().add("criterion", ["gini", "entropy", "log_loss"]),
        ),
        Candidate::new(
            "Gradient Boosting",
            Estimator::GradientBoosting(GradientBoostingClassifier::new(GradientBoostingConfig {
                random_state: Some(random_state),
                ..Default::default()
            })),
            ParamGrid::new()
                .add("learning_rate", [0.1, 0.01, 0.05, 0.001])
                .add("subsample", [0.6, 0.7, 0.75, 0.85, 0.9])
                .add("n_estimators", [8usize, 16, 32, 64, 128, 256]),
        ),
        Candidate::new(
            "Logistic Regression",
            Estimator::LogisticRegression(LogisticRegression::new()),
            ParamGrid::new(),
        ),
        Candidate::new(
            "AdaBoost",
            Estimator::AdaBoost(AdaBoostClassifier::default()),
            ParamGrid::new()
                .add("learning_rate", [0.1, 0.01, 0.001])
                .add("n_estimators", [8usize, 16, 32, 64, 128, 256]),
        ),
    ]
}

/// A tuned, refitted candidate and its scores
#[derive(Debug, Clone)]
pub struct EvaluatedModel {
    pub name: String,
    pub model: Estimator,
    pub best_params: Params,
    /// Mean cross-validated accuracy of `best_params`
    pub cv_score: f64,
    /// r2 of test predictions
    pub test_score: f64,
    pub training_time_secs: f64,
}

/// Held-out scores in candidate order
#[derive(Debug, Clone, Default)]
pub struct ModelReport {
    pub models: Vec<EvaluatedModel>,
}

impl ModelReport {
    fn best_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, m) in self.models.iter().enumerate() {
            if best.map_or(true, |b| m.test_score > self.models[b].test_score) {
                best = Some(i);
            }
        }
        best
    }

    /// Highest test score; the earlier candidate wins ties
    pub fn best(&self) -> Option<&EvaluatedModel> {
        self.best_index().map(|i| &self.models[i])
    }

    pub fn into_best(mut self) -> Option<EvaluatedModel> {
        let idx = self.best_index()?;
        Some(self.models.swap_remove(idx))
    }

    /// (name, test score) pairs in candidate order
    pub fn scores(&self) -> Vec<(&str, f64)> {
        self.models.iter().map(|m| (m.name.as_str(), m.test_score)).collect()
    }
}

/// Grid-search each candidate on the training set, refit it with the best
/// parameters on the whole training set and score it on the test set.
pub fn evaluate_models(
    x_train: &Array2<f64>,
    y_train: &Array1<f64>,
    x_test: &Array2<f64>,
    y_test: &Array1<f64>,
    candidates: &[Candidate],
    search: &GridSearchCV,
) -> Result<ModelReport> {
    if candidates.is_empty() {
        return Err(TrainerError::Validation("no candidate models to evaluate".to_string()));
    }
    if x_train.ncols() != x_test.ncols() {
        return Err(TrainerError::Shape {
            expected: format!("{} test features", x_train.ncols()),
            actual: format!("{} test features", x_test.ncols()),
        });
    }

    let mut report = ModelReport::default();
    for candidate in candidates {
        let start = Instant::now();
        debug!(model = %candidate.name, combinations = candidate.grid.len(), "grid search started");

        let search_result = search.fit(&candidate.estimator, &candidate.grid, x_train, y_train)?;

        let mut model = candidate.estimator.clone();
        model.set_params(&search_result.best_params)?;
        model.fit(x_train, y_train)?;

        let y_test_pred = model.predict(x_test)?;
        let test_score = r2_score(y_test, &y_test_pred)?;
        let training_time_secs = start.elapsed().as_secs_f64();

        info!(
            model = %candidate.name,
            params = %format_params(&search_result.best_params),
            cv_score = search_result.best_score,
            test_score,
            secs = training_time_secs,
            "candidate evaluated"
        );

        report.models.push(EvaluatedModel {
            name: candidate.name.clone(),
            model,
            best_params: search_result.best_params,
            cv_score: search_result.best_score,
            test_score,
            training_time_secs,
        });
    }

    Ok(report)
}
