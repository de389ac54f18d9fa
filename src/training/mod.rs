//! Model training module
//!
//! Native candidate classifiers and the model-selection machinery the
//! training stage runs over them:
//! - Decision trees and Random Forests
//! - Gradient boosting
//! - Logistic regression
//! - AdaBoost
//! - Cross-validation, grid search and held-out ranking

mod engine;
mod models;
pub mod adaboost;
pub mod cross_validation;
pub mod decision_tree;
pub mod gradient_boosting;
pub mod grid_search;
pub mod linear_models;
pub mod metrics;
pub mod random_forest;

pub use adaboost::AdaBoostClassifier;
pub use cross_validation::{CVResults, CVSplit, CVStrategy, CrossValidator};
pub use decision_tree::{Criterion, DecisionTree, TreeNode};
pub use engine::{default_candidates, evaluate_models, Candidate, Estimator, EvaluatedModel, ModelReport};
pub use gradient_boosting::{GradientBoostingClassifier, GradientBoostingConfig};
pub use grid_search::{GridPoint, GridSearchCV, GridSearchResult, ParamGrid};
pub use linear_models::LogisticRegression;
pub use metrics::{accuracy_score, confusion_counts, get_classification_score, r2_score};
pub use models::{format_params, Classifier, ParamValue, Params};
pub use random_forest::{MaxFeatures, RandomForest};
