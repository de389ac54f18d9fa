//! Random Forest implementation

use super::decision_tree::{Criterion, DecisionTree};
use super::models::{check_xy, unique_classes, unknown_param, Classifier, ParamValue, Params};
use crate::error::{Result, TrainerError};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Strategy for max features
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum MaxFeatures {
    /// Square root of n_features
    Sqrt,
    /// Log2 of n_features
    Log2,
    /// Fixed number
    Fixed(usize),
    /// All features
    All,
}

/// Random Forest classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features examined per split (sqrt by default)
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub criterion: Criterion,
    pub random_state: Option<u64>,
    feature_importances: Option<Array1<f64>>,
    n_features: usize,
    classes: Vec<f64>,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RandomForest {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            criterion: Criterion::Gini,
            random_state: None,
            feature_importances: None,
            n_features: 0,
            classes: Vec::new(),
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    fn compute_max_features(&self, n_features: usize) -> usize {
        match self.max_features {
            MaxFeatures::Sqrt => (n_features as f64).sqrt().ceil() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().ceil() as usize,
            MaxFeatures::Fixed(n) => n.min(n_features),
            MaxFeatures::All => n_features,
        }
        .max(1)
    }

    /// Fit the forest; trees are grown in parallel, each from its own seed
    pub fn fit_forest(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        if self.n_estimators == 0 {
            return Err(TrainerError::InvalidParameter {
                name: "n_estimators".to_string(),
                value: "0".to_string(),
                reason: "at least one tree is required".to_string(),
            });
        }

        let n_samples = x.nrows();
        self.n_features = x.ncols();
        self.classes = unique_classes(y);
        let max_features = self.compute_max_features(self.n_features);
        let base_seed = self.random_state.unwrap_or(42);

        let trees: Vec<DecisionTree> = (0..self.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let seed = base_seed.wrapping_add(tree_idx as u64);
                let mut rng = ChaCha8Rng::seed_from_u64(seed);

                let (x_sample, y_sample) = if self.bootstrap {
                    let indices: Vec<usize> =
                        (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                    (x.select(ndarray::Axis(0), &indices), y.select(ndarray::Axis(0), &indices))
                } else {
                    (x.clone(), y.clone())
                };

                let mut tree = DecisionTree::new_classifier()
                    .with_criterion(self.criterion)
                    .with_min_samples_split(self.min_samples_split)
                    .with_min_samples_leaf(self.min_samples_leaf)
                    .with_max_features(max_features)
                    .with_random_state(seed);
                if let Some(depth) = self.max_depth {
                    tree = tree.with_max_depth(depth);
                }

                tree.fit_tree(&x_sample, &y_sample)?;
                Ok(tree)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut importances = Array1::zeros(self.n_features);
        for tree in &trees {
            if let Some(imp) = tree.feature_importances() {
                importances += imp;
            }
        }
        importances /= trees.len() as f64;

        self.feature_importances = Some(importances);
        self.trees = trees;
        Ok(())
    }

    /// Majority vote across trees; ties go to the smallest label
    pub fn predict_forest(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(TrainerError::ModelNotFitted);
        }

        let votes: Vec<Array1<f64>> = self
            .trees
            .par_iter()
            .map(|tree| tree.predict_tree(x))
            .collect::<Result<Vec<_>>>()?;

        let n_classes = self.classes.len();
        let predictions = (0..x.nrows())
            .map(|i| {
                let mut counts = vec![0usize; n_classes];
                for v in &votes {
                    if let Some(c) = self.classes.iter().position(|&c| c == v[i]) {
                        counts[c] += 1;
                    }
                }
                let best = counts
                    .iter()
                    .enumerate()
                    .fold((0usize, 0usize), |(bi, bc), (i, &c)| if c > bc { (i, c) } else { (bi, bc) })
                    .0;
                self.classes.get(best).copied().unwrap_or(0.0)
            })
            .collect();

        Ok(predictions)
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn name(&self) -> &'static str {
        "Random Forest"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.fit_forest(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.predict_forest(x)
    }

    fn set_params(&mut self, params: &Params) -> Result<()> {
        for (name, value) in params {
            match name.as_str() {
                "n_estimators" => self.n_estimators = value.as_positive_usize(name)?,
                "max_depth" => self.max_depth = Some(value.as_positive_usize(name)?),
                "min_samples_split" => self.min_samples_split = value.as_positive_usize(name)?.max(2),
                "min_samples_leaf" => self.min_samples_leaf = value.as_positive_usize(name)?,
                "max_features" => {
                    self.max_features = match value {
                        ParamValue::Str(s) if s == "sqrt" => MaxFeatures::Sqrt,
                        ParamValue::Str(s) if s == "log2" => MaxFeatures::Log2,
                        other => MaxFeatures::Fixed(other.as_positive_usize(name)?),
                    }
                }
                "criterion" => self.criterion = Criterion::parse(value.as_str(name)?)?,
                "random_state" => self.random_state = Some(value.as_positive_usize(name)? as u64),
                _ => return Err(unknown_param(self.name(), name, value)),
            }
        }
        Ok(())
    }

    fn params(&self) -> Params {
        let mut params = Params::new();
        params.insert("n_estimators".into(), self.n_estimators.into());
        params.insert("criterion".into(), self.criterion.as_str().into());
        params.insert("min_samples_split".into(), self.min_samples_split.into());
        params.insert("min_samples_leaf".into(), self.min_samples_leaf.into());
        params.insert(
            "max_features".into(),
            match self.max_features {
                MaxFeatures::Sqrt => "sqrt".into(),
                MaxFeatures::Log2 => "log2".into(),
                MaxFeatures::Fixed(n) => n.into(),
                MaxFeatures::All => "all".into(),
            },
        );
        if let Some(d) = self.max_depth {
            params.insert("max_depth".into(), d.into());
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn blobs() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [1.0, 2.0], [1.5, 1.8], [1.2, 2.2], [0.8, 1.9], [1.1, 2.1],
            [5.0, 8.0], [6.0, 9.0], [5.5, 8.5], [6.2, 8.1], [5.8, 9.2]
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_random_forest_classifier() {
        let (x, y) = blobs();
        let mut rf = RandomForest::new(10).with_random_state(7);
        rf.fit(&x, &y).unwrap();

        assert_eq!(rf.n_trees(), 10);
        assert_eq!(rf.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let (x, y) = blobs();
        let mut a = RandomForest::new(5).with_random_state(3);
        let mut b = RandomForest::new(5).with_random_state(3);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.feature_importances(), b.feature_importances());
    }

    #[test]
    fn test_n_estimators_param() {
        let (x, y) = blobs();
        let mut rf = RandomForest::default();
        let mut params = Params::new();
        params.insert("n_estimators".into(), 8usize.into());
        rf.set_params(&params).unwrap();
        rf.fit(&x, &y).unwrap();
        assert_eq!(rf.n_trees(), 8);
        assert_eq!(rf.params()["n_estimators"], ParamValue::Int(8));
    }

    #[test]
    fn test_predict_before_fit() {
        let rf = RandomForest::default();
        assert!(matches!(rf.predict(&array![[1.0, 2.0]]), Err(TrainerError::ModelNotFitted)));
    }
}
