//! Decision tree (CART) implementation
//!
//! Used directly as a classifier, as the base learner of the random forest,
//! and in regression mode as the weak learner of gradient boosting.

use super::models::{check_xy, unique_classes, unknown_param, Classifier, ParamValue, Params};
use crate::error::{Result, TrainerError};
use ndarray::{Array1, Array2};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node with prediction value
    Leaf { value: f64, n_samples: usize },
    /// Internal node with split
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
        impurity: f64,
    },
}

/// Impurity criterion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Criterion {
    /// Gini impurity (classification)
    Gini,
    /// Shannon entropy (classification)
    Entropy,
    /// Same impurity as `Entropy`, kept as its own name for grids
    LogLoss,
    /// Mean squared error (regression)
    MSE,
}

impl Criterion {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "gini" => Ok(Criterion::Gini),
            "entropy" => Ok(Criterion::Entropy),
            "log_loss" => Ok(Criterion::LogLoss),
            "squared_error" | "mse" => Ok(Criterion::MSE),
            other => Err(TrainerError::InvalidParameter {
                name: "criterion".to_string(),
                value: other.to_string(),
                reason: "expected gini, entropy, log_loss or squared_error".to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::Gini => "gini",
            Criterion::Entropy => "entropy",
            Criterion::LogLoss => "log_loss",
            Criterion::MSE => "squared_error",
        }
    }

    fn is_classification(&self) -> bool {
        !matches!(self, Criterion::MSE)
    }
}

/// Impurity from per-class counts
fn class_impurity(criterion: Criterion, counts: &[usize], n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    match criterion {
        Criterion::Gini => 1.0 - counts.iter().map(|&c| (c as f64 / n).powi(2)).sum::<f64>(),
        Criterion::Entropy | Criterion::LogLoss => -counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / n;
                p * p.log2()
            })
            .sum::<f64>(),
        Criterion::MSE => 0.0,
    }
}

/// Variance from running sums: E[X²] - E[X]²
fn variance(n: usize, sum: f64, sq_sum: f64) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let n = n as f64;
    (sq_sum / n - (sum / n).powi(2)).max(0.0)
}

/// Best split found for one feature
#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
}

/// Training targets, either class indices or raw values
enum Targets<'a> {
    Classes { idx: &'a [usize], n_classes: usize },
    Values(&'a [f64]),
}

/// Decision tree model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features examined per split (None = all)
    pub max_features: Option<usize>,
    pub criterion: Criterion,
    pub random_state: Option<u64>,
    n_features: usize,
    feature_importances: Option<Array1<f64>>,
    is_classification: bool,
    classes: Vec<f64>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new_classifier()
    }
}

impl DecisionTree {
    /// Create a new classifier tree
    pub fn new_classifier() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            criterion: Criterion::Gini,
            random_state: None,
            n_features: 0,
            feature_importances: None,
            is_classification: true,
            classes: Vec::new(),
        }
    }

    /// Create a new regressor tree
    pub fn new_regressor() -> Self {
        Self {
            criterion: Criterion::MSE,
            is_classification: false,
            ..Self::new_classifier()
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_min_samples_split(mut self, min_samples: usize) -> Self {
        self.min_samples_split = min_samples.max(2);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = Some(max_features.max(1));
        self
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Fit the tree to training data
    pub fn fit_tree(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        if self.is_classification != self.criterion.is_classification() {
            return Err(TrainerError::InvalidParameter {
                name: "criterion".to_string(),
                value: self.criterion.as_str().to_string(),
                reason: "criterion does not match the tree's task".to_string(),
            });
        }

        let n_samples = x.nrows();
        self.n_features = x.ncols();
        let mut importances = vec![0.0; self.n_features];
        let indices: Vec<usize> = (0..n_samples).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state.unwrap_or(0));

        let root = if self.is_classification {
            self.classes = unique_classes(y);
            let class_idx: Vec<usize> = y
                .iter()
                .map(|v| {
                    self.classes
                        .iter()
                        .position(|c| c == v)
                        .unwrap_or(0)
                })
                .collect();
            let targets = Targets::Classes {
                idx: &class_idx,
                n_classes: self.classes.len(),
            };
            self.build_tree(x, &targets, &indices, 0, &mut importances, &mut rng)
        } else {
            let values = y.to_vec();
            self.build_tree(x, &Targets::Values(&values), &indices, 0, &mut importances, &mut rng)
        };
        self.root = Some(root);

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in &mut importances {
                *imp /= total;
            }
        }
        self.feature_importances = Some(Array1::from_vec(importances));
        Ok(())
    }

    fn node_impurity(&self, targets: &Targets<'_>, indices: &[usize]) -> f64 {
        match targets {
            Targets::Classes { idx, n_classes } => {
                let mut counts = vec![0usize; *n_classes];
                for &i in indices {
                    counts[idx[i]] += 1;
                }
                class_impurity(self.criterion, &counts, indices.len())
            }
            Targets::Values(values) => {
                let (sum, sq) = indices
                    .iter()
                    .fold((0.0, 0.0), |(s, q), &i| (s + values[i], q + values[i] * values[i]));
                variance(indices.len(), sum, sq)
            }
        }
    }

    fn leaf_value(&self, targets: &Targets<'_>, indices: &[usize]) -> f64 {
        match targets {
            Targets::Classes { idx, n_classes } => {
                let mut counts = vec![0usize; *n_classes];
                for &i in indices {
                    counts[idx[i]] += 1;
                }
                // ties go to the smallest label
                let best = counts
                    .iter()
                    .enumerate()
                    .fold((0usize, 0usize), |(bi, bc), (i, &c)| if c > bc { (i, c) } else { (bi, bc) })
                    .0;
                self.classes.get(best).copied().unwrap_or(0.0)
            }
            Targets::Values(values) => {
                if indices.is_empty() {
                    return 0.0;
                }
                indices.iter().map(|&i| values[i]).sum::<f64>() / indices.len() as f64
            }
        }
    }

    fn build_tree(
        &self,
        x: &Array2<f64>,
        targets: &Targets<'_>,
        indices: &[usize],
        depth: usize,
        importances: &mut [f64],
        rng: &mut ChaCha8Rng,
    ) -> TreeNode {
        let n_samples = indices.len();
        let impurity = self.node_impurity(targets, indices);

        let should_stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d)
            || impurity <= 1e-12;

        if should_stop {
            return TreeNode::Leaf {
                value: self.leaf_value(targets, indices),
                n_samples,
            };
        }

        let features = self.features_for_split(rng);
        let best = match self.find_best_split(x, targets, indices, &features, impurity) {
            Some(best) => best,
            None => {
                return TreeNode::Leaf {
                    value: self.leaf_value(targets, indices),
                    n_samples,
                }
            }
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[[i, best.feature_idx]] <= best.threshold);

        importances[best.feature_idx] += n_samples as f64 * best.gain;

        let left = Box::new(self.build_tree(x, targets, &left_indices, depth + 1, importances, rng));
        let right = Box::new(self.build_tree(x, targets, &right_indices, depth + 1, importances, rng));

        TreeNode::Split {
            feature_idx: best.feature_idx,
            threshold: best.threshold,
            left,
            right,
            n_samples,
            impurity,
        }
    }

    fn features_for_split(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        match self.max_features {
            Some(k) if k < self.n_features => {
                let mut chosen = sample(rng, self.n_features, k).into_vec();
                chosen.sort_unstable();
                chosen
            }
            _ => (0..self.n_features).collect(),
        }
    }

    /// Scan each candidate feature in sorted order, keeping running class
    /// counts (or sums) so every threshold is scored in O(1).
    fn find_best_split(
        &self,
        x: &Array2<f64>,
        targets: &Targets<'_>,
        indices: &[usize],
        features: &[usize],
        parent_impurity: f64,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let min_leaf = self.min_samples_leaf;

        let feature_results: Vec<Option<SplitCandidate>> = features
            .par_iter()
            .map(|&feature_idx| {
                let mut order: Vec<usize> = indices.to_vec();
                // total_cmp sorts NaN after every number
                order.sort_by(|&a, &b| x[[a, feature_idx]].total_cmp(&x[[b, feature_idx]]));

                let mut best: Option<SplitCandidate> = None;
                let mut consider = |left_n: usize, left_imp: f64, right_imp: f64, threshold: f64| {
                    let right_n = n - left_n;
                    let weighted =
                        (left_n as f64 * left_imp + right_n as f64 * right_imp) / n as f64;
                    let gain = parent_impurity - weighted;
                    if gain > 1e-12 && best.map_or(true, |b| gain > b.gain) {
                        best = Some(SplitCandidate { feature_idx, threshold, gain });
                    }
                };

                match targets {
                    Targets::Classes { idx, n_classes } => {
                        let mut total = vec![0usize; *n_classes];
                        for &i in &order {
                            total[idx[i]] += 1;
                        }
                        let mut left = vec![0usize; *n_classes];
                        let mut right = total.clone();

                        for pos in 0..n - 1 {
                            let i = order[pos];
                            left[idx[i]] += 1;
                            right[idx[i]] -= 1;

                            let value = x[[i, feature_idx]];
                            let next = x[[order[pos + 1], feature_idx]];
                            let left_n = pos + 1;
                            if next.is_nan()
                                || next <= value
                                || left_n < min_leaf
                                || n - left_n < min_leaf
                            {
                                continue;
                            }
                            let li = class_impurity(self.criterion, &left, left_n);
                            let ri = class_impurity(self.criterion, &right, n - left_n);
                            consider(left_n, li, ri, (value + next) / 2.0);
                        }
                    }
                    Targets::Values(values) => {
                        let (total_sum, total_sq) = order
                            .iter()
                            .fold((0.0, 0.0), |(s, q), &i| (s + values[i], q + values[i] * values[i]));
                        let mut left_sum = 0.0;
                        let mut left_sq = 0.0;

                        for pos in 0..n - 1 {
                            let i = order[pos];
                            left_sum += values[i];
                            left_sq += values[i] * values[i];

                            let value = x[[i, feature_idx]];
                            let next = x[[order[pos + 1], feature_idx]];
                            let left_n = pos + 1;
                            if next.is_nan()
                                || next <= value
                                || left_n < min_leaf
                                || n - left_n < min_leaf
                            {
                                continue;
                            }
                            let li = variance(left_n, left_sum, left_sq);
                            let ri = variance(n - left_n, total_sum - left_sum, total_sq - left_sq);
                            consider(left_n, li, ri, (value + next) / 2.0);
                        }
                    }
                }

                best
            })
            .collect();

        // highest gain wins, lower feature index on ties
        feature_results.into_iter().flatten().max_by(|a, b| {
            a.gain
                .total_cmp(&b.gain)
                .then(b.feature_idx.cmp(&a.feature_idx))
        })
    }

    /// Predict every row
    pub fn predict_tree(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(TrainerError::ModelNotFitted)?;
        if x.ncols() != self.n_features {
            return Err(TrainerError::Shape {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        Ok(x.rows()
            .into_iter()
            .map(|row| {
                let mut node = root;
                loop {
                    match node {
                        TreeNode::Leaf { value, .. } => break *value,
                        TreeNode::Split { feature_idx, threshold, left, right, .. } => {
                            node = if row[*feature_idx] <= *threshold { left } else { right };
                        }
                    }
                }
            })
            .collect())
    }

    /// Replace each leaf value with `leaf_value(rows of x reaching that leaf)`.
    /// Leaves no row reaches keep their value.
    pub fn refit_leaves<F>(&mut self, x: &Array2<f64>, leaf_value: F) -> Result<()>
    where
        F: Fn(&[usize]) -> f64,
    {
        fn walk<F: Fn(&[usize]) -> f64>(node: &mut TreeNode, x: &Array2<f64>, rows: Vec<usize>, f: &F) {
            match node {
                TreeNode::Leaf { value, .. } => {
                    if !rows.is_empty() {
                        *value = f(&rows);
                    }
                }
                TreeNode::Split { feature_idx, threshold, left, right, .. } => {
                    let (l, r): (Vec<usize>, Vec<usize>) =
                        rows.into_iter().partition(|&i| x[[i, *feature_idx]] <= *threshold);
                    walk(left, x, l, f);
                    walk(right, x, r, f);
                }
            }
        }

        let root = self.root.as_mut().ok_or(TrainerError::ModelNotFitted)?;
        walk(root, x, (0..x.nrows()).collect(), &leaf_value);
        Ok(())
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    pub fn classes(&self) -> &[f64] {
        &self.classes
    }

    pub fn is_fitted(&self) -> bool {
        self.root.is_some()
    }

    /// Tree depth (a lone leaf has depth 1)
    pub fn get_depth(&self) -> usize {
        fn depth(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 1,
                TreeNode::Split { left, right, .. } => 1 + depth(left).max(depth(right)),
            }
        }
        self.root.as_ref().map_or(0, depth)
    }

    pub fn get_n_leaves(&self) -> usize {
        fn leaves(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 1,
                TreeNode::Split { left, right, .. } => leaves(left) + leaves(right),
            }
        }
        self.root.as_ref().map_or(0, leaves)
    }
}

impl Classifier for DecisionTree {
    fn name(&self) -> &'static str {
        "Decision Tree"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.fit_tree(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.predict_tree(x)
    }

    fn set_params(&mut self, params: &Params) -> Result<()> {
        for (name, value) in params {
            match name.as_str() {
                "criterion" => self.criterion = Criterion::parse(value.as_str(name)?)?,
                "max_depth" => self.max_depth = Some(value.as_positive_usize(name)?),
                "min_samples_split" => self.min_samples_split = value.as_positive_usize(name)?.max(2),
                "min_samples_leaf" => self.min_samples_leaf = value.as_positive_usize(name)?,
                "max_features" => self.max_features = Some(value.as_positive_usize(name)?),
                "random_state" => self.random_state = Some(value.as_positive_usize(name)? as u64),
                _ => return Err(unknown_param(self.name(), name, value)),
            }
        }
        Ok(())
    }

    fn params(&self) -> Params {
        let mut params = Params::new();
        params.insert("criterion".into(), ParamValue::from(self.criterion.as_str()));
        params.insert("min_samples_split".into(), self.min_samples_split.into());
        params.insert("min_samples_leaf".into(), self.min_samples_leaf.into());
        if let Some(d) = self.max_depth {
            params.insert("max_depth".into(), d.into());
        }
        if let Some(m) = self.max_features {
            params.insert("max_features".into(), m.into());
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_classifier_separable() {
        let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];

        let mut tree = DecisionTree::new_classifier();
        tree.fit(&x, &y).unwrap();

        assert_eq!(tree.predict(&x).unwrap(), y);
        assert_eq!(tree.get_depth(), 2);
        assert_eq!(tree.get_n_leaves(), 2);
    }

    #[test]
    fn test_xor_needs_depth() {
        let x = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
        let y = array![0.0, 1.0, 1.0, 0.0];

        let mut tree = DecisionTree::new_classifier();
        tree.fit(&x, &y).unwrap();
        // gini gain on the first split of XOR is zero, so the root stays a leaf
        assert_eq!(tree.get_n_leaves(), 1);
    }

    #[test]
    fn test_regressor_simple() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0];

        let mut tree = DecisionTree::new_regressor();
        tree.fit(&x, &y).unwrap();

        let predictions = tree.predict(&x).unwrap();
        let mse: f64 = predictions
            .iter()
            .zip(y.iter())
            .map(|(p, a)| (p - a).powi(2))
            .sum::<f64>()
            / y.len() as f64;
        assert!(mse < 1e-12, "MSE too high: {}", mse);
    }

    #[test]
    fn test_max_depth() {
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]];
        let y = array![0.0, 1.0, 0.0, 1.0];

        let mut tree = DecisionTree::new_classifier().with_max_depth(2);
        tree.fit(&x, &y).unwrap();
        assert!(tree.get_depth() <= 3);
    }

    #[test]
    fn test_feature_importances() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];

        let mut tree = DecisionTree::new_classifier();
        tree.fit(&x, &y).unwrap();

        let importances = tree.feature_importances().unwrap();
        assert_eq!(importances[0], 1.0);
        assert_eq!(importances[1], 0.0);
    }

    #[test]
    fn test_criteria_from_params() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];

        for name in ["gini", "entropy", "log_loss"] {
            let mut tree = DecisionTree::new_classifier();
            let mut params = Params::new();
            params.insert("criterion".into(), name.into());
            tree.set_params(&params).unwrap();
            tree.fit(&x, &y).unwrap();
            assert_eq!(tree.predict(&x).unwrap(), y, "criterion {}", name);
        }
    }

    #[test]
    fn test_unknown_param_rejected() {
        let mut tree = DecisionTree::new_classifier();
        let mut params = Params::new();
        params.insert("splitter".into(), "random".into());
        assert!(matches!(
            tree.set_params(&params),
            Err(TrainerError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_single_class_is_constant() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![1.0, 1.0, 1.0];
        let mut tree = DecisionTree::new_classifier();
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.predict(&array![[10.0]]).unwrap(), array![1.0]);
    }

    #[test]
    fn test_nan_feature_values_do_not_break_fit() {
        let nan = f64::NAN;
        let x = array![
            [nan, 0.0],
            [1.0, 0.0],
            [nan, 0.0],
            [3.0, 1.0],
            [nan, 1.0],
            [2.0, 1.0]
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];

        let mut tree = DecisionTree::new_classifier();
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_predict_before_fit() {
        let tree = DecisionTree::new_classifier();
        assert!(matches!(tree.predict(&array![[1.0]]), Err(TrainerError::ModelNotFitted)));
    }
}
