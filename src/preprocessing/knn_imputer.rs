//! KNN-based imputation of missing (`NaN`) feature values

use super::{is_missing, Transformer};
use crate::error::{Result, TrainerError};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Ordered float for the neighbour heap
#[derive(Debug, Clone, Copy)]
struct DistanceIdx(f64, usize);

impl PartialEq for DistanceIdx {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for DistanceIdx {}

impl PartialOrd for DistanceIdx {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DistanceIdx {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max heap by distance so the farthest neighbour is evicted first
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

/// Neighbour weighting when averaging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighborWeights {
    Uniform,
    Distance,
}

/// KNN imputer: each missing cell gets the mean of that feature over the
/// `n_neighbors` closest complete training rows (nan-euclidean distance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNNImputer {
    n_neighbors: usize,
    weights: NeighborWeights,
    /// Complete rows seen during `fit`
    complete_data: Option<Array2<f64>>,
    /// Fallback when a row has no usable neighbour
    feature_means: Option<Array1<f64>>,
}

impl Default for KNNImputer {
    fn default() -> Self {
        Self::new(3)
    }
}

impl KNNImputer {
    pub fn new(n_neighbors: usize) -> Self {
        Self {
            n_neighbors: n_neighbors.max(1),
            weights: NeighborWeights::Uniform,
            complete_data: None,
            feature_means: None,
        }
    }

    pub fn with_weights(mut self, weights: NeighborWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn n_neighbors(&self) -> usize {
        self.n_neighbors
    }

    pub fn is_fitted(&self) -> bool {
        self.complete_data.is_some()
    }

    /// Euclidean distance over coordinates present in both rows, rescaled
    /// by the fraction of coordinates used.
    fn distance(a: &[f64], b: &[f64]) -> f64 {
        let mut count = 0usize;
        let mut accum = 0.0f64;
        for (&ai, &bi) in a.iter().zip(b.iter()) {
            if is_missing(ai) || is_missing(bi) {
                continue;
            }
            count += 1;
            let d = ai - bi;
            accum += d * d;
        }

        if count == 0 {
            return f64::INFINITY;
        }
        (accum * a.len() as f64 / count as f64).sqrt()
    }

    fn find_neighbors(&self, data: &Array2<f64>, sample: &[f64]) -> Vec<(usize, f64)> {
        let k = self.n_neighbors;
        let mut heap: BinaryHeap<DistanceIdx> = BinaryHeap::with_capacity(k + 1);

        for (i, row) in data.rows().into_iter().enumerate() {
            let dist = match row.as_slice() {
                Some(slice) => Self::distance(sample, slice),
                None => Self::distance(sample, &row.to_vec()),
            };
            if !dist.is_finite() {
                continue;
            }
            if heap.len() < k {
                heap.push(DistanceIdx(dist, i));
            } else if let Some(&DistanceIdx(max_dist, _)) = heap.peek() {
                if dist < max_dist {
                    heap.pop();
                    heap.push(DistanceIdx(dist, i));
                }
            }
        }

        heap.into_iter().map(|DistanceIdx(d, i)| (i, d)).collect()
    }

    fn impute_value(&self, data: &Array2<f64>, neighbors: &[(usize, f64)], feature_idx: usize) -> f64 {
        let fallback = || {
            self.feature_means
                .as_ref()
                .map(|m| m[feature_idx])
                .unwrap_or(0.0)
        };

        if neighbors.is_empty() {
            return fallback();
        }

        match self.weights {
            NeighborWeights::Distance => {
                let mut weighted_sum = 0.0;
                let mut weight_sum = 0.0;
                for &(idx, dist) in neighbors {
                    let weight = if dist < 1e-10 { 1e10 } else { 1.0 / dist };
                    weighted_sum += data[[idx, feature_idx]] * weight;
                    weight_sum += weight;
                }
                if weight_sum > 0.0 {
                    weighted_sum / weight_sum
                } else {
                    fallback()
                }
            }
            NeighborWeights::Uniform => {
                let sum: f64 = neighbors.iter().map(|&(idx, _)| data[[idx, feature_idx]]).sum();
                sum / neighbors.len() as f64
            }
        }
    }
}

impl Transformer for KNNImputer {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        let complete_rows: Vec<usize> = x
            .rows()
            .into_iter()
            .enumerate()
            .filter(|(_, row)| !row.iter().any(|&v| is_missing(v)))
            .map(|(i, _)| i)
            .collect();

        if complete_rows.is_empty() {
            return Err(TrainerError::Validation(
                "No complete rows found for KNN imputation".to_string(),
            ));
        }

        let complete_data = x.select(Axis(0), &complete_rows);
        let feature_means = complete_data
            .mean_axis(Axis(0))
            .ok_or_else(|| TrainerError::Validation("Failed to compute means".to_string()))?;

        self.complete_data = Some(complete_data);
        self.feature_means = Some(feature_means);
        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let data = self.complete_data.as_ref().ok_or(TrainerError::ModelNotFitted)?;

        if x.ncols() != data.ncols() {
            return Err(TrainerError::Shape {
                expected: format!("{} features", data.ncols()),
                actual: format!("{} features", x.ncols()),
            });
        }

        let mut result = x.clone();
        let mut row_buf: Vec<f64> = Vec::with_capacity(x.ncols());

        for (row_idx, row) in x.rows().into_iter().enumerate() {
            if !row.iter().any(|&v| is_missing(v)) {
                continue;
            }

            row_buf.clear();
            row_buf.extend(row.iter().copied());
            let neighbors = self.find_neighbors(data, &row_buf);

            for (j, &v) in row_buf.iter().enumerate() {
                if is_missing(v) {
                    result[[row_idx, j]] = self.impute_value(data, &neighbors, j);
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knn_imputer_basic() {
        let data = Array2::from_shape_vec(
            (6, 2),
            vec![
                1.0, 10.0,
                2.0, 20.0,
                3.0, 30.0,
                4.0, 40.0,
                f64::NAN, 25.0,
                2.5, f64::NAN,
            ],
        )
        .unwrap();

        let mut imputer = KNNImputer::new(3);
        let result = imputer.fit_transform(&data).unwrap();

        assert!(!result.iter().any(|&v| v.is_nan()));
        assert!(result[[4, 0]] >= 1.0 && result[[4, 0]] <= 4.0);
        assert!(result[[5, 1]] >= 10.0 && result[[5, 1]] <= 40.0);
    }

    #[test]
    fn test_uniform_average_of_nearest() {
        let train = Array2::from_shape_vec(
            (4, 2),
            vec![0.0, 0.0, 1.0, 10.0, 2.0, 20.0, 100.0, 1000.0],
        )
        .unwrap();
        let mut imputer = KNNImputer::new(2);
        imputer.fit(&train).unwrap();

        let query = Array2::from_shape_vec((1, 2), vec![1.4, f64::NAN]).unwrap();
        let out = imputer.transform(&query).unwrap();
        // nearest rows on the first coordinate are x=1 and x=2
        assert!((out[[0, 1]] - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_transform_before_fit() {
        let imputer = KNNImputer::new(3);
        let x = Array2::zeros((2, 2));
        assert!(matches!(imputer.transform(&x), Err(TrainerError::ModelNotFitted)));
    }

    #[test]
    fn test_no_complete_rows() {
        let x = Array2::from_elem((3, 2), f64::NAN);
        let mut imputer = KNNImputer::new(3);
        assert!(imputer.fit(&x).is_err());
    }
}
