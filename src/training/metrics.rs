//! Evaluation metrics

use crate::entity::ClassificationMetricArtifact;
use crate::error::{Result, TrainerError};
use ndarray::Array1;

/// Label treated as the positive class by the binary scores
pub const POSITIVE_LABEL: f64 = 1.0;

#[inline]
fn same_label(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn check_lengths(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<()> {
    if y_true.len() != y_pred.len() {
        return Err(TrainerError::Shape {
            expected: format!("y_pred length = {}", y_true.len()),
            actual: format!("y_pred length = {}", y_pred.len()),
        });
    }
    if y_true.is_empty() {
        return Err(TrainerError::Validation("cannot score an empty target".to_string()));
    }
    Ok(())
}

/// Confusion counts for the positive label: (tp, fp, tn, fn)
pub fn confusion_counts(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> (usize, usize, usize, usize) {
    let mut tp = 0;
    let mut fp = 0;
    let mut tn = 0;
    let mut fn_ = 0;

    for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
        match (same_label(t, POSITIVE_LABEL), same_label(p, POSITIVE_LABEL)) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (false, false) => tn += 1,
            (true, false) => fn_ += 1,
        }
    }

    (tp, fp, tn, fn_)
}

/// Fraction of exactly matching labels
pub fn accuracy_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<f64> {
    check_lengths(y_true, y_pred)?;
    let correct = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| same_label(**t, **p))
        .count();
    Ok(correct as f64 / y_true.len() as f64)
}

/// Coefficient of determination.
/// A constant target scores 1.0 on a perfect fit and 0.0 otherwise.
pub fn r2_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<f64> {
    check_lengths(y_true, y_pred)?;
    let mean = y_true.mean().unwrap_or(0.0);
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}

/// Binary precision, recall and f1 for the positive label.
/// Zero denominators yield 0.0.
pub fn get_classification_score(
    y_true: &Array1<f64>,
    y_pred: &Array1<f64>,
) -> Result<ClassificationMetricArtifact> {
    check_lengths(y_true, y_pred)?;
    let (tp, fp, _, fn_) = confusion_counts(y_true, y_pred);

    let precision = if tp + fp > 0 { tp as f64 / (tp + fp) as f64 } else { 0.0 };
    let recall = if tp + fn_ > 0 { tp as f64 / (tp + fn_) as f64 } else { 0.0 };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    Ok(ClassificationMetricArtifact {
        f1_score: f1,
        precision_score: precision,
        recall_score: recall,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_classification_score() {
        let y_true = array![1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0];
        let y_pred = array![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0];

        let m = get_classification_score(&y_true, &y_pred).unwrap();
        // tp=3 fp=1 fn=1
        assert!((m.precision_score - 0.75).abs() < 1e-12);
        assert!((m.recall_score - 0.75).abs() < 1e-12);
        assert!((m.f1_score - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let y_true = array![0.0, 0.0, 0.0];
        let y_pred = array![0.0, 0.0, 0.0];
        let m = get_classification_score(&y_true, &y_pred).unwrap();
        assert_eq!(m.f1_score, 0.0);
        assert_eq!(m.precision_score, 0.0);
        assert_eq!(m.recall_score, 0.0);
    }

    #[test]
    fn test_length_mismatch() {
        let err = get_classification_score(&array![1.0, 0.0], &array![1.0]).unwrap_err();
        assert!(matches!(err, TrainerError::Shape { .. }));
    }

    #[test]
    fn test_r2() {
        let y_true = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let y_pred = array![1.1, 2.0, 2.9, 4.1, 5.0];
        assert!(r2_score(&y_true, &y_pred).unwrap() > 0.99);

        let constant = array![1.0, 1.0];
        assert_eq!(r2_score(&constant, &array![1.0, 1.0]).unwrap(), 1.0);
        assert_eq!(r2_score(&constant, &array![1.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_r2_tracks_accuracy_on_binary_labels() {
        let y_true = array![0.0, 1.0, 0.0, 1.0];
        let better = array![0.0, 1.0, 0.0, 0.0];
        let worse = array![1.0, 1.0, 0.0, 0.0];
        assert!(r2_score(&y_true, &better).unwrap() > r2_score(&y_true, &worse).unwrap());
        assert_eq!(accuracy_score(&y_true, &better).unwrap(), 0.75);
    }
}
