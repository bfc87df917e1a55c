//! Final scores from accumulated predictions

use super::cross_validation::CVResults;
use crate::error::{DecoderError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Receiver operating characteristic of the positive class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    /// Decreasing; the first threshold is one above the highest score
    pub thresholds: Vec<f64>,
    pub auc: f64,
}

/// Scores of one pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scorecard {
    pub n_samples: usize,
    /// `confusion[expected][predicted]`
    pub confusion: Vec<Vec<usize>>,
    pub accuracy: f64,
    /// Binary problems only
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    /// Binary problems with both classes present only
    pub roc: Option<RocCurve>,
    /// Per-fold accuracy
    pub folds: CVResults,
}

impl Scorecard {
    pub fn auc(&self) -> Option<f64> {
        self.roc.as_ref().map(|r| r.auc)
    }
}

/// Count `confusion[expected[i]][predicted[i]]`.
pub fn confusion_matrix(expected: &[usize], predicted: &[usize], n_classes: usize) -> Result<Vec<Vec<usize>>> {
    if expected.len() != predicted.len() {
        return Err(DecoderError::AggregationError(format!(
            "{} predictions for {} expected answers",
            predicted.len(),
            expected.len()
        )));
    }
    let mut confusion = vec![vec![0usize; n_classes]; n_classes];
    for (&e, &p) in expected.iter().zip(predicted) {
        if e >= n_classes || p >= n_classes {
            return Err(DecoderError::AggregationError(format!(
                "label {} outside of {} classes",
                e.max(p),
                n_classes
            )));
        }
        confusion[e][p] += 1;
    }
    Ok(confusion)
}

/// Precision and recall of class 1, each `0` when its denominator is `0`.
pub fn binary_precision_recall(confusion: &[Vec<usize>]) -> (f64, f64) {
    let tp = confusion[1][1];
    let fp = confusion[0][1];
    let fn_ = confusion[1][0];
    let precision = if tp + fp > 0 {
        tp as f64 / (tp + fp) as f64
    } else {
        0.0
    };
    let recall = if tp + fn_ > 0 {
        tp as f64 / (tp + fn_) as f64
    } else {
        0.0
    };
    (precision, recall)
}

/// ROC of class 1 against `scores`. `None` when either class is absent.
///
/// One point per distinct score, collinear points dropped, starting at
/// `(0, 0)`.
pub fn roc_curve(expected: &[usize], scores: &[f64]) -> Option<RocCurve> {
    let n_pos = expected.iter().filter(|&&e| e == 1).count();
    let n_neg = expected.len() - n_pos;
    if n_pos == 0 || n_neg == 0 || expected.len() != scores.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut tps = Vec::new();
    let mut fps = Vec::new();
    let mut thresholds = Vec::new();
    let (mut tp, mut fp) = (0usize, 0usize);
    for (i, &idx) in order.iter().enumerate() {
        if expected[idx] == 1 {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_value = order.get(i + 1).map_or(true, |&next| scores[next] != scores[idx]);
        if last_of_value {
            tps.push(tp);
            fps.push(fp);
            thresholds.push(scores[idx]);
        }
    }

    let last = tps.len() - 1;
    let keep: Vec<usize> = (0..tps.len())
        .filter(|&i| {
            i == 0
                || i == last
                || fps[i - 1] + fps[i + 1] != 2 * fps[i]
                || tps[i - 1] + tps[i + 1] != 2 * tps[i]
        })
        .collect();

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    let mut kept_thresholds = vec![thresholds[0] + 1.0];
    for i in keep {
        fpr.push(fps[i] as f64 / n_neg as f64);
        tpr.push(tps[i] as f64 / n_pos as f64);
        kept_thresholds.push(thresholds[i]);
    }
    let auc = auc(&fpr, &tpr);
    Some(RocCurve {
        fpr,
        tpr,
        thresholds: kept_thresholds,
        auc,
    })
}

/// Trapezoidal area under `(x, y)`.
pub fn auc(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[1] + ys[0]) / 2.0)
        .sum()
}

/// Builds scorecards for a fixed number of classes
#[derive(Debug, Clone, Copy)]
pub struct Scorer {
    n_classes: usize,
}

impl Scorer {
    pub fn new(n_classes: usize) -> Self {
        Self { n_classes }
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Score `predictions` and `probabilities` against `expected`.
    pub fn score(
        &self,
        pipeline: &str,
        expected: &[usize],
        predictions: &[usize],
        probabilities: &[Vec<f64>],
        fold_scores: Vec<f64>,
    ) -> Result<Scorecard> {
        let confusion = confusion_matrix(expected, predictions, self.n_classes)?;
        let total: usize = confusion.iter().flatten().sum();
        if total == 0 {
            return Err(DecoderError::AggregationError(format!("{} has no predictions", pipeline)));
        }
        let correct: usize = (0..self.n_classes).map(|k| confusion[k][k]).sum();
        let accuracy = correct as f64 / total as f64;

        let (mut precision, mut recall, mut roc) = (None, None, None);
        if self.n_classes == 2 {
            let (p, r) = binary_precision_recall(&confusion);
            precision = Some(p);
            recall = Some(r);

            if probabilities.len() != expected.len() {
                return Err(DecoderError::AggregationError(format!(
                    "{} has {} probability rows for {} expected answers",
                    pipeline,
                    probabilities.len(),
                    expected.len()
                )));
            }
            let positive: Vec<f64> = probabilities
                .iter()
                .map(|row| row.get(1).copied().unwrap_or(0.0))
                .collect();
            roc = roc_curve(expected, &positive);
            if roc.is_none() {
                warn!(pipeline = %pipeline, "ROC undefined, one class is absent from the expected answers");
            }
        }

        Ok(Scorecard {
            n_samples: total,
            confusion,
            accuracy,
            precision,
            recall,
            roc,
            folds: CVResults::from_scores(fold_scores),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_rows_match_class_counts() {
        let expected = [0, 0, 1, 1, 1, 2];
        let predicted = [0, 1, 1, 1, 0, 2];
        let confusion = confusion_matrix(&expected, &predicted, 3).unwrap();
        assert_eq!(confusion, vec![vec![1, 1, 0], vec![1, 2, 0], vec![0, 0, 1]]);
        let row_sums: Vec<usize> = confusion.iter().map(|r| r.iter().sum()).collect();
        assert_eq!(row_sums, vec![2, 3, 1]);
        assert!(confusion_matrix(&expected, &predicted, 2).is_err());
    }

    #[test]
    fn test_precision_recall_default_to_zero() {
        let never_positive = vec![vec![3, 0], vec![2, 0]];
        assert_eq!(binary_precision_recall(&never_positive), (0.0, 0.0));
        let (p, r) = binary_precision_recall(&[vec![1, 1], vec![1, 3]]);
        assert!((p - 0.75).abs() < 1e-12);
        assert!((r - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_roc_curve() {
        let expected = [0, 0, 1, 1];
        let scores = [0.1, 0.4, 0.35, 0.8];
        let roc = roc_curve(&expected, &scores).unwrap();
        assert_eq!(roc.fpr, vec![0.0, 0.0, 0.5, 0.5, 1.0]);
        assert_eq!(roc.tpr, vec![0.0, 0.5, 0.5, 1.0, 1.0]);
        assert!((roc.thresholds[0] - 1.8).abs() < 1e-12);
        assert!((roc.auc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_roc_perfect_and_undefined() {
        let roc = roc_curve(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]).unwrap();
        assert!((roc.auc - 1.0).abs() < 1e-12);
        assert!(roc_curve(&[1, 1, 1], &[0.2, 0.5, 0.9]).is_none());
    }

    #[test]
    fn test_scorecard_accuracy_is_trace_over_sum() {
        let expected = [0, 1, 1, 0, 1];
        let predictions = [0, 1, 0, 0, 1];
        let probabilities: Vec<Vec<f64>> = vec![
            vec![0.8, 0.2],
            vec![0.3, 0.7],
            vec![0.6, 0.4],
            vec![0.9, 0.1],
            vec![0.2, 0.8],
        ];
        let card = Scorer::new(2)
            .score("p", &expected, &predictions, &probabilities, vec![1.0, 0.5])
            .unwrap();
        let trace = (card.confusion[0][0] + card.confusion[1][1]) as f64;
        assert!((card.accuracy - trace / 5.0).abs() < 1e-12);
        assert!((card.accuracy - 0.8).abs() < 1e-12);
        assert_eq!(card.precision, Some(1.0));
        assert!((card.folds.mean_score - 0.75).abs() < 1e-12);
        assert!(card.auc().unwrap() > 0.9);
    }

    #[test]
    fn test_multiclass_has_no_binary_scores() {
        let card = Scorer::new(3)
            .score("p", &[0, 1, 2], &[0, 1, 1], &[], vec![])
            .unwrap();
        assert!(card.precision.is_none());
        assert!(card.roc.is_none());
        assert!(Scorer::new(3).score("p", &[], &[], &[], vec![]).is_err());
    }
}
