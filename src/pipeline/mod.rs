//! Classification pipelines
//!
//! Every pipeline satisfies the [`Classifier`] capability: it is fitted on a
//! batch of epochs shaped `(epochs, channels, times)` with integer class
//! labels, and answers with one probability row per epoch. The catalog stores
//! pipelines as `Box<dyn Classifier>`, so user types can be registered next to
//! the tagged [`BuiltinPipeline`] variants.

pub mod builtin;
pub mod catalog;
pub mod features;
pub mod linear;
pub mod naive_bayes;
pub mod params;

pub use builtin::{BuiltinPipeline, BUILTIN_NAMES};
pub use catalog::{GridAxis, PipelineCatalog, PipelineEntry, TuningMode, TuningSpec};
pub use params::{ParamValue, Params};

use crate::error::{DecoderError, Result};
use ndarray::{Array1, Array2, Array3};
use std::fmt;

/// Fit/predict capability shared by every pipeline
pub trait Classifier: Send + Sync + fmt::Debug {
    /// Fit on `x` of shape `(epochs, channels, times)` and labels `y`.
    fn fit(&mut self, x: &Array3<f64>, y: &Array1<usize>) -> Result<()>;

    /// Per-class probabilities, one row per epoch. Column `k` is class `k`.
    fn predict_proba(&self, x: &Array3<f64>) -> Result<Array2<f64>>;

    /// Predicted labels (argmax of [`Classifier::predict_proba`])
    fn predict(&self, x: &Array3<f64>) -> Result<Array1<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(argmax_rows(&proba))
    }

    /// Fraction of exactly matching predictions
    fn score(&self, x: &Array3<f64>, y: &Array1<usize>) -> Result<f64> {
        let predictions = self.predict(x)?;
        accuracy(&predictions, y)
    }

    /// Set one hyperparameter by name.
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()>;

    /// Current hyperparameters
    fn params(&self) -> Params;

    /// Unfitted copy carrying the same hyperparameters
    fn clone_box(&self) -> Box<dyn Classifier>;
}

impl Clone for Box<dyn Classifier> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Apply every entry of `params` to `estimator`.
pub fn set_params(estimator: &mut dyn Classifier, params: &Params) -> Result<()> {
    for (name, value) in params {
        estimator.set_param(name, value)?;
    }
    Ok(())
}

/// Number of classes implied by a label vector (at least two).
pub fn n_classes(y: &Array1<usize>) -> usize {
    y.iter().copied().max().map(|m| m + 1).unwrap_or(0).max(2)
}

/// Row-wise argmax, first maximum wins.
pub fn argmax_rows(proba: &Array2<f64>) -> Array1<usize> {
    proba
        .rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            for (k, &p) in row.iter().enumerate() {
                if p > row[best] {
                    best = k;
                }
            }
            best
        })
        .collect()
}

/// Fraction of equal entries between two label vectors.
pub fn accuracy(predictions: &Array1<usize>, y: &Array1<usize>) -> Result<f64> {
    if predictions.len() != y.len() {
        return Err(DecoderError::ShapeError {
            expected: format!("{} predictions", y.len()),
            actual: format!("{} predictions", predictions.len()),
        });
    }
    if y.is_empty() {
        return Ok(0.0);
    }
    let correct = predictions.iter().zip(y.iter()).filter(|(p, t)| p == t).count();
    Ok(correct as f64 / y.len() as f64)
}

/// Check that `x` and `y` describe the same epochs.
pub(crate) fn check_fit_input(x: &Array3<f64>, y: &Array1<usize>) -> Result<()> {
    if x.shape()[0] != y.len() {
        return Err(DecoderError::ShapeError {
            expected: format!("{} labels", x.shape()[0]),
            actual: format!("{} labels", y.len()),
        });
    }
    if y.is_empty() {
        return Err(DecoderError::ValidationError(
            "cannot fit on zero epochs".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn int_param(name: &str, value: &ParamValue, min: i64) -> Result<usize> {
    match value.as_int() {
        Some(v) if v >= min => Ok(v as usize),
        _ => Err(DecoderError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: format!("expected an integer >= {}", min),
        }),
    }
}

pub(crate) fn float_param(name: &str, value: &ParamValue) -> Result<f64> {
    match value.as_float() {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(DecoderError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: "expected a positive number".to_string(),
        }),
    }
}

pub(crate) fn unknown_param(pipeline: &str, name: &str, value: &ParamValue) -> DecoderError {
    DecoderError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
        reason: format!("{} has no such parameter", pipeline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_argmax_rows() {
        let proba = array![[0.2, 0.8], [0.5, 0.5], [0.9, 0.1]];
        assert_eq!(argmax_rows(&proba).to_vec(), vec![1, 0, 0]);
    }

    #[test]
    fn test_accuracy() {
        let p = array![0, 1, 1, 0];
        let y = array![0, 1, 0, 0];
        assert!((accuracy(&p, &y).unwrap() - 0.75).abs() < 1e-12);
        assert!(accuracy(&p, &array![0, 1]).is_err());
    }

    #[test]
    fn test_n_classes() {
        assert_eq!(n_classes(&array![0, 0, 0]), 2);
        assert_eq!(n_classes(&array![0, 2, 1]), 3);
    }
}
