//! Gaussian Naive Bayes on feature vectors

use crate::error::{DecoderError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClassStats {
    means: Vec<f64>,
    variances: Vec<f64>,
    log_prior: f64,
}

/// Gaussian Naive Bayes Classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianNaiveBayes {
    /// Per-class statistics, `None` for classes absent from training
    stats: Vec<Option<ClassStats>>,
    /// Smoothing added to every variance, relative to the largest feature variance
    var_smoothing: f64,
}

impl Default for GaussianNaiveBayes {
    fn default() -> Self {
        Self::new()
    }
}

impl GaussianNaiveBayes {
    pub fn new() -> Self {
        Self {
            stats: Vec::new(),
            var_smoothing: 1e-9,
        }
    }

    /// Set variance smoothing parameter
    pub fn with_var_smoothing(mut self, smoothing: f64) -> Self {
        self.var_smoothing = smoothing;
        self
    }

    pub fn var_smoothing(&self) -> f64 {
        self.var_smoothing
    }

    pub fn unfitted(&self) -> Self {
        Self::new().with_var_smoothing(self.var_smoothing)
    }

    /// Fit the classifier
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<usize>, n_classes: usize) -> Result<()> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples != y.len() || n_samples == 0 {
            return Err(DecoderError::ShapeError {
                expected: format!("{} labels", n_samples),
                actual: format!("{} labels", y.len()),
            });
        }

        let max_var = (0..n_features)
            .map(|j| x.column(j).var(0.0))
            .fold(0.0, f64::max);
        let epsilon = self.var_smoothing * max_var.max(1e-300);

        self.stats = (0..n_classes)
            .map(|class| {
                // Single-pass Welford's algorithm for mean and variance
                let mut means = vec![0.0; n_features];
                let mut m2 = vec![0.0; n_features];
                let mut count = 0usize;
                for (row, _) in x.rows().into_iter().zip(y.iter()).filter(|(_, &l)| l == class) {
                    count += 1;
                    for (j, &val) in row.iter().enumerate() {
                        let delta = val - means[j];
                        means[j] += delta / count as f64;
                        m2[j] += delta * (val - means[j]);
                    }
                }
                if count == 0 {
                    return None;
                }
                let variances = m2.iter().map(|&m| m / count as f64 + epsilon).collect();
                Some(ClassStats {
                    means,
                    variances,
                    log_prior: (count as f64 / n_samples as f64).ln(),
                })
            })
            .collect();

        Ok(())
    }

    fn log_likelihood(row: &ArrayView1<f64>, stats: &ClassStats) -> f64 {
        row.iter()
            .zip(stats.means.iter())
            .zip(stats.variances.iter())
            .map(|((&xi, &mean), &var)| -0.5 * ((xi - mean).powi(2) / var + var.ln() + (2.0 * PI).ln()))
            .sum()
    }

    /// Predict probabilities, one column per class
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.stats.is_empty() {
            return Err(DecoderError::ModelNotFitted);
        }
        let mut proba = Array2::zeros((x.nrows(), self.stats.len()));

        for (i, row) in x.rows().into_iter().enumerate() {
            let log_joint: Vec<Option<f64>> = self
                .stats
                .iter()
                .map(|s| s.as_ref().map(|s| s.log_prior + Self::log_likelihood(&row, s)))
                .collect();

            // Normalize (log-sum-exp trick)
            let max_val = log_joint
                .iter()
                .flatten()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max);
            let sum: f64 = log_joint.iter().flatten().map(|&v| (v - max_val).exp()).sum();
            for (k, value) in log_joint.iter().enumerate() {
                if let Some(v) = value {
                    proba[[i, k]] = (v - max_val).exp() / sum;
                }
            }
        }

        Ok(proba)
    }
}
