//! Backward-elimination electrode selection on covariance matrices

use crate::error::{DecoderError, Result};
use crate::pipeline::features::{class_log_means, log_matrices, select_channels, tangent_vectors};
use crate::pipeline::linear::LogisticRegression;
use crate::pipeline::n_classes;
use crate::utils::linalg::{expm, frobenius_distance, logm};
use ndarray::{Array1, Array2, Array3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Keeps the `nelec` channels that best separate the class-mean covariances,
/// then fits a tangent-space logistic regression on the reduced matrices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectrodeSelection {
    pub nelec: usize,
    subset: Option<Vec<usize>>,
    /// Criterion value after each removal
    distances: Vec<f64>,
    scorer: LogisticRegression,
    n_classes: usize,
}

impl ElectrodeSelection {
    pub fn new(nelec: usize) -> Self {
        Self {
            nelec,
            subset: None,
            distances: Vec::new(),
            scorer: LogisticRegression::new(),
            n_classes: 0,
        }
    }

    /// Selected channel indices, in ascending order
    pub fn subset(&self) -> Option<&[usize]> {
        self.subset.as_deref()
    }

    pub fn distances(&self) -> &[f64] {
        &self.distances
    }

    /// Fit on covariances `(epochs, channels, channels)`.
    pub fn fit(&mut self, covs: &Array3<f64>, y: &Array1<usize>) -> Result<()> {
        let n_channels = covs.shape()[1];
        if self.nelec == 0 || self.nelec > n_channels {
            return Err(DecoderError::InvalidParameter {
                name: "nelec".to_string(),
                value: self.nelec.to_string(),
                reason: format!("must be in [1, {}]", n_channels),
            });
        }
        if covs.shape()[0] != y.len() {
            return Err(DecoderError::ShapeError {
                expected: format!("{} labels", covs.shape()[0]),
                actual: format!("{} labels", y.len()),
            });
        }

        self.n_classes = n_classes(y);
        let logs = log_matrices(covs)?;
        let means: Vec<Array2<f64>> = class_log_means(&logs, y, self.n_classes)
            .into_iter()
            .flatten()
            .map(|l| expm(&l.view()))
            .collect::<Result<_>>()?;

        let mut subset: Vec<usize> = (0..n_channels).collect();
        self.distances.clear();
        while subset.len() > self.nelec {
            let criteria: Vec<f64> = (0..subset.len())
                .into_par_iter()
                .map(|drop| {
                    let mut candidate = subset.clone();
                    candidate.remove(drop);
                    pairwise_distance(&means, &candidate)
                })
                .collect::<Result<_>>()?;

            let mut best = 0;
            for (i, &c) in criteria.iter().enumerate() {
                if c > criteria[best] {
                    best = i;
                }
            }
            self.distances.push(criteria[best]);
            subset.remove(best);
        }

        let reduced = select_channels(covs, &subset);
        self.subset = Some(subset);
        self.scorer = self.scorer.unfitted();
        self.scorer.fit(&tangent_vectors(&reduced)?, y, self.n_classes)?;
        Ok(())
    }

    /// Reduce covariances to the selected channels.
    pub fn transform(&self, covs: &Array3<f64>) -> Result<Array3<f64>> {
        let subset = self.subset.as_ref().ok_or(DecoderError::ModelNotFitted)?;
        if let Some(&max) = subset.iter().max() {
            if max >= covs.shape()[1] {
                return Err(DecoderError::ShapeError {
                    expected: format!("at least {} channels", max + 1),
                    actual: format!("{} channels", covs.shape()[1]),
                });
            }
        }
        Ok(select_channels(covs, subset))
    }

    /// Probabilities from the internal tangent-space scorer.
    pub fn predict_proba(&self, covs: &Array3<f64>) -> Result<Array2<f64>> {
        let reduced = self.transform(covs)?;
        self.scorer.predict_proba(&tangent_vectors(&reduced)?)
    }

    pub fn predict(&self, covs: &Array3<f64>) -> Result<Array1<usize>> {
        Ok(crate::pipeline::argmax_rows(&self.predict_proba(covs)?))
    }

    /// Fraction of held-out epochs whose predicted label matches exactly.
    pub fn score(&self, covs: &Array3<f64>, y: &Array1<usize>) -> Result<f64> {
        crate::pipeline::accuracy(&self.predict(covs)?, y)
    }
}

/// Sum of log-Euclidean distances between every pair of class means,
/// restricted to `channels`.
fn pairwise_distance(means: &[Array2<f64>], channels: &[usize]) -> Result<f64> {
    let logs: Vec<Array2<f64>> = means
        .iter()
        .map(|m| {
            let k = channels.len();
            let sub = Array2::from_shape_fn((k, k), |(a, b)| m[[channels[a], channels[b]]]);
            logm(&sub.view())
        })
        .collect::<Result<_>>()?;

    let mut total = 0.0;
    for i in 0..logs.len() {
        for j in (i + 1)..logs.len() {
            total += frobenius_distance(&logs[i].view(), &logs[j].view());
        }
    }
    Ok(total)
}
