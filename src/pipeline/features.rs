//! Feature extraction from epochs
//!
//! Epoch batches are `(epochs, channels, times)`. Covariance batches are
//! `(epochs, channels, channels)`.

use crate::error::{DecoderError, Result};
use crate::utils::linalg::{inv_sqrtm, logm, symmetric_eigen, upper_triangle};
use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Floor applied before taking logs of variances or powers.
const LOG_FLOOR: f64 = 1e-20;

/// Oracle Approximating Shrinkage covariance of one epoch `(channels, times)`.
pub fn oas_covariance(epoch: &ArrayView2<f64>) -> Array2<f64> {
    let p = epoch.nrows();
    let n = epoch.ncols().max(1);

    let mean = epoch.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(p));
    let centered = epoch - &mean.insert_axis(Axis(1));
    let emp = centered.dot(&centered.t()) / n as f64;

    let mu = emp.diag().sum() / p as f64;
    let alpha = emp.iter().map(|v| v * v).sum::<f64>() / (p * p) as f64;
    let num = alpha + mu * mu;
    let den = (n as f64 + 1.0) * (alpha - mu * mu / p as f64);
    let shrinkage = if den == 0.0 { 1.0 } else { (num / den).min(1.0) };

    let mut shrunk = emp * (1.0 - shrinkage);
    for i in 0..p {
        shrunk[[i, i]] += shrinkage * mu;
    }
    shrunk
}

/// OAS covariance of every epoch, computed in parallel.
pub fn covariances(x: &Array3<f64>) -> Array3<f64> {
    let (n_epochs, n_channels, _) = x.dim();
    let covs: Vec<Array2<f64>> = (0..n_epochs)
        .into_par_iter()
        .map(|i| oas_covariance(&x.index_axis(Axis(0), i)))
        .collect();

    let mut out = Array3::zeros((n_epochs, n_channels, n_channels));
    for (i, cov) in covs.into_iter().enumerate() {
        out.index_axis_mut(Axis(0), i).assign(&cov);
    }
    out
}

/// Matrix log of every covariance.
pub fn log_matrices(covs: &Array3<f64>) -> Result<Array3<f64>> {
    let n = covs.shape()[0];
    let logs: Vec<Array2<f64>> = (0..n)
        .into_par_iter()
        .map(|i| logm(&covs.index_axis(Axis(0), i)))
        .collect::<Result<_>>()?;

    let mut out = Array3::zeros(covs.raw_dim());
    for (i, l) in logs.into_iter().enumerate() {
        out.index_axis_mut(Axis(0), i).assign(&l);
    }
    Ok(out)
}

/// Log-Euclidean tangent vectors, one row per covariance.
pub fn tangent_vectors(covs: &Array3<f64>) -> Result<Array2<f64>> {
    let logs = log_matrices(covs)?;
    let c = covs.shape()[1];
    let mut out = Array2::zeros((covs.shape()[0], c * (c + 1) / 2));
    for (i, l) in logs.outer_iter().enumerate() {
        out.row_mut(i).assign(&upper_triangle(&l));
    }
    Ok(out)
}

/// Restrict covariance matrices to a channel subset.
pub fn select_channels(covs: &Array3<f64>, channels: &[usize]) -> Array3<f64> {
    let n = covs.shape()[0];
    let k = channels.len();
    let mut out = Array3::zeros((n, k, k));
    for e in 0..n {
        for (a, &ca) in channels.iter().enumerate() {
            for (b, &cb) in channels.iter().enumerate() {
                out[[e, a, b]] = covs[[e, ca, cb]];
            }
        }
    }
    out
}

/// Per-channel log-variance, one row per epoch.
pub fn log_variance(x: &Array3<f64>) -> Array2<f64> {
    let (n_epochs, n_channels, _) = x.dim();
    let mut out = Array2::zeros((n_epochs, n_channels));
    for (i, epoch) in x.outer_iter().enumerate() {
        for (c, channel) in epoch.outer_iter().enumerate() {
            out[[i, c]] = channel.var(0.0).max(LOG_FLOOR).ln();
        }
    }
    out
}

/// Average non-overlapping windows of `factor` samples and flatten each epoch.
pub fn downsample_flatten(x: &Array3<f64>, factor: usize) -> Result<Array2<f64>> {
    let (n_epochs, n_channels, n_times) = x.dim();
    if factor == 0 || factor > n_times {
        return Err(DecoderError::InvalidParameter {
            name: "factor".to_string(),
            value: factor.to_string(),
            reason: format!("must be in [1, {}]", n_times),
        });
    }
    let n_out = n_times / factor;
    let mut out = Array2::zeros((n_epochs, n_channels * n_out));
    for (i, epoch) in x.outer_iter().enumerate() {
        for (c, channel) in epoch.outer_iter().enumerate() {
            for w in 0..n_out {
                let window = channel.slice(s![w * factor..(w + 1) * factor]);
                out[[i, c * n_out + w]] = window.mean().unwrap_or(0.0);
            }
        }
    }
    Ok(out)
}

/// Mean of each class's covariances, as matrix logs (log-Euclidean mean).
///
/// Classes without samples get `None`.
pub fn class_log_means(logs: &Array3<f64>, y: &Array1<usize>, n_classes: usize) -> Vec<Option<Array2<f64>>> {
    (0..n_classes)
        .map(|class| {
            let idx: Vec<usize> = (0..y.len()).filter(|&i| y[i] == class).collect();
            if idx.is_empty() {
                return None;
            }
            let mut sum = Array2::zeros((logs.shape()[1], logs.shape()[2]));
            for &i in &idx {
                sum += &logs.index_axis(Axis(0), i);
            }
            Some(sum / idx.len() as f64)
        })
        .collect()
}

/// Two-class common spatial pattern filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonSpatialPatterns {
    pub n_components: usize,
    /// Spatial filters, one column per component
    filters: Option<Array2<f64>>,
}

impl CommonSpatialPatterns {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            filters: None,
        }
    }

    /// Fit filters from class-mean covariances. Components are ordered by how
    /// far their eigenvalue lies from 0.5, most discriminative first.
    pub fn fit(&mut self, covs: &Array3<f64>, y: &Array1<usize>) -> Result<()> {
        let classes: Vec<usize> = {
            let mut c: Vec<usize> = y.to_vec();
            c.sort_unstable();
            c.dedup();
            c
        };
        if classes.len() != 2 {
            return Err(DecoderError::ValidationError(format!(
                "CSP needs exactly two classes, got {}",
                classes.len()
            )));
        }
        let n_channels = covs.shape()[1];
        if self.n_components == 0 || self.n_components > n_channels {
            return Err(DecoderError::InvalidParameter {
                name: "n_components".to_string(),
                value: self.n_components.to_string(),
                reason: format!("must be in [1, {}]", n_channels),
            });
        }

        let class_mean = |class: usize| -> Array2<f64> {
            let mut sum = Array2::zeros((n_channels, n_channels));
            let mut count = 0.0;
            for (cov, _) in covs.outer_iter().zip(y.iter()).filter(|(_, &l)| l == class) {
                sum += &cov;
                count += 1.0;
            }
            sum / count
        };
        let c0 = class_mean(classes[0]);
        let c1 = class_mean(classes[1]);

        let whitening = inv_sqrtm(&(&c0 + &c1).view())?;
        let whitened = whitening.dot(&c0).dot(&whitening);
        let (eigenvalues, vectors) = symmetric_eigen(&whitened.view())?;

        let mut order: Vec<usize> = (0..n_channels).collect();
        order.sort_by(|&a, &b| {
            let da = (eigenvalues[a] - 0.5).abs();
            let db = (eigenvalues[b] - 0.5).abs();
            db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
        });

        let all = whitening.dot(&vectors);
        let mut filters = Array2::zeros((n_channels, self.n_components));
        for (k, &idx) in order.iter().take(self.n_components).enumerate() {
            filters.column_mut(k).assign(&all.column(idx));
        }
        self.filters = Some(filters);
        Ok(())
    }

    /// Log average power of every component, one row per covariance.
    pub fn transform(&self, covs: &Array3<f64>) -> Result<Array2<f64>> {
        let filters = self.filters.as_ref().ok_or(DecoderError::ModelNotFitted)?;
        if covs.shape()[1] != filters.nrows() {
            return Err(DecoderError::ShapeError {
                expected: format!("{} channels", filters.nrows()),
                actual: format!("{} channels", covs.shape()[1]),
            });
        }
        let mut out = Array2::zeros((covs.shape()[0], filters.ncols()));
        for (i, cov) in covs.outer_iter().enumerate() {
            let projected = filters.t().dot(&cov).dot(filters);
            for k in 0..filters.ncols() {
                out[[i, k]] = projected[[k, k]].max(LOG_FLOOR).ln();
            }
        }
        Ok(out)
    }
}
