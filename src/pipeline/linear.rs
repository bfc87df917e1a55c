//! Multinomial logistic regression on feature vectors

use crate::error::{DecoderError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Softmax logistic regression fitted by full-batch gradient descent on
/// standardized features, with L2 regularization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Fitted weights, `(n_features, n_classes)`
    pub coefficients: Option<Array2<f64>>,
    /// Fitted intercepts, one per class
    pub intercept: Option<Array1<f64>>,
    /// Regularization strength (L2)
    pub alpha: f64,
    /// Maximum iterations
    pub max_iter: usize,
    /// Convergence tolerance on the gradient norm
    pub tol: f64,
    /// Learning rate
    pub learning_rate: f64,
    feature_mean: Option<Array1<f64>>,
    feature_scale: Option<Array1<f64>>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    /// Create a new logistic regression model
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: None,
            alpha: 0.01,
            max_iter: 500,
            tol: 1e-6,
            learning_rate: 0.5,
            feature_mean: None,
            feature_scale: None,
        }
    }

    /// Set regularization strength
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set maximum iterations
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set learning rate
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn is_fitted(&self) -> bool {
        self.coefficients.is_some()
    }

    /// Unfitted copy with the same settings
    pub fn unfitted(&self) -> Self {
        Self {
            coefficients: None,
            intercept: None,
            feature_mean: None,
            feature_scale: None,
            ..self.clone()
        }
    }

    fn softmax_rows(mut z: Array2<f64>) -> Array2<f64> {
        for mut row in z.rows_mut() {
            let max_val = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            row.mapv_inplace(|v| (v - max_val).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        z
    }

    fn standardize(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = match (&self.feature_mean, &self.feature_scale) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(DecoderError::ModelNotFitted),
        };
        if x.ncols() != mean.len() {
            return Err(DecoderError::ShapeError {
                expected: format!("{} features", mean.len()),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok((x - mean) / scale)
    }

    /// Fit the model using gradient descent
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<usize>, n_classes: usize) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(DecoderError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(DecoderError::ValidationError("empty training set".to_string()));
        }
        if let Some(&bad) = y.iter().find(|&&label| label >= n_classes) {
            return Err(DecoderError::ValidationError(format!(
                "label {} outside of {} classes",
                bad, n_classes
            )));
        }

        let mean = x.mean_axis(Axis(0)).ok_or_else(|| {
            DecoderError::ValidationError("empty training set".to_string())
        })?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });
        self.feature_mean = Some(mean);
        self.feature_scale = Some(scale);
        let xs = self.standardize(x)?;

        let mut targets = Array2::<f64>::zeros((n_samples, n_classes));
        for (i, &label) in y.iter().enumerate() {
            targets[[i, label]] = 1.0;
        }

        let mut weights = Array2::<f64>::zeros((n_features, n_classes));
        let mut bias = Array1::<f64>::zeros(n_classes);
        let lr = self.learning_rate;
        let alpha = self.alpha;

        for _iter in 0..self.max_iter {
            let probs = Self::softmax_rows(xs.dot(&weights) + &bias);
            let errors = probs - &targets;

            let dw = xs.t().dot(&errors) / n_samples as f64 + alpha * &weights;
            let db = errors.sum_axis(Axis(0)) / n_samples as f64;

            let grad_norm = (dw.mapv(|v| v * v).sum() + db.mapv(|v| v * v).sum()).sqrt();
            if grad_norm < self.tol {
                break;
            }

            weights = weights - lr * dw;
            bias = bias - lr * db;
        }

        if weights.iter().any(|w| !w.is_finite()) {
            return Err(DecoderError::ValidationError(
                "logistic regression diverged".to_string(),
            ));
        }

        self.coefficients = Some(weights);
        self.intercept = Some(bias);
        Ok(self)
    }

    /// Predict class probabilities, one row per sample
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (weights, bias) = match (&self.coefficients, &self.intercept) {
            (Some(w), Some(b)) => (w, b),
            _ => return Err(DecoderError::ModelNotFitted),
        };
        let xs = self.standardize(x)?;
        Ok(Self::softmax_rows(xs.dot(weights) + bias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_logistic_regression_separable() {
        let x = array![
            [1.0, 1.0],
            [1.5, 2.0],
            [2.0, 1.5],
            [6.0, 5.0],
            [7.0, 7.5],
            [6.5, 6.0]
        ];
        let y = array![0, 0, 0, 1, 1, 1];

        let mut model = LogisticRegression::new().with_max_iter(1000);
        model.fit(&x, &y, 2).unwrap();
        let proba = model.predict_proba(&x).unwrap();

        assert_eq!(proba.dim(), (6, 2));
        for (row, &label) in proba.rows().into_iter().zip(y.iter()) {
            assert!((row.sum() - 1.0).abs() < 1e-9);
            assert!(row[label] > 0.5);
        }
    }

    #[test]
    fn test_three_classes() {
        let x = array![[0.0], [0.2], [5.0], [5.2], [10.0], [10.2]];
        let y = array![0, 0, 1, 1, 2, 2];
        let mut model = LogisticRegression::new().with_max_iter(2000).with_alpha(0.0);
        model.fit(&x, &y, 3).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        assert_eq!(proba.ncols(), 3);
        assert!(proba[[0, 0]] > proba[[0, 2]]);
        assert!(proba[[5, 2]] > proba[[5, 0]]);
    }

    #[test]
    fn test_not_fitted() {
        let model = LogisticRegression::new();
        assert!(matches!(
            model.predict_proba(&array![[1.0]]),
            Err(DecoderError::ModelNotFitted)
        ));
    }

    #[test]
    fn test_label_out_of_range() {
        let mut model = LogisticRegression::new();
        assert!(model.fit(&array![[1.0], [2.0]], &array![0, 3], 2).is_err());
    }
}
