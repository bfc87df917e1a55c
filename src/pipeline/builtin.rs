//! Built-in pipelines

use super::catalog::{GridAxis, TuningSpec};
use super::features::{
    class_log_means, covariances, downsample_flatten, log_matrices, log_variance, tangent_vectors,
    CommonSpatialPatterns,
};
use super::linear::LogisticRegression;
use super::naive_bayes::GaussianNaiveBayes;
use super::params::{ParamValue, Params};
use super::{check_fit_input, float_param, int_param, n_classes, unknown_param, Classifier};
use crate::error::{DecoderError, Result};
use crate::selection::electrode::ElectrodeSelection;
use crate::utils::linalg::frobenius_distance;
use ndarray::{Array1, Array2, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Names accepted by [`BuiltinPipeline::from_name`], in catalog order.
pub const BUILTIN_NAMES: [&str; 5] = ["CSP", "ERPLR", "LogVarNB", "MDM", "TSLR"];

/// CSP filters, log power, logistic regression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CspLr {
    pub n_components: usize,
    csp: CommonSpatialPatterns,
    lr: LogisticRegression,
}

impl CspLr {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            csp: CommonSpatialPatterns::new(n_components),
            lr: LogisticRegression::new(),
        }
    }

    fn fit(&mut self, x: &Array3<f64>, y: &Array1<usize>) -> Result<()> {
        let covs = covariances(x);
        self.csp = CommonSpatialPatterns::new(self.n_components);
        self.csp.fit(&covs, y)?;
        let features = self.csp.transform(&covs)?;
        self.lr = self.lr.unfitted();
        self.lr.fit(&features, y, n_classes(y))?;
        Ok(())
    }

    fn predict_proba(&self, x: &Array3<f64>) -> Result<Array2<f64>> {
        let features = self.csp.transform(&covariances(x))?;
        self.lr.predict_proba(&features)
    }
}

/// Temporal down-sampling, vectorization, logistic regression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErpLr {
    pub factor: usize,
    lr: LogisticRegression,
}

impl ErpLr {
    pub fn new(factor: usize) -> Self {
        Self {
            factor,
            lr: LogisticRegression::new(),
        }
    }

    fn fit(&mut self, x: &Array3<f64>, y: &Array1<usize>) -> Result<()> {
        let features = downsample_flatten(x, self.factor)?;
        self.lr = self.lr.unfitted();
        self.lr.fit(&features, y, n_classes(y))?;
        Ok(())
    }

    fn predict_proba(&self, x: &Array3<f64>) -> Result<Array2<f64>> {
        self.lr.predict_proba(&downsample_flatten(x, self.factor)?)
    }
}

/// Per-channel log-variance, Gaussian naive Bayes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogVarNb {
    nb: GaussianNaiveBayes,
}

impl LogVarNb {
    fn fit(&mut self, x: &Array3<f64>, y: &Array1<usize>) -> Result<()> {
        self.nb = self.nb.unfitted();
        self.nb.fit(&log_variance(x), y, n_classes(y))
    }

    fn predict_proba(&self, x: &Array3<f64>) -> Result<Array2<f64>> {
        self.nb.predict_proba(&log_variance(x))
    }
}

/// Minimum distance to the log-Euclidean class-mean covariance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Mdm {
    /// Matrix log of every class mean, `None` for classes absent from training
    log_means: Vec<Option<Array2<f64>>>,
}

impl Mdm {
    fn fit(&mut self, x: &Array3<f64>, y: &Array1<usize>) -> Result<()> {
        let logs = log_matrices(&covariances(x))?;
        self.log_means = class_log_means(&logs, y, n_classes(y));
        Ok(())
    }

    /// Softmax of the negative squared distances.
    fn predict_proba(&self, x: &Array3<f64>) -> Result<Array2<f64>> {
        if self.log_means.is_empty() {
            return Err(DecoderError::ModelNotFitted);
        }
        let logs = log_matrices(&covariances(x))?;
        let mut proba = Array2::zeros((logs.shape()[0], self.log_means.len()));
        for (i, log) in logs.outer_iter().enumerate() {
            let neg_sq: Vec<Option<f64>> = self
                .log_means
                .iter()
                .map(|m| m.as_ref().map(|m| -frobenius_distance(&log, &m.view()).powi(2)))
                .collect();
            let max = neg_sq.iter().flatten().cloned().fold(f64::NEG_INFINITY, f64::max);
            let sum: f64 = neg_sq.iter().flatten().map(|v| (v - max).exp()).sum();
            for (k, v) in neg_sq.iter().enumerate() {
                if let Some(v) = v {
                    proba[[i, k]] = (v - max).exp() / sum;
                }
            }
        }
        Ok(proba)
    }
}

/// Covariances, optional electrode selection, tangent space, logistic regression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TsLr {
    /// Number of electrodes kept, all when `None`
    pub nelec: Option<usize>,
    selection: Option<ElectrodeSelection>,
    lr: LogisticRegression,
}

impl TsLr {
    pub fn new(nelec: Option<usize>) -> Self {
        Self {
            nelec,
            selection: None,
            lr: LogisticRegression::new(),
        }
    }

    fn reduce(&self, covs: Array3<f64>) -> Result<Array3<f64>> {
        match &self.selection {
            Some(selection) => selection.transform(&covs),
            None => Ok(covs),
        }
    }

    fn fit(&mut self, x: &Array3<f64>, y: &Array1<usize>) -> Result<()> {
        let covs = covariances(x);
        self.selection = match self.nelec {
            Some(k) if k < covs.shape()[1] => {
                let mut selection = ElectrodeSelection::new(k);
                selection.fit(&covs, y)?;
                Some(selection)
            }
            _ => None,
        };
        let features = tangent_vectors(&self.reduce(covs)?)?;
        self.lr = self.lr.unfitted();
        self.lr.fit(&features, y, n_classes(y))?;
        Ok(())
    }

    fn predict_proba(&self, x: &Array3<f64>) -> Result<Array2<f64>> {
        let covs = self.reduce(covariances(x))?;
        self.lr.predict_proba(&tangent_vectors(&covs)?)
    }
}

/// Tagged set of the pipelines shipped with the crate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum BuiltinPipeline {
    Csp(CspLr),
    ErpLr(ErpLr),
    LogVarNb(LogVarNb),
    Mdm(Mdm),
    TsLr(TsLr),
}

impl BuiltinPipeline {
    /// Pipeline with default hyperparameters, by catalog name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "CSP" => Some(BuiltinPipeline::Csp(CspLr::new(2))),
            "ERPLR" => Some(BuiltinPipeline::ErpLr(ErpLr::new(2))),
            "LogVarNB" => Some(BuiltinPipeline::LogVarNb(LogVarNb::default())),
            "MDM" => Some(BuiltinPipeline::Mdm(Mdm::default())),
            "TSLR" => Some(BuiltinPipeline::TsLr(TsLr::new(None))),
            _ => None,
        }
    }

    /// Catalog name of this pipeline kind
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinPipeline::Csp(_) => "CSP",
            BuiltinPipeline::ErpLr(_) => "ERPLR",
            BuiltinPipeline::LogVarNb(_) => "LogVarNB",
            BuiltinPipeline::Mdm(_) => "MDM",
            BuiltinPipeline::TsLr(_) => "TSLR",
        }
    }

    /// Search descriptor registered alongside the pipeline.
    pub fn default_tuning(&self) -> TuningSpec {
        match self {
            BuiltinPipeline::Csp(_) => TuningSpec::random(vec!["n_components".to_string()], None),
            BuiltinPipeline::ErpLr(_) => {
                let values = [1, 2, 5, 10].iter().map(|&f| ParamValue::Int(f)).collect();
                TuningSpec::grid(BTreeMap::from([("factor".to_string(), GridAxis::Values(values))]))
            }
            BuiltinPipeline::LogVarNb(_) | BuiltinPipeline::Mdm(_) => TuningSpec::None,
            BuiltinPipeline::TsLr(_) => {
                TuningSpec::grid(BTreeMap::from([("nelec".to_string(), GridAxis::Staircase)]))
            }
        }
    }

    fn unfitted(&self) -> Self {
        match self {
            BuiltinPipeline::Csp(p) => {
                let mut fresh = CspLr::new(p.n_components);
                fresh.lr = p.lr.unfitted();
                BuiltinPipeline::Csp(fresh)
            }
            BuiltinPipeline::ErpLr(p) => {
                let mut fresh = ErpLr::new(p.factor);
                fresh.lr = p.lr.unfitted();
                BuiltinPipeline::ErpLr(fresh)
            }
            BuiltinPipeline::LogVarNb(p) => BuiltinPipeline::LogVarNb(LogVarNb { nb: p.nb.unfitted() }),
            BuiltinPipeline::Mdm(_) => BuiltinPipeline::Mdm(Mdm::default()),
            BuiltinPipeline::TsLr(p) => {
                let mut fresh = TsLr::new(p.nelec);
                fresh.lr = p.lr.unfitted();
                BuiltinPipeline::TsLr(fresh)
            }
        }
    }

    fn regression_mut(&mut self) -> Option<&mut LogisticRegression> {
        match self {
            BuiltinPipeline::Csp(p) => Some(&mut p.lr),
            BuiltinPipeline::ErpLr(p) => Some(&mut p.lr),
            BuiltinPipeline::TsLr(p) => Some(&mut p.lr),
            BuiltinPipeline::LogVarNb(_) | BuiltinPipeline::Mdm(_) => None,
        }
    }
}

impl Classifier for BuiltinPipeline {
    fn fit(&mut self, x: &Array3<f64>, y: &Array1<usize>) -> Result<()> {
        check_fit_input(x, y)?;
        match self {
            BuiltinPipeline::Csp(p) => p.fit(x, y),
            BuiltinPipeline::ErpLr(p) => p.fit(x, y),
            BuiltinPipeline::LogVarNb(p) => p.fit(x, y),
            BuiltinPipeline::Mdm(p) => p.fit(x, y),
            BuiltinPipeline::TsLr(p) => p.fit(x, y),
        }
    }

    fn predict_proba(&self, x: &Array3<f64>) -> Result<Array2<f64>> {
        if x.len_of(Axis(0)) == 0 {
            return Err(DecoderError::ValidationError("no epochs to predict".to_string()));
        }
        match self {
            BuiltinPipeline::Csp(p) => p.predict_proba(x),
            BuiltinPipeline::ErpLr(p) => p.predict_proba(x),
            BuiltinPipeline::LogVarNb(p) => p.predict_proba(x),
            BuiltinPipeline::Mdm(p) => p.predict_proba(x),
            BuiltinPipeline::TsLr(p) => p.predict_proba(x),
        }
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        if name == "alpha" {
            let alpha = float_param(name, value)?;
            let kind = self.name();
            return match self.regression_mut() {
                Some(lr) => {
                    lr.alpha = alpha;
                    Ok(())
                }
                None => Err(unknown_param(kind, name, value)),
            };
        }
        match (self, name) {
            (BuiltinPipeline::Csp(p), "n_components") => {
                p.n_components = int_param(name, value, 1)?;
                p.csp = CommonSpatialPatterns::new(p.n_components);
            }
            (BuiltinPipeline::ErpLr(p), "factor") => p.factor = int_param(name, value, 1)?,
            (BuiltinPipeline::LogVarNb(p), "var_smoothing") => {
                p.nb = GaussianNaiveBayes::new().with_var_smoothing(float_param(name, value)?);
            }
            (BuiltinPipeline::TsLr(p), "nelec") => {
                p.nelec = Some(int_param(name, value, 1)?);
                p.selection = None;
            }
            (pipeline, _) => return Err(unknown_param(pipeline.name(), name, value)),
        }
        Ok(())
    }

    fn params(&self) -> Params {
        let mut params = Params::new();
        match self {
            BuiltinPipeline::Csp(p) => {
                params.insert("n_components".into(), p.n_components.into());
                params.insert("alpha".into(), p.lr.alpha.into());
            }
            BuiltinPipeline::ErpLr(p) => {
                params.insert("factor".into(), p.factor.into());
                params.insert("alpha".into(), p.lr.alpha.into());
            }
            BuiltinPipeline::LogVarNb(p) => {
                params.insert("var_smoothing".into(), p.nb.var_smoothing().into());
            }
            BuiltinPipeline::Mdm(_) => {}
            BuiltinPipeline::TsLr(p) => {
                if let Some(nelec) = p.nelec {
                    params.insert("nelec".into(), nelec.into());
                }
                params.insert("alpha".into(), p.lr.alpha.into());
            }
        }
        params
    }

    fn clone_box(&self) -> Box<dyn Classifier> {
        Box::new(self.unfitted())
    }
}
