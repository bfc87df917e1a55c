//! Hyperparameter tuning of catalog entries
//!
//! Entries are searched one after another in catalog order; the candidates of
//! a single search run in parallel. Replacements are committed only after every
//! searched entry succeeded, so a failed tuning pass leaves the catalog as it
//! was.

pub mod search;

pub use search::{grid_candidates, random_candidates, ParameterSearch, SearchResult, SearchTrial};

use crate::error::{DecoderError, Result};
use crate::evaluation::cross_validation::{CVStrategy, CrossValidator, DEFAULT_RANDOM_STATE};
use crate::pipeline::catalog::{PipelineCatalog, TuningMode, TuningSpec};
use crate::pipeline::params::{format_params, Params};
use crate::pipeline::Classifier;
use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Summary of one tuned entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunedPipeline {
    pub name: String,
    pub mode: TuningMode,
    pub best_params: Params,
    pub best_score: f64,
    pub n_candidates: usize,
}

/// Runs the search declared by every GRID or RANDOM catalog entry
#[derive(Debug, Clone)]
pub struct HyperparameterTuner {
    strategy: CVStrategy,
    random_state: u64,
}

impl HyperparameterTuner {
    pub fn new(strategy: CVStrategy) -> Self {
        Self {
            strategy,
            random_state: DEFAULT_RANDOM_STATE,
        }
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Tune `catalog` in place. `NONE` entries are left untouched.
    ///
    /// Any failure is reported as [`DecoderError::OptimizationError`] and no
    /// entry is replaced.
    pub fn tune(
        &self,
        catalog: &mut PipelineCatalog,
        x: &Array3<f64>,
        y: &Array1<usize>,
        groups: Option<&Array1<usize>>,
    ) -> Result<Vec<TunedPipeline>> {
        let n_channels = x.shape()[1];
        let validator = CrossValidator::new(self.strategy).with_random_state(self.random_state);

        let mut replacements: Vec<(String, Box<dyn Classifier>)> = Vec::new();
        let mut tuned = Vec::new();
        for entry in catalog.iter() {
            let search = match &entry.tuning {
                TuningSpec::None => continue,
                TuningSpec::Grid { grid } => ParameterSearch::grid(grid, n_channels, validator.clone()),
                TuningSpec::Random { params, n_iter } => ParameterSearch::randomized(
                    params,
                    *n_iter,
                    n_channels,
                    self.random_state,
                    validator.clone(),
                ),
            };

            let wrap = |e: DecoderError| {
                DecoderError::OptimizationError(format!("tuning {}: {}", entry.name, e))
            };
            let result = search.run(entry.estimator.as_ref(), x, y, groups).map_err(wrap)?;
            let best = ParameterSearch::refit_best(entry.estimator.as_ref(), &result, x, y).map_err(wrap)?;

            info!(
                pipeline = %entry.name,
                params = %format_params(result.best_params()),
                score = result.best_score(),
                candidates = search.candidates().len(),
                "Tuned pipeline"
            );
            tuned.push(TunedPipeline {
                name: entry.name.clone(),
                mode: entry.tuning.mode(),
                best_params: result.best_params().clone(),
                best_score: result.best_score(),
                n_candidates: search.candidates().len(),
            });
            replacements.push((entry.name.clone(), best));
        }

        for (name, estimator) in replacements {
            catalog.replace_estimator(&name, estimator)?;
        }
        Ok(tuned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::catalog::GridAxis;
    use crate::pipeline::{BuiltinPipeline, ParamValue};
    use std::collections::BTreeMap;

    fn epochs() -> (Array3<f64>, Array1<usize>, Array1<usize>) {
        let n = 24;
        let y = Array1::from_shape_fn(n, |i| i % 2);
        let x = Array3::from_shape_fn((n, 3, 20), |(e, c, t)| {
            let amp = if y[e] == 1 && c == 0 { 3.0 } else { 1.0 };
            amp * ((t * (c + 1)) as f64 * 0.7 + e as f64).sin()
        });
        let groups = Array1::from_shape_fn(n, |i| i / 8);
        (x, y, groups)
    }

    #[test]
    fn test_grid_entry_is_replaced() {
        let (x, y, groups) = epochs();
        let mut catalog = PipelineCatalog::new();
        let grid = BTreeMap::from([(
            "factor".to_string(),
            GridAxis::Values(vec![ParamValue::Int(1), ParamValue::Int(4)]),
        )]);
        catalog.add_or_modify("erp", Box::new(BuiltinPipeline::from_name("ERPLR").unwrap()), TuningSpec::grid(grid));
        catalog.add_or_modify("mdm", Box::new(BuiltinPipeline::from_name("MDM").unwrap()), TuningSpec::None);

        let tuner = HyperparameterTuner::new(CVStrategy::GroupKFold { n_splits: 3 });
        let tuned = tuner.tune(&mut catalog, &x, &y, Some(&groups)).unwrap();
        assert_eq!(tuned.len(), 1);
        assert_eq!(tuned[0].name, "erp");
        assert_eq!(tuned[0].n_candidates, 2);
        let factor = catalog.get("erp").unwrap().estimator.params()["factor"].clone();
        assert_eq!(factor, tuned[0].best_params["factor"]);
    }

    #[test]
    fn test_failed_tuning_leaves_catalog_unchanged() {
        let (x, y, groups) = epochs();
        let mut catalog = PipelineCatalog::new();
        let good = BTreeMap::from([("factor".to_string(), GridAxis::Values(vec![ParamValue::Int(5)]))]);
        catalog.add_or_modify("a", Box::new(BuiltinPipeline::from_name("ERPLR").unwrap()), TuningSpec::grid(good));
        catalog.add_or_modify(
            "b",
            Box::new(BuiltinPipeline::from_name("MDM").unwrap()),
            TuningSpec::random(vec!["missing".to_string()], Some(2)),
        );

        let tuner = HyperparameterTuner::new(CVStrategy::GroupKFold { n_splits: 3 });
        let err = tuner.tune(&mut catalog, &x, &y, Some(&groups)).unwrap_err();
        assert!(matches!(err, DecoderError::OptimizationError(_)));
        assert_eq!(catalog.get("a").unwrap().estimator.params()["factor"], ParamValue::Int(2));
    }
}
