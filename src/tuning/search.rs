//! Exhaustive and randomized parameter search

use crate::error::{DecoderError, Result};
use crate::evaluation::cross_validation::{CVResults, CrossValidator};
use crate::pipeline::catalog::GridAxis;
use crate::pipeline::params::{format_params, ParamValue, Params};
use crate::pipeline::{set_params, Classifier};
use crate::selection::staircase;
use ndarray::{Array1, Array3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

/// Outcome of one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTrial {
    pub trial_id: usize,
    pub params: Params,
    /// Fold scores, `None` when the candidate failed
    pub cv: Option<CVResults>,
    pub error: Option<String>,
    pub duration_secs: f64,
}

impl SearchTrial {
    pub fn mean_score(&self) -> Option<f64> {
        self.cv.as_ref().map(|cv| cv.mean_score)
    }
}

/// All trials of a search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub trials: Vec<SearchTrial>,
    /// Highest mean score, earliest trial on ties
    pub best_trial_idx: usize,
}

impl SearchResult {
    pub fn best_trial(&self) -> &SearchTrial {
        &self.trials[self.best_trial_idx]
    }

    pub fn best_params(&self) -> &Params {
        &self.best_trial().params
    }

    pub fn best_score(&self) -> f64 {
        self.best_trial().mean_score().unwrap_or(0.0)
    }
}

/// Cartesian product of the grid axes. Keys vary in name order, the last
/// name fastest. `Staircase` axes expand to the candidates for `n_channels`.
pub fn grid_candidates(grid: &BTreeMap<String, GridAxis>, n_channels: usize) -> Vec<Params> {
    let mut candidates = vec![Params::new()];
    for (name, axis) in grid {
        let values: Vec<ParamValue> = match axis {
            GridAxis::Values(values) => values.clone(),
            GridAxis::Staircase => staircase(n_channels).into_iter().map(ParamValue::from).collect(),
        };
        candidates = candidates
            .into_iter()
            .flat_map(|base| {
                values.iter().map(move |v| {
                    let mut params = base.clone();
                    params.insert(name.clone(), v.clone());
                    params
                })
            })
            .collect();
    }
    candidates
}

/// `n_iter` draws where every named parameter is uniform over
/// `[1, max(1, n_channels / 2)]`.
pub fn random_candidates(names: &[String], n_iter: usize, n_channels: usize, seed: u64) -> Vec<Params> {
    let high = (n_channels / 2).max(1) as i64;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n_iter)
        .map(|_| {
            names
                .iter()
                .map(|name| (name.clone(), ParamValue::Int(rng.gen_range(1..=high))))
                .collect()
        })
        .collect()
}

/// Cross-validated evaluation of a fixed candidate list
#[derive(Debug, Clone)]
pub struct ParameterSearch {
    candidates: Vec<Params>,
    validator: CrossValidator,
}

impl ParameterSearch {
    pub fn new(candidates: Vec<Params>, validator: CrossValidator) -> Self {
        Self { candidates, validator }
    }

    /// Exhaustive search over `grid`.
    pub fn grid(grid: &BTreeMap<String, GridAxis>, n_channels: usize, validator: CrossValidator) -> Self {
        Self::new(grid_candidates(grid, n_channels), validator)
    }

    /// Randomized search over `names`.
    pub fn randomized(
        names: &[String],
        n_iter: usize,
        n_channels: usize,
        seed: u64,
        validator: CrossValidator,
    ) -> Self {
        Self::new(random_candidates(names, n_iter, n_channels, seed), validator)
    }

    pub fn candidates(&self) -> &[Params] {
        &self.candidates
    }

    /// Score every candidate in parallel. Failing candidates are kept in the
    /// result without a score; the search fails only when none succeeds.
    pub fn run(
        &self,
        estimator: &dyn Classifier,
        x: &Array3<f64>,
        y: &Array1<usize>,
        groups: Option<&Array1<usize>>,
    ) -> Result<SearchResult> {
        if self.candidates.is_empty() {
            return Err(DecoderError::OptimizationError("empty search space".to_string()));
        }
        let splits = self.validator.split(y.len(), groups)?;
        let folds: Vec<_> = splits
            .iter()
            .map(|s| {
                (
                    x.select(Axis(0), &s.train_indices),
                    y.select(Axis(0), &s.train_indices),
                    x.select(Axis(0), &s.test_indices),
                    y.select(Axis(0), &s.test_indices),
                )
            })
            .collect();

        let trials: Vec<SearchTrial> = self
            .candidates
            .par_iter()
            .enumerate()
            .map(|(trial_id, params)| {
                let start = Instant::now();
                let outcome = (|| -> Result<Vec<f64>> {
                    let mut scores = Vec::with_capacity(folds.len());
                    for (x_train, y_train, x_test, y_test) in &folds {
                        let mut candidate = estimator.clone_box();
                        set_params(candidate.as_mut(), params)?;
                        candidate.fit(x_train, y_train)?;
                        scores.push(candidate.score(x_test, y_test)?);
                    }
                    Ok(scores)
                })();
                let (cv, error) = match outcome {
                    Ok(scores) => (Some(CVResults::from_scores(scores)), None),
                    Err(e) => {
                        debug!(params = %format_params(params), error = %e, "Candidate failed");
                        (None, Some(e.to_string()))
                    }
                };
                SearchTrial {
                    trial_id,
                    params: params.clone(),
                    cv,
                    error,
                    duration_secs: start.elapsed().as_secs_f64(),
                }
            })
            .collect();

        let mut best: Option<(usize, f64)> = None;
        for trial in &trials {
            if let Some(score) = trial.mean_score() {
                if best.map_or(true, |(_, b)| score > b) {
                    best = Some((trial.trial_id, score));
                }
            }
        }
        let (best_trial_idx, _) = best.ok_or_else(|| {
            let reason = trials
                .iter()
                .find_map(|t| t.error.clone())
                .unwrap_or_default();
            DecoderError::OptimizationError(format!("every candidate failed: {}", reason))
        })?;

        Ok(SearchResult {
            trials,
            best_trial_idx,
        })
    }

    /// Unfitted copy of `estimator` carrying the best parameters, refitted on
    /// all of `x`.
    pub fn refit_best(
        estimator: &dyn Classifier,
        result: &SearchResult,
        x: &Array3<f64>,
        y: &Array1<usize>,
    ) -> Result<Box<dyn Classifier>> {
        let mut best = estimator.clone_box();
        set_params(best.as_mut(), result.best_params())?;
        best.fit(x, y)?;
        Ok(best)
    }
}
