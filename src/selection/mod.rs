//! Channel selection
//!
//! Wraps [`ElectrodeSelection`] in an optional search over the staircase
//! candidate sizes. Every candidate is scored by the mean held-out accuracy of
//! the estimator's internal tangent-space pipeline over a seeded, shuffled
//! 4-fold split.

pub mod electrode;
pub mod staircase;

pub use electrode::ElectrodeSelection;
pub use staircase::staircase;

use crate::error::{DecoderError, Result};
use crate::evaluation::cross_validation::{CVStrategy, CrossValidator, DEFAULT_RANDOM_STATE};
use crate::pipeline::features::covariances;
use ndarray::{Array1, Array3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Folds used to score each candidate size
pub const SELECTION_FOLDS: usize = 4;

/// How the number of kept channels is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Search the staircase candidates
    Auto,
    /// Keep exactly this many channels
    Manual(usize),
}

impl Default for SelectionMode {
    fn default() -> Self {
        SelectionMode::Auto
    }
}

/// Result of a channel selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionOutcome {
    pub n_channels: usize,
    /// Kept channel indices, ascending
    pub channels: Vec<usize>,
    pub channel_names: Vec<String>,
    /// `(candidate size, mean score)` for every candidate that could be scored
    pub candidate_scores: Vec<(usize, f64)>,
}

/// Picks a channel subset from epochs
#[derive(Debug, Clone)]
pub struct FeatureSelector {
    mode: SelectionMode,
    random_state: u64,
}

impl FeatureSelector {
    pub fn new(mode: SelectionMode) -> Self {
        Self {
            mode,
            random_state: DEFAULT_RANDOM_STATE,
        }
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Select channels of `x` `(epochs, channels, times)`.
    ///
    /// Any failure is reported as [`DecoderError::OptimizationError`].
    pub fn select(
        &self,
        x: &Array3<f64>,
        y: &Array1<usize>,
        channel_names: &[String],
    ) -> Result<SelectionOutcome> {
        let n_channels = x.shape()[1];
        if channel_names.len() != n_channels {
            return Err(DecoderError::OptimizationError(format!(
                "{} channel names for {} channels",
                channel_names.len(),
                n_channels
            )));
        }
        let covs = covariances(x);

        let (best, candidate_scores) = match self.mode {
            SelectionMode::Manual(k) => (k, Vec::new()),
            SelectionMode::Auto => self.search(&covs, y)?,
        };

        let mut selection = ElectrodeSelection::new(best);
        selection
            .fit(&covs, y)
            .map_err(|e| DecoderError::OptimizationError(format!("electrode selection: {}", e)))?;
        let channels = selection
            .subset()
            .map(|s| s.to_vec())
            .ok_or_else(|| DecoderError::OptimizationError("no subset selected".to_string()))?;

        info!(n_channels = best, channels = ?channels, "Selected channels");
        Ok(SelectionOutcome {
            n_channels: best,
            channel_names: channels.iter().map(|&c| channel_names[c].clone()).collect(),
            channels,
            candidate_scores,
        })
    }

    /// Best staircase candidate; ties go to the smaller size.
    fn search(&self, covs: &Array3<f64>, y: &Array1<usize>) -> Result<(usize, Vec<(usize, f64)>)> {
        let candidates = staircase(covs.shape()[1]);
        let splits = CrossValidator::new(CVStrategy::KFold {
            n_splits: SELECTION_FOLDS,
            shuffle: true,
        })
        .with_random_state(self.random_state)
        .split(y.len(), None)
        .map_err(|e| DecoderError::OptimizationError(e.to_string()))?;

        let scored: Vec<(usize, Option<f64>)> = candidates
            .par_iter()
            .map(|&k| {
                let mut total = 0.0;
                for split in &splits {
                    let train = covs.select(Axis(0), &split.train_indices);
                    let test = covs.select(Axis(0), &split.test_indices);
                    let y_train = y.select(Axis(0), &split.train_indices);
                    let y_test = y.select(Axis(0), &split.test_indices);

                    let mut selection = ElectrodeSelection::new(k);
                    let score = selection
                        .fit(&train, &y_train)
                        .and_then(|_| selection.score(&test, &y_test));
                    match score {
                        Ok(s) => total += s,
                        Err(e) => {
                            debug!(candidate = k, error = %e, "Candidate failed");
                            return (k, None);
                        }
                    }
                }
                (k, Some(total / splits.len() as f64))
            })
            .collect();

        let candidate_scores: Vec<(usize, f64)> = scored
            .into_iter()
            .filter_map(|(k, s)| s.map(|s| (k, s)))
            .collect();

        let mut best: Option<(usize, f64)> = None;
        for &(k, s) in &candidate_scores {
            if best.map_or(true, |(_, b)| s > b) {
                best = Some((k, s));
            }
        }
        let (k, score) = best.ok_or_else(|| {
            DecoderError::OptimizationError("no candidate channel count could be scored".to_string())
        })?;
        debug!(best = k, score, "Channel count search finished");
        Ok((k, candidate_scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Channel 2 carries a class-dependent amplitude.
    fn epochs() -> (Array3<f64>, Array1<usize>, Vec<String>) {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let n = 32;
        let y = Array1::from_shape_fn(n, |i| i % 2);
        let x = Array3::from_shape_fn((n, 5, 48), |(e, c, _)| {
            let noise: f64 = rng.gen_range(-1.0..1.0);
            if c == 2 && y[e] == 1 {
                noise * 8.0
            } else {
                noise
            }
        });
        let names = (0..5).map(|c| format!("E{}", c)).collect();
        (x, y, names)
    }

    #[test]
    fn test_manual_mode_keeps_requested_count() {
        let (x, y, names) = epochs();
        let outcome = FeatureSelector::new(SelectionMode::Manual(2)).select(&x, &y, &names).unwrap();
        assert_eq!(outcome.n_channels, 2);
        assert_eq!(outcome.channels.len(), 2);
        assert!(outcome.channels.contains(&2));
        assert!(outcome.channel_names.contains(&"E2".to_string()));
        assert!(outcome.candidate_scores.is_empty());
    }

    #[test]
    fn test_auto_mode_scores_every_candidate() {
        let (x, y, names) = epochs();
        let outcome = FeatureSelector::new(SelectionMode::Auto).select(&x, &y, &names).unwrap();
        let sizes: Vec<usize> = outcome.candidate_scores.iter().map(|(k, _)| *k).collect();
        assert_eq!(sizes, vec![1, 2, 3, 4, 5]);
        let best = outcome
            .candidate_scores
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::NEG_INFINITY, f64::max);
        let first_best = outcome.candidate_scores.iter().find(|(_, s)| *s == best).unwrap().0;
        assert_eq!(outcome.n_channels, first_best);
    }

    #[test]
    fn test_invalid_manual_count_is_optimization_error() {
        let (x, y, names) = epochs();
        let err = FeatureSelector::new(SelectionMode::Manual(9)).select(&x, &y, &names).unwrap_err();
        assert!(matches!(err, DecoderError::OptimizationError(_)));
    }
}
