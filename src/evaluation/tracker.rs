//! Per-pipeline accumulation of cross-validated predictions

use super::scorer::Scorecard;
use crate::error::{DecoderError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything accumulated for one pipeline during a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineState {
    /// Predicted labels in fold-traversal order
    pub predictions: Vec<usize>,
    /// One probability row per prediction
    pub probabilities: Vec<Vec<f64>>,
    /// Accuracy of every fold the pipeline completed
    pub fold_scores: Vec<f64>,
    pub scorecard: Option<Scorecard>,
}

impl PipelineState {
    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Pipeline states plus the shared expected answers
///
/// Removing a pipeline drops its whole state at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionTracker {
    states: BTreeMap<String, PipelineState>,
    expected_answers: Vec<usize>,
}

impl PredictionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name` unless it is already tracked.
    pub fn register(&mut self, name: &str) {
        self.states.entry(name.to_string()).or_default();
    }

    pub fn remove(&mut self, name: &str) -> Option<PipelineState> {
        self.states.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&PipelineState> {
        self.states.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PipelineState)> {
        self.states.iter()
    }

    pub fn expected_answers(&self) -> &[usize] {
        &self.expected_answers
    }

    /// Append one fold's output for `name`.
    pub fn record(
        &mut self,
        name: &str,
        predictions: &Array1<usize>,
        probabilities: &Array2<f64>,
        fold_score: f64,
    ) -> Result<()> {
        if predictions.len() != probabilities.nrows() {
            return Err(DecoderError::ShapeError {
                expected: format!("{} probability rows", predictions.len()),
                actual: format!("{} probability rows", probabilities.nrows()),
            });
        }
        let state = self
            .states
            .get_mut(name)
            .ok_or_else(|| DecoderError::PipelineNotFound(name.to_string()))?;
        state.predictions.extend(predictions.iter().copied());
        state.probabilities.extend(probabilities.rows().into_iter().map(|r| r.to_vec()));
        state.fold_scores.push(fold_score);
        Ok(())
    }

    /// Append one fold's true labels, after every pipeline recorded the fold.
    pub fn extend_expected(&mut self, y_test: &Array1<usize>) {
        self.expected_answers.extend(y_test.iter().copied());
    }

    pub fn set_scorecard(&mut self, name: &str, scorecard: Scorecard) -> Result<()> {
        let state = self
            .states
            .get_mut(name)
            .ok_or_else(|| DecoderError::PipelineNotFound(name.to_string()))?;
        state.scorecard = Some(scorecard);
        Ok(())
    }

    /// Forget every prediction, score and expected answer, keeping the
    /// tracked names.
    pub fn clear(&mut self) {
        self.expected_answers.clear();
        for state in self.states.values_mut() {
            state.clear();
        }
    }

    /// Every tracked pipeline holds one prediction per expected answer.
    pub fn check_lengths(&self) -> Result<()> {
        let expected = self.expected_answers.len();
        for (name, state) in &self.states {
            if state.predictions.len() != expected || state.probabilities.len() != expected {
                return Err(DecoderError::AggregationError(format!(
                    "{} holds {} predictions for {} expected answers",
                    name,
                    state.predictions.len(),
                    expected
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_record_and_remove() {
        let mut tracker = PredictionTracker::new();
        tracker.register("a");
        tracker.register("b");
        tracker
            .record("a", &array![0, 1], &array![[0.9, 0.1], [0.2, 0.8]], 1.0)
            .unwrap();
        tracker.extend_expected(&array![0, 1]);

        assert!(tracker.check_lengths().is_err());
        tracker.remove("b");
        tracker.check_lengths().unwrap();
        assert!(!tracker.contains("b"));
        assert_eq!(tracker.get("a").unwrap().probabilities[1], vec![0.2, 0.8]);
    }

    #[test]
    fn test_register_keeps_existing_state() {
        let mut tracker = PredictionTracker::new();
        tracker.register("a");
        tracker.record("a", &array![1], &array![[0.4, 0.6]], 1.0).unwrap();
        tracker.register("a");
        assert_eq!(tracker.get("a").unwrap().predictions, vec![1]);
    }

    #[test]
    fn test_clear_keeps_names() {
        let mut tracker = PredictionTracker::new();
        tracker.register("a");
        tracker.record("a", &array![1], &array![[0.4, 0.6]], 1.0).unwrap();
        tracker.extend_expected(&array![1]);
        tracker.clear();
        assert_eq!(tracker.names(), vec!["a"]);
        assert!(tracker.expected_answers().is_empty());
        assert!(tracker.get("a").unwrap().fold_scores.is_empty());
    }

    #[test]
    fn test_record_unknown_pipeline() {
        let mut tracker = PredictionTracker::new();
        let err = tracker.record("x", &array![1], &array![[0.0, 1.0]], 1.0).unwrap_err();
        assert!(matches!(err, DecoderError::PipelineNotFound(_)));
    }
}
