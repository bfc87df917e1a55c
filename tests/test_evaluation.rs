//! Integration tests for cross-validated runs
//!
//! Runs the decoder end to end on synthetic two-class data where class 1
//! carries more power on the first channels.

use epoch_decoder::evaluation::report::{PredictionArtifact, PREDICTIONS_FILE, RUN_LOG_FILE};
use epoch_decoder::prelude::*;
use ndarray::{Array1, Array2, Array3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tempfile::tempdir;

// ============================================================================
// Helpers
// ============================================================================

fn synthetic_dataset(n_subjects: usize, per_class: usize, n_channels: usize) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let n_times = 32;
    let subjects = (0..n_subjects)
        .map(|s| {
            let n = 2 * per_class;
            let labels: Array1<usize> = (0..n).map(|i| i / per_class).collect();
            let epochs = Array3::from_shape_fn((n, n_channels, n_times), |(e, c, t)| {
                let gain = if labels[e] == 1 && c < 2 { 3.0 } else { 1.0 };
                gain * ((t as f64) * (0.3 + 0.1 * c as f64)).sin() + rng.gen_range(-0.5..0.5)
            });
            SubjectData::new(format!("s{:02}", s), epochs, labels).unwrap()
        })
        .collect();
    let channels = (0..n_channels).map(|c| format!("E{}", c + 1)).collect();
    Dataset::new(subjects, channels, vec!["rest".into(), "move".into()], 128.0).unwrap()
}

/// Pipeline that can never be fitted
#[derive(Debug, Clone, Default)]
struct Unfittable;

impl Classifier for Unfittable {
    fn fit(&mut self, _x: &Array3<f64>, _y: &Array1<usize>) -> Result<()> {
        Err(DecoderError::ValidationError("matrix is singular".to_string()))
    }

    fn predict_proba(&self, _x: &Array3<f64>) -> Result<Array2<f64>> {
        Err(DecoderError::ModelNotFitted)
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        Err(DecoderError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: "no hyperparameters".to_string(),
        })
    }

    fn params(&self) -> Params {
        Params::new()
    }

    fn clone_box(&self) -> Box<dyn Classifier> {
        Box::new(self.clone())
    }
}

/// Always answers the first class with certainty
#[derive(Debug, Clone, Default)]
struct FirstClass;

impl Classifier for FirstClass {
    fn fit(&mut self, _x: &Array3<f64>, _y: &Array1<usize>) -> Result<()> {
        Ok(())
    }

    fn predict_proba(&self, x: &Array3<f64>) -> Result<Array2<f64>> {
        let mut proba = Array2::zeros((x.shape()[0], 1));
        proba.fill(1.0);
        Ok(proba)
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        Err(DecoderError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: "no hyperparameters".to_string(),
        })
    }

    fn params(&self) -> Params {
        Params::new()
    }

    fn clone_box(&self) -> Box<dyn Classifier> {
        Box::new(self.clone())
    }
}

fn two_builtins() -> RunConfig {
    RunConfig::new()
        .with_pipelines(vec!["LogVarNB".to_string(), "MDM".to_string()])
        .with_cv(CVStrategy::GroupKFold { n_splits: 2 })
}

// ============================================================================
// Failure isolation
// ============================================================================

#[test]
fn test_failing_pipeline_is_removed_and_run_completes() {
    let out = tempdir().unwrap();
    let mut decoder = Decoder::new(two_builtins().with_output_dir(out.path())).unwrap();
    assert!(decoder.add_or_modify("Broken", Box::new(Unfittable), TuningSpec::None));
    assert_eq!(decoder.catalog().names(), vec!["Broken", "LogVarNB", "MDM"]);

    let report = decoder.run(synthetic_dataset(2, 10, 3)).unwrap();

    assert_eq!(decoder.stage(), RunStage::Done);
    assert_eq!(decoder.catalog().names(), vec!["LogVarNB", "MDM"]);
    assert_eq!(report.n_folds, 2);
    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.removed[0].name, "Broken");
    assert_eq!(report.removed[0].fold, Some(0));
    assert!(report.is_degraded());

    assert!(!decoder.tracker().contains("Broken"));
    assert!(!report.scorecards.contains_key("Broken"));
    let expected = decoder.tracker().expected_answers().len();
    assert_eq!(expected, 40);
    for (name, state) in decoder.tracker().iter() {
        assert_eq!(state.predictions.len(), expected, "{}", name);
        assert_eq!(state.probabilities.len(), expected, "{}", name);
        assert_eq!(state.fold_scores.len(), 2, "{}", name);
    }
    for card in report.scorecards.values() {
        let total: usize = card.confusion.iter().flatten().sum();
        assert_eq!(total, 40);
        assert!((0.0..=1.0).contains(&card.accuracy));
    }

    let log = std::fs::read_to_string(out.path().join(RUN_LOG_FILE)).unwrap();
    assert!(log.contains("removed Broken : "));
    assert!(log.contains("pipelines : [\"LogVarNB\", \"MDM\"]"));
    let artifact = PredictionArtifact::load(&out.path().join(PREDICTIONS_FILE)).unwrap();
    assert!(!artifact.predictions.contains_key("Broken"));
    assert_eq!(artifact.expected_answers.len(), 40);
}

#[test]
fn test_only_failing_pipelines_abort_the_run() {
    let config = RunConfig::new().with_cv(CVStrategy::GroupKFold { n_splits: 2 });
    let mut catalog = PipelineCatalog::new();
    catalog.add_or_modify("Broken", Box::new(Unfittable), TuningSpec::None);
    let mut decoder = Decoder::with_catalog(config, catalog);

    let err = decoder.run(synthetic_dataset(2, 6, 3)).unwrap_err();
    assert!(matches!(err, DecoderError::AggregationError(_)));
    assert!(err.is_fatal());
    assert_eq!(decoder.stage(), RunStage::Abort);
    assert!(decoder.catalog().is_empty());
}

#[test]
fn test_narrow_probabilities_are_padded() {
    let mut catalog = PipelineCatalog::new();
    catalog.add_or_modify("FirstClass", Box::new(FirstClass), TuningSpec::None);
    let mut decoder = Decoder::with_catalog(RunConfig::new().with_cv(CVStrategy::KFold { n_splits: 3, shuffle: false }), catalog);

    let report = decoder.run(synthetic_dataset(1, 6, 3)).unwrap();
    let card = &report.scorecards["FirstClass"];
    assert_eq!(card.confusion, vec![vec![6, 0], vec![6, 0]]);
    assert!((card.accuracy - 0.5).abs() < 1e-12);
    let state = decoder.tracker().get("FirstClass").unwrap();
    assert!(state.probabilities.iter().all(|row| row == &vec![1.0, 0.0]));
}

// ============================================================================
// Determinism and ordering
// ============================================================================

#[test]
fn test_runs_are_repeatable() {
    let dataset = synthetic_dataset(3, 8, 3);
    let config = two_builtins().with_cv(CVStrategy::KFold { n_splits: 4, shuffle: true });

    let mut first = Decoder::new(config.clone()).unwrap();
    let mut second = Decoder::new(config).unwrap();
    let a = first.run(dataset.clone()).unwrap();
    let b = second.run(dataset).unwrap();

    assert_eq!(first.artifact().predictions, second.artifact().predictions);
    assert_eq!(first.artifact().expected_answers, second.artifact().expected_answers);
    for (name, card) in &a.scorecards {
        assert_eq!(card.accuracy, b.scorecards[name].accuracy);
    }
}

#[test]
fn test_rerun_starts_from_clean_state() {
    let dataset = synthetic_dataset(2, 5, 3);
    let mut decoder = Decoder::new(two_builtins()).unwrap();
    decoder.run(dataset.clone()).unwrap();
    decoder.run(dataset).unwrap();

    assert_eq!(decoder.tracker().expected_answers().len(), 20);
    assert_eq!(decoder.tracker().get("MDM").unwrap().fold_scores.len(), 2);
}

// ============================================================================
// Catalog management between runs
// ============================================================================

#[test]
fn test_delete_is_all_or_nothing() {
    let mut decoder = Decoder::new(two_builtins()).unwrap();
    let err = decoder.delete(&["MDM", "Missing"]).unwrap_err();
    assert!(matches!(err, DecoderError::PipelineNotFound(_)));
    assert_eq!(decoder.catalog().len(), 2);
    assert!(decoder.tracker().contains("MDM"));

    decoder.delete(&["MDM"]).unwrap();
    assert_eq!(decoder.catalog().names(), vec!["LogVarNB"]);
    assert!(!decoder.tracker().contains("MDM"));
}

#[test]
fn test_modify_parameters_of_unknown_pipeline() {
    let mut decoder = Decoder::new(two_builtins()).unwrap();
    let err = decoder
        .modify_parameters("TSLR", TuningSpec::random(vec!["nelec".to_string()], Some(3)))
        .unwrap_err();
    assert!(matches!(err, DecoderError::PipelineNotFound(_)));
}

// ============================================================================
// Optional stages
// ============================================================================

#[test]
fn test_selection_and_tuning_before_folds() {
    let config = RunConfig::new()
        .with_pipelines(vec!["CSP".to_string(), "ERPLR".to_string()])
        .with_cv(CVStrategy::KFold { n_splits: 3, shuffle: true })
        .with_feature_selection(SelectionMode::Manual(3))
        .with_tuning(true);
    let mut decoder = Decoder::new(config).unwrap();

    let report = decoder.run(synthetic_dataset(2, 12, 5)).unwrap();

    let selection = report.selection.as_ref().unwrap();
    assert_eq!(selection.channels.len(), 3);
    assert_eq!(selection.channel_names.len(), 3);
    let tuned: Vec<&str> = report.tuned.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(tuned, vec!["CSP", "ERPLR"]);

    let csp = &report.tuned[0];
    assert_eq!(csp.mode, TuningMode::Random);
    let n_components = csp.best_params.get("n_components").cloned();
    // Three selected channels bound the draws to [1, 1].
    assert_eq!(n_components, Some(ParamValue::Int(1)));
    assert_eq!(report.tuned[1].n_candidates, 4);
}

#[test]
fn test_holdout_subjects_are_scored_after_cv() {
    let config = two_builtins().with_holdout(3);
    let mut decoder = Decoder::new(config).unwrap();

    let report = decoder.run(synthetic_dataset(3, 6, 3)).unwrap();

    // One of three subjects is held out, two remain for two folds.
    assert_eq!(decoder.tracker().expected_answers().len(), 24);
    let held: BTreeMap<&str, usize> = report
        .holdout
        .iter()
        .map(|(name, card)| (name.as_str(), card.n_samples))
        .collect();
    assert_eq!(held, BTreeMap::from([("LogVarNB", 12), ("MDM", 12)]));
}

#[test]
fn test_intra_subject_folds_per_subject() {
    let config = two_builtins().with_cv(CVStrategy::IntraSubject { n_splits: 3 });
    let mut decoder = Decoder::new(config).unwrap();

    let report = decoder.run(synthetic_dataset(2, 6, 3)).unwrap();

    assert_eq!(report.n_folds, 6);
    let expected = decoder.tracker().expected_answers().len();
    assert_eq!(expected, 24);
    for (name, state) in decoder.tracker().iter() {
        assert_eq!(state.predictions.len(), expected, "{}", name);
        assert_eq!(state.fold_scores.len(), 6, "{}", name);
    }
}

#[test]
fn test_failed_tuning_is_skipped_and_catalog_kept() {
    let config = RunConfig::new()
        .with_pipelines(vec!["ERPLR".to_string(), "LogVarNB".to_string()])
        .with_cv(CVStrategy::GroupKFold { n_splits: 2 })
        .with_tuning(true);
    let mut decoder = Decoder::new(config).unwrap();
    decoder
        .modify_parameters("LogVarNB", TuningSpec::random(vec!["bogus".to_string()], Some(2)))
        .unwrap();
    let before: BTreeMap<String, Params> = decoder
        .catalog()
        .iter()
        .map(|entry| (entry.name.clone(), entry.estimator.params()))
        .collect();

    let report = decoder.run(synthetic_dataset(2, 6, 3)).unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].stage, RunStage::HyperTune);
    assert!(report.tuned.is_empty());
    assert!(report.is_degraded());
    let after: BTreeMap<String, Params> = decoder
        .catalog()
        .iter()
        .map(|entry| (entry.name.clone(), entry.estimator.params()))
        .collect();
    assert_eq!(before, after);
    assert_eq!(after["ERPLR"].get("factor"), Some(&ParamValue::Int(2)));
    assert_eq!(report.scorecards.len(), 2);
}
