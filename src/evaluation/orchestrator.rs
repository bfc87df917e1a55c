//! Cross-validated evaluation of every catalog pipeline
//!
//! A run walks `Init → [FeatureSelect] → [HyperTune] → FoldIterate →
//! Aggregate → Done`. The two optional stages are skipped with a warning when
//! they fail. A pipeline that fails during a fold is removed from the catalog
//! and from the tracker, and the run carries on without it. A failure while
//! aggregating moves the run to `Abort` and is returned to the caller.

use super::cross_validation::CrossValidator;
use super::report::{PredictionArtifact, RunLog, PREDICTIONS_FILE};
use super::scorer::{Scorecard, Scorer};
use super::tracker::PredictionTracker;
use crate::config::RunConfig;
use crate::dataset::{Dataset, DatasetAssembler, FlatDataset};
use crate::error::{DecoderError, Result};
use crate::pipeline::catalog::{PipelineCatalog, TuningSpec};
use crate::pipeline::params::format_params;
use crate::pipeline::{accuracy, argmax_rows, Classifier};
use crate::selection::{FeatureSelector, SelectionMode, SelectionOutcome};
use crate::tuning::{HyperparameterTuner, TunedPipeline};
use ndarray::{s, Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Init,
    FeatureSelect,
    HyperTune,
    FoldIterate,
    Aggregate,
    Done,
    Abort,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Init => "init",
            RunStage::FeatureSelect => "feature selection",
            RunStage::HyperTune => "hyperparameter tuning",
            RunStage::FoldIterate => "fold iteration",
            RunStage::Aggregate => "aggregation",
            RunStage::Done => "done",
            RunStage::Abort => "abort",
        };
        f.write_str(name)
    }
}

/// A pipeline dropped during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedPipeline {
    pub name: String,
    /// Fold index, `None` outside of cross-validation
    pub fold: Option<usize>,
    pub reason: String,
}

/// An optional step that failed and was skipped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedStep {
    pub stage: RunStage,
    pub reason: String,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub scorecards: BTreeMap<String, Scorecard>,
    pub removed: Vec<RemovedPipeline>,
    pub skipped: Vec<SkippedStep>,
    pub selection: Option<SelectionOutcome>,
    pub tuned: Vec<TunedPipeline>,
    /// Scores on the held-out subjects
    pub holdout: BTreeMap<String, Scorecard>,
    pub n_folds: usize,
    pub class_names: Vec<String>,
    /// Files written to the output directory
    pub outputs: Vec<PathBuf>,
}

impl RunReport {
    /// True when a pipeline was removed or an optional step was skipped.
    pub fn is_degraded(&self) -> bool {
        !self.removed.is_empty() || !self.skipped.is_empty()
    }
}

/// Fold-by-fold evaluation engine
///
/// Catalog operations take `&mut self`, so they can never overlap a run.
#[derive(Debug)]
pub struct Decoder {
    config: RunConfig,
    catalog: PipelineCatalog,
    tracker: PredictionTracker,
    log: RunLog,
    stage: RunStage,
}

impl Decoder {
    /// Decoder over the built-in pipelines named in `config`.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        let catalog = PipelineCatalog::with_builtins(config.pipelines.as_deref())?;
        Ok(Self::with_catalog(config, catalog))
    }

    pub fn with_catalog(config: RunConfig, catalog: PipelineCatalog) -> Self {
        let mut tracker = PredictionTracker::new();
        for name in catalog.names() {
            tracker.register(&name);
        }
        Self {
            config,
            catalog,
            tracker,
            log: RunLog::new(),
            stage: RunStage::Init,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn catalog(&self) -> &PipelineCatalog {
        &self.catalog
    }

    pub fn tracker(&self) -> &PredictionTracker {
        &self.tracker
    }

    pub fn run_log(&self) -> &RunLog {
        &self.log
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    /// Insert or replace a pipeline. Returns `true` when the name is new.
    pub fn add_or_modify(&mut self, name: &str, estimator: Box<dyn Classifier>, tuning: TuningSpec) -> bool {
        let is_new = self.catalog.add_or_modify(name, estimator, tuning);
        if is_new {
            self.tracker.register(name);
        }
        is_new
    }

    /// Remove pipelines from the catalog and the tracker. Nothing is removed
    /// unless every name exists.
    pub fn delete<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        self.catalog.delete(names)?;
        for name in names {
            self.tracker.remove(name.as_ref());
        }
        Ok(())
    }

    pub fn modify_parameters(&mut self, name: &str, tuning: TuningSpec) -> Result<()> {
        self.catalog.modify_parameters(name, tuning)
    }

    /// Forget accumulated predictions and scores, keeping the catalog.
    pub fn restore(&mut self) {
        for name in self.tracker.names() {
            if !self.catalog.contains(&name) {
                self.tracker.remove(&name);
            }
        }
        for name in self.catalog.names() {
            self.tracker.register(&name);
        }
        self.tracker.clear();
        self.stage = RunStage::Init;
    }

    /// Fit every pipeline on `x`, removing the ones that fail.
    pub fn fit(&mut self, x: &Array3<f64>, y: &Array1<usize>) -> Vec<RemovedPipeline> {
        let mut removed = Vec::new();
        for name in self.catalog.names() {
            let result = match self.catalog.get_mut(&name) {
                Some(entry) => entry.estimator.fit(x, y),
                None => continue,
            };
            if let Err(e) = result {
                removed.push(self.remove_failed(&name, None, &e));
            }
        }
        removed
    }

    /// Labels predicted by every pipeline.
    pub fn predict(&self, x: &Array3<f64>) -> Result<BTreeMap<String, Array1<usize>>> {
        self.for_each_pipeline(|estimator| estimator.predict(x))
    }

    /// Probabilities predicted by every pipeline.
    pub fn predict_proba(&self, x: &Array3<f64>) -> Result<BTreeMap<String, Array2<f64>>> {
        self.for_each_pipeline(|estimator| estimator.predict_proba(x))
    }

    /// Accuracy of every pipeline on `(x, y)`.
    pub fn score(&self, x: &Array3<f64>, y: &Array1<usize>) -> Result<BTreeMap<String, f64>> {
        self.for_each_pipeline(|estimator| estimator.score(x, y))
    }

    fn for_each_pipeline<T, F>(&self, f: F) -> Result<BTreeMap<String, T>>
    where
        F: Fn(&dyn Classifier) -> Result<T>,
    {
        self.catalog
            .iter()
            .map(|entry| {
                f(entry.estimator.as_ref())
                    .map(|v| (entry.name.clone(), v))
                    .map_err(|e| DecoderError::PipelineFitError {
                        name: entry.name.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    /// Assemble the dataset under `root` and run on it. Output files default
    /// to `root` when no output directory is configured.
    pub fn run_path(&mut self, root: &Path) -> Result<RunReport> {
        let assembler = DatasetAssembler::new(self.config.assembly.clone());
        let dataset = assembler.assemble(root)?;
        self.log.clear();
        self.log.push("dataset", root.display());
        let output_dir = self.config.output_dir.clone().unwrap_or_else(|| root.to_path_buf());
        self.run_logged(dataset, Some(output_dir))
    }

    /// Run on an assembled dataset.
    pub fn run(&mut self, dataset: Dataset) -> Result<RunReport> {
        self.log.clear();
        let output_dir = self.config.output_dir.clone();
        self.run_logged(dataset, output_dir)
    }

    /// Any error leaves the decoder in [`RunStage::Abort`].
    fn run_logged(&mut self, dataset: Dataset, output_dir: Option<PathBuf>) -> Result<RunReport> {
        let result = self.run_stages(dataset, output_dir);
        if let Err(e) = &result {
            if self.stage != RunStage::Abort {
                self.stage = RunStage::Abort;
                error!(error = %e, "Run aborted");
                self.log.push("error", e);
            }
        }
        result
    }

    fn run_stages(&mut self, dataset: Dataset, output_dir: Option<PathBuf>) -> Result<RunReport> {
        self.restore();
        let mut report = RunReport {
            class_names: dataset.class_names.clone(),
            ..Default::default()
        };
        self.log_dataset(&dataset);

        let (mut dataset, mut holdout) = match self.config.holdout {
            Some(fraction) => {
                let (cv, held) = dataset.split_holdout(fraction)?;
                info!(subjects = held.n_subjects(), "Holding out subjects");
                self.log.push("holdout subjects", held.n_subjects());
                (cv, Some(held))
            }
            None => (dataset, None),
        };

        if let Some(mode) = self.config.feature_selection {
            self.stage = RunStage::FeatureSelect;
            match self.select_features(mode, &dataset, holdout.as_ref()) {
                Ok((outcome, selected, held)) => {
                    self.log.push("selected channels", format!("{:?}", outcome.channel_names));
                    dataset = selected;
                    holdout = held;
                    report.selection = Some(outcome);
                }
                Err(e) => self.skip(&mut report, e),
            }
        }

        let flat = dataset.flatten()?;
        let groups = self.config.cv.requires_groups().then_some(&flat.groups);

        if self.config.tune_hyperparameters {
            self.stage = RunStage::HyperTune;
            let tuner = HyperparameterTuner::new(self.config.cv).with_random_state(self.config.random_state);
            match tuner.tune(&mut self.catalog, &flat.x, &flat.labels, groups) {
                Ok(tuned) => {
                    for t in &tuned {
                        self.log.push(format!("tuned {}", t.name), format_params(&t.best_params));
                    }
                    report.tuned = tuned;
                }
                Err(e) => self.skip(&mut report, e),
            }
        }

        self.stage = RunStage::FoldIterate;
        let n_classes = dataset.n_classes();
        report.n_folds = self.iterate_folds(&flat, groups, n_classes, &mut report.removed)?;

        self.stage = RunStage::Aggregate;
        match self.aggregate(n_classes) {
            Ok(cards) => report.scorecards = cards,
            Err(e) => {
                self.stage = RunStage::Abort;
                error!(error = %e, "Aggregation failed");
                self.log.push("error", &e);
                return Err(match e {
                    DecoderError::AggregationError(_) => e,
                    other => DecoderError::AggregationError(other.to_string()),
                });
            }
        }

        if let Some(held) = holdout {
            report.holdout = self.score_holdout(&flat, &held, &mut report)?;
        }

        self.log.push_scores(&report.scorecards);
        for removal in &report.removed {
            self.log.push(format!("removed {}", removal.name), &removal.reason);
        }
        if let Some(dir) = output_dir {
            self.log.push("predictions", format!("see '{}' in {}", PREDICTIONS_FILE, dir.display()));
            report.outputs.push(self.artifact().save(&dir)?);
            report.outputs.push(self.log.save(&dir)?);
        }

        self.stage = RunStage::Done;
        info!(
            pipelines = report.scorecards.len(),
            removed = report.removed.len(),
            degraded = report.is_degraded(),
            "Run finished"
        );
        Ok(report)
    }

    /// Predicted labels of every surviving pipeline.
    pub fn artifact(&self) -> PredictionArtifact {
        PredictionArtifact {
            predictions: self
                .tracker
                .iter()
                .map(|(name, state)| (name.clone(), state.predictions.clone()))
                .collect(),
            expected_answers: self.tracker.expected_answers().to_vec(),
        }
    }

    fn log_dataset(&mut self, dataset: &Dataset) {
        info!(
            subjects = dataset.n_subjects(),
            epochs = dataset.n_epochs(),
            channels = dataset.n_channels(),
            times = dataset.n_times(),
            "Dataset ready"
        );
        self.log.push("subjects", dataset.n_subjects());
        self.log.push("epochs", dataset.n_epochs());
        self.log.push("channels", format!("{:?}", dataset.channel_names));
        self.log.push("sampling frequency", dataset.sfreq);
        let counts: Vec<String> = dataset
            .class_names
            .iter()
            .zip(dataset.class_counts())
            .map(|(name, count)| format!("{}: {}", name, count))
            .collect();
        self.log.push("class counts", counts.join(", "));
        self.log.push("cross validation", format!("{:?}", self.config.cv));
        self.log.push("catalog", format!("{:?}", self.catalog.names()));
    }

    fn select_features(
        &self,
        mode: SelectionMode,
        dataset: &Dataset,
        holdout: Option<&Dataset>,
    ) -> Result<(SelectionOutcome, Dataset, Option<Dataset>)> {
        let flat = dataset.flatten()?;
        let outcome = FeatureSelector::new(mode)
            .with_random_state(self.config.random_state)
            .select(&flat.x, &flat.labels, &dataset.channel_names)?;
        let mut selected = dataset.clone();
        selected.select_channels(&outcome.channels)?;
        let held = match holdout {
            Some(h) => {
                let mut h = h.clone();
                h.select_channels(&outcome.channels)?;
                Some(h)
            }
            None => None,
        };
        Ok((outcome, selected, held))
    }

    fn skip(&mut self, report: &mut RunReport, e: DecoderError) {
        warn!(stage = %self.stage, error = %e, "Skipping step");
        self.log.push(format!("{} skipped", self.stage), &e);
        report.skipped.push(SkippedStep {
            stage: self.stage,
            reason: e.to_string(),
        });
    }

    /// Returns the number of folds.
    fn iterate_folds(
        &mut self,
        flat: &FlatDataset,
        groups: Option<&Array1<usize>>,
        n_classes: usize,
        removed: &mut Vec<RemovedPipeline>,
    ) -> Result<usize> {
        let splits = CrossValidator::new(self.config.cv)
            .with_random_state(self.config.random_state)
            .split(flat.len(), groups)?;

        for split in &splits {
            let (x_train, y_train) = flat.take(&split.train_indices);
            let (x_test, y_test) = flat.take(&split.test_indices);

            for name in self.catalog.names() {
                if !self.catalog.contains(&name) {
                    continue;
                }
                if let Err(e) = self.evaluate_fold(&name, &x_train, &y_train, &x_test, &y_test, n_classes) {
                    removed.push(self.remove_failed(&name, Some(split.fold_idx), &e));
                }
            }
            self.tracker.extend_expected(&y_test);
            debug!(
                fold = split.fold_idx,
                train = split.train_indices.len(),
                test = split.test_indices.len(),
                "Fold done"
            );
        }
        Ok(splits.len())
    }

    fn evaluate_fold(
        &mut self,
        name: &str,
        x_train: &Array3<f64>,
        y_train: &Array1<usize>,
        x_test: &Array3<f64>,
        y_test: &Array1<usize>,
        n_classes: usize,
    ) -> Result<()> {
        let entry = self
            .catalog
            .get_mut(name)
            .ok_or_else(|| DecoderError::PipelineNotFound(name.to_string()))?;
        entry.estimator.fit(x_train, y_train)?;
        let proba = pad_probabilities(entry.estimator.predict_proba(x_test)?, y_test.len(), n_classes)?;
        let predictions = argmax_rows(&proba);
        let fold_score = accuracy(&predictions, y_test)?;
        self.tracker.record(name, &predictions, &proba, fold_score)
    }

    fn remove_failed(&mut self, name: &str, fold: Option<usize>, e: &DecoderError) -> RemovedPipeline {
        warn!(pipeline = %name, fold = ?fold, error = %e, "Removing pipeline");
        self.catalog.delete(&[name]).ok();
        self.tracker.remove(name);
        RemovedPipeline {
            name: name.to_string(),
            fold,
            reason: e.to_string(),
        }
    }

    fn aggregate(&mut self, n_classes: usize) -> Result<BTreeMap<String, Scorecard>> {
        if self.catalog.is_empty() {
            return Err(DecoderError::AggregationError("every pipeline was removed".to_string()));
        }
        self.tracker.check_lengths()?;

        let scorer = Scorer::new(n_classes);
        let mut cards = BTreeMap::new();
        for name in self.catalog.names() {
            let state = self
                .tracker
                .get(&name)
                .ok_or_else(|| DecoderError::AggregationError(format!("{} is not tracked", name)))?;
            let card = scorer.score(
                &name,
                self.tracker.expected_answers(),
                &state.predictions,
                &state.probabilities,
                state.fold_scores.clone(),
            )?;
            info!(pipeline = %name, accuracy = card.accuracy, auc = ?card.auc(), "Scored pipeline");
            self.tracker.set_scorecard(&name, card.clone())?;
            cards.insert(name, card);
        }
        Ok(cards)
    }

    /// Refit every surviving pipeline on all cross-validation data and score
    /// it on the held-out subjects.
    fn score_holdout(
        &mut self,
        train: &FlatDataset,
        holdout: &Dataset,
        report: &mut RunReport,
    ) -> Result<BTreeMap<String, Scorecard>> {
        let test = holdout.flatten()?;
        let scorer = Scorer::new(holdout.n_classes());
        let mut cards = BTreeMap::new();
        for name in self.catalog.names() {
            let result = self.catalog.get_mut(&name).map(|entry| -> Result<Scorecard> {
                entry.estimator.fit(&train.x, &train.labels)?;
                let proba = pad_probabilities(
                    entry.estimator.predict_proba(&test.x)?,
                    test.len(),
                    scorer.n_classes(),
                )?;
                let predictions = argmax_rows(&proba);
                let score = accuracy(&predictions, &test.labels)?;
                let probabilities: Vec<Vec<f64>> = proba.rows().into_iter().map(|r| r.to_vec()).collect();
                scorer.score(
                    &name,
                    &test.labels.to_vec(),
                    &predictions.to_vec(),
                    &probabilities,
                    vec![score],
                )
            });
            match result {
                Some(Ok(card)) => {
                    self.log.push(format!("holdout {}", name), format!("{:.4}", card.accuracy));
                    cards.insert(name, card);
                }
                Some(Err(e)) => {
                    warn!(pipeline = %name, error = %e, "Hold-out scoring failed");
                    report.skipped.push(SkippedStep {
                        stage: RunStage::Aggregate,
                        reason: format!("holdout {}: {}", name, e),
                    });
                }
                None => {}
            }
        }
        Ok(cards)
    }
}

/// Check `proba` against the test set and widen it to `n_classes` columns.
/// Classes a pipeline never saw get probability zero.
fn pad_probabilities(proba: Array2<f64>, n_samples: usize, n_classes: usize) -> Result<Array2<f64>> {
    let (rows, cols) = proba.dim();
    if rows != n_samples || cols > n_classes {
        return Err(DecoderError::ShapeError {
            expected: format!("({}, {})", n_samples, n_classes),
            actual: format!("({}, {})", rows, cols),
        });
    }
    if cols == n_classes {
        return Ok(proba);
    }
    let mut padded = Array2::zeros((rows, n_classes));
    padded.slice_mut(s![.., ..cols]).assign(&proba);
    Ok(padded)
}
