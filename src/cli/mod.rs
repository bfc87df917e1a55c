//! Command-line interface
//!
//! Flags override the values loaded from `--config`.

use clap::{Parser, ValueEnum};
use colored::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use crate::config::RunConfig;
use crate::dataset::preprocess::{Baseline, Reference};
use crate::dataset::{DatasetAssembler, DatasetLayout};
use crate::error::DecoderError;
use crate::evaluation::{CVStrategy, Decoder, RunReport, Scorecard};
use crate::pipeline::params::format_params;
use crate::pipeline::{BuiltinPipeline, TuningMode, BUILTIN_NAMES};
use crate::selection::SelectionMode;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString    { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }
fn warn(s: &str) -> ColoredString   { s.truecolor(230, 180, 80) }

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

/// Splitter selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CvMode {
    Kfold,
    GroupKfold,
    IntraSubject,
}

/// Dataset layout selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayoutArg {
    ParadigmFolders,
    OneFilePerSubject,
}

impl From<LayoutArg> for DatasetLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::ParadigmFolders => DatasetLayout::ParadigmFolders,
            LayoutArg::OneFilePerSubject => DatasetLayout::OneFilePerSubject,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "epoch-decoder")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cross-validated multi-pipeline classification of EEG epochs")]
pub struct Cli {
    /// Dataset root directory
    #[arg(long, required_unless_present = "list_pipelines")]
    pub dataset_dir: Option<PathBuf>,

    /// Built-in pipelines to run, comma separated (all by default)
    #[arg(long, value_delimiter = ',')]
    pub pipelines: Option<Vec<String>>,

    /// Number of cross-validation folds
    #[arg(long)]
    pub cv_folds: Option<usize>,

    /// Cross-validation splitter
    #[arg(long, value_enum)]
    pub cv_mode: Option<CvMode>,

    /// Select channels before evaluation
    #[arg(long)]
    pub feature_selection: bool,

    /// Number of channels to keep (searched when omitted)
    #[arg(long, requires = "feature_selection")]
    pub channels: Option<usize>,

    /// Tune GRID and RANDOM pipelines before evaluation
    #[arg(long)]
    pub tune_hyperparameters: bool,

    #[arg(long, value_enum)]
    pub layout: Option<LayoutArg>,

    #[arg(long)]
    pub max_subjects: Option<usize>,

    /// Epoch start in seconds
    #[arg(long, allow_hyphen_values = true)]
    pub tmin: Option<f64>,

    /// Epoch end in seconds
    #[arg(long, allow_hyphen_values = true)]
    pub tmax: Option<f64>,

    /// Channels to keep, comma separated
    #[arg(long, value_delimiter = ',')]
    pub picks: Option<Vec<String>>,

    /// Channels to drop, comma separated
    #[arg(long, value_delimiter = ',')]
    pub bads: Option<Vec<String>>,

    /// High-pass edge in Hz
    #[arg(long)]
    pub l_freq: Option<f64>,

    /// Low-pass edge in Hz
    #[arg(long)]
    pub h_freq: Option<f64>,

    /// Target sampling frequency in Hz
    #[arg(long)]
    pub resample: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub baseline_start: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub baseline_end: Option<f64>,

    /// `average` or a channel name
    #[arg(long)]
    pub reference: Option<String>,

    /// Hold out the last `n_subjects / HOLDOUT` subjects
    #[arg(long)]
    pub holdout: Option<usize>,

    /// Where the run log and predictions are written (dataset directory by default)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// JSON run configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seed for every shuffle and random draw
    #[arg(long)]
    pub seed: Option<u64>,

    /// Print the built-in pipelines and exit
    #[arg(long)]
    pub list_pipelines: bool,
}

impl Cli {
    /// Configuration file values with every given flag applied on top.
    pub fn run_config(&self) -> Result<RunConfig, DecoderError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)?,
            None => RunConfig::default(),
        };

        if let Some(names) = &self.pipelines {
            config.pipelines = Some(names.clone());
        }
        if self.cv_folds.is_some() || self.cv_mode.is_some() {
            let n_splits = self.cv_folds.unwrap_or_else(|| config.cv.n_splits());
            let mode = self.cv_mode.unwrap_or(match config.cv {
                CVStrategy::KFold { .. } => CvMode::Kfold,
                CVStrategy::GroupKFold { .. } => CvMode::GroupKfold,
                CVStrategy::IntraSubject { .. } => CvMode::IntraSubject,
            });
            config.cv = match mode {
                CvMode::Kfold => CVStrategy::KFold { n_splits, shuffle: true },
                CvMode::GroupKfold => CVStrategy::GroupKFold { n_splits },
                CvMode::IntraSubject => CVStrategy::IntraSubject { n_splits },
            };
        }
        if self.feature_selection {
            config.feature_selection = Some(match self.channels {
                Some(n) => SelectionMode::Manual(n),
                None => SelectionMode::Auto,
            });
        }
        if self.tune_hyperparameters {
            config.tune_hyperparameters = true;
        }
        if let Some(fraction) = self.holdout {
            config.holdout = Some(fraction);
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = Some(dir.clone());
        }
        if let Some(seed) = self.seed {
            config.random_state = seed;
        }

        let assembly = &mut config.assembly;
        if let Some(layout) = self.layout {
            assembly.layout = layout.into();
        }
        if self.max_subjects.is_some() {
            assembly.max_subjects = self.max_subjects;
        }
        if self.tmin.is_some() {
            assembly.tmin = self.tmin;
        }
        if self.tmax.is_some() {
            assembly.tmax = self.tmax;
        }
        if self.picks.is_some() {
            assembly.picks = self.picks.clone();
        }
        if let Some(bads) = &self.bads {
            assembly.bads = bads.clone();
        }
        if self.l_freq.is_some() {
            assembly.filter_band.0 = self.l_freq;
        }
        if self.h_freq.is_some() {
            assembly.filter_band.1 = self.h_freq;
        }
        if self.resample.is_some() {
            assembly.resample = self.resample;
        }
        if self.baseline_start.is_some() || self.baseline_end.is_some() {
            assembly.baseline = Some(Baseline {
                start: self.baseline_start,
                end: self.baseline_end,
            });
        }
        if let Some(reference) = &self.reference {
            assembly.reference = Some(Reference::parse(reference));
        }

        config.validate()?;
        Ok(config)
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

/// Print the built-in pipelines and how they are tuned.
pub fn cmd_list_pipelines() {
    section("Pipelines");
    for name in BUILTIN_NAMES {
        let mode = BuiltinPipeline::from_name(name)
            .map(|p| p.default_tuning().mode())
            .unwrap_or(TuningMode::None);
        println!("  {:<12} {}", name.white(), muted(&format!("{:?}", mode)));
    }
}

/// Assemble the dataset, run every pipeline and print the scores.
pub fn cmd_run(cli: &Cli) -> Result<RunReport, DecoderError> {
    let config = cli.run_config()?;
    let root = cli
        .dataset_dir
        .clone()
        .ok_or_else(|| DecoderError::ConfigError("--dataset-dir is required".to_string()))?;

    section("Run");
    println!("  {}", kv("Dataset", &root.display().to_string()));
    println!("  {}", kv("Cross validation", &format!("{:?}", config.cv)));
    let assembler = DatasetAssembler::new(config.assembly.clone());
    println!("  {}", kv("Subjects", &assembler.count_subjects(&root)?.to_string()));

    let mut decoder = Decoder::new(config)?;
    println!("  {}", kv("Pipelines", &decoder.catalog().names().join(", ")));

    step_run("Evaluating");
    let start = Instant::now();
    let report = decoder.run_path(&root)?;
    step_done(&format!("{} folds in {:.2?}", report.n_folds, start.elapsed()));

    print_report(&report);
    Ok(report)
}

fn print_scorecards(title: &str, cards: &BTreeMap<String, Scorecard>) {
    section(title);
    println!(
        "  {:<12} {:>9} {:>9} {:>9} {:>9} {:>15}",
        muted("Pipeline"),
        muted("Accuracy"),
        muted("Precision"),
        muted("Recall"),
        muted("AUC"),
        muted("Folds")
    );
    println!("  {}", dim(&"─".repeat(68)));
    let opt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v));
    for (name, card) in cards {
        println!(
            "  {:<12} {:>9.4} {:>9} {:>9} {:>9} {:>15}",
            name,
            card.accuracy,
            opt(card.precision),
            opt(card.recall),
            opt(card.auc()),
            format!("{:.3} ± {:.3}", card.folds.mean_score, card.folds.std_score)
        );
    }
}

fn print_report(report: &RunReport) {
    if let Some(selection) = &report.selection {
        println!("  {}", kv("Selected channels", &selection.channel_names.join(", ")));
    }
    for tuned in &report.tuned {
        println!(
            "  {}",
            kv(&format!("Tuned {}", tuned.name), &format_params(&tuned.best_params))
        );
    }

    print_scorecards("Scores", &report.scorecards);
    if !report.holdout.is_empty() {
        print_scorecards("Hold-out scores", &report.holdout);
    }

    if report.is_degraded() {
        section("Warnings");
        for removed in &report.removed {
            let fold = removed.fold.map_or_else(String::new, |f| format!(" in fold {}", f));
            println!("  {} {} removed{}: {}", warn("!"), removed.name, fold, dim(&removed.reason));
        }
        for skipped in &report.skipped {
            println!("  {} {} skipped: {}", warn("!"), skipped.stage, dim(&skipped.reason));
        }
    }
    for path in &report.outputs {
        println!("  {}", kv("Wrote", &path.display().to_string()));
    }
    println!();
}

/// Process exit code for an error: `2` assembly, `3` aggregation, `1` other.
pub fn exit_code(err: &DecoderError) -> i32 {
    match err {
        DecoderError::AssemblyError(_) => 2,
        DecoderError::AggregationError(_) => 3,
        _ => 1,
    }
}
