//! Run configuration

use crate::dataset::AssemblyConfig;
use crate::error::{DecoderError, Result};
use crate::evaluation::cross_validation::{CVStrategy, DEFAULT_RANDOM_STATE};
use crate::selection::SelectionMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration of one decoding run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Built-in pipelines to run, all of them when `None`
    pub pipelines: Option<Vec<String>>,

    /// Splitter for cross-validation and tuning
    pub cv: CVStrategy,

    /// Seed of every shuffle and random draw
    pub random_state: u64,

    /// Channel selection before tuning, disabled when `None`
    pub feature_selection: Option<SelectionMode>,

    pub tune_hyperparameters: bool,

    /// Keep the last `n_subjects / holdout` subjects out of
    /// cross-validation and score them separately
    pub holdout: Option<usize>,

    /// Where the run log and prediction artifact are written
    pub output_dir: Option<PathBuf>,

    pub assembly: AssemblyConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pipelines: None,
            cv: CVStrategy::default(),
            random_state: DEFAULT_RANDOM_STATE,
            feature_selection: None,
            tune_hyperparameters: false,
            holdout: None,
            output_dir: None,
            assembly: AssemblyConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| DecoderError::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_pipelines(mut self, names: Vec<String>) -> Self {
        self.pipelines = Some(names);
        self
    }

    pub fn with_cv(mut self, cv: CVStrategy) -> Self {
        self.cv = cv;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn with_feature_selection(mut self, mode: SelectionMode) -> Self {
        self.feature_selection = Some(mode);
        self
    }

    pub fn with_tuning(mut self, enabled: bool) -> Self {
        self.tune_hyperparameters = enabled;
        self
    }

    pub fn with_holdout(mut self, fraction: usize) -> Self {
        self.holdout = Some(fraction);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_assembly(mut self, assembly: AssemblyConfig) -> Self {
        self.assembly = assembly;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cv.n_splits() < 2 {
            return Err(DecoderError::ConfigError(format!(
                "cross-validation needs at least 2 folds, got {}",
                self.cv.n_splits()
            )));
        }
        if self.holdout == Some(0) {
            return Err(DecoderError::ConfigError("holdout fraction must be positive".to_string()));
        }
        if self.feature_selection == Some(SelectionMode::Manual(0)) {
            return Err(DecoderError::ConfigError("cannot select 0 channels".to_string()));
        }
        if let (Some(tmin), Some(tmax)) = (self.assembly.tmin, self.assembly.tmax) {
            if tmin >= tmax {
                return Err(DecoderError::ConfigError(format!(
                    "tmin ({}) must be below tmax ({})",
                    tmin, tmax
                )));
            }
        }
        Ok(())
    }
}
