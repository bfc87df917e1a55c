//! Named registry of pipelines and their search descriptors
//!
//! Iteration order is the byte-wise lexicographic order of pipeline names.
//! Every fold pass, tuning pass, run log and prediction artifact follows it.

use super::builtin::{BuiltinPipeline, BUILTIN_NAMES};
use super::params::ParamValue;
use super::Classifier;
use crate::error::{DecoderError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Draws per randomized search when none is given
pub const DEFAULT_N_ITER: usize = 10;

/// How a pipeline's hyperparameters are searched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TuningMode {
    None,
    Grid,
    Random,
}

/// Values of one grid axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridAxis {
    Values(Vec<ParamValue>),
    /// Staircase candidates for the dataset's channel count
    Staircase,
}

/// Search descriptor of a catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "UPPERCASE")]
pub enum TuningSpec {
    None,
    Grid { grid: BTreeMap<String, GridAxis> },
    /// Every named parameter is drawn uniformly from `[1, channels / 2]`
    Random { params: Vec<String>, n_iter: usize },
}

impl Default for TuningSpec {
    fn default() -> Self {
        TuningSpec::None
    }
}

impl TuningSpec {
    pub fn grid(grid: BTreeMap<String, GridAxis>) -> Self {
        TuningSpec::Grid { grid }
    }

    pub fn random(params: Vec<String>, n_iter: Option<usize>) -> Self {
        TuningSpec::Random {
            params,
            n_iter: n_iter.unwrap_or(DEFAULT_N_ITER),
        }
    }

    pub fn mode(&self) -> TuningMode {
        match self {
            TuningSpec::None => TuningMode::None,
            TuningSpec::Grid { .. } => TuningMode::Grid,
            TuningSpec::Random { .. } => TuningMode::Random,
        }
    }
}

/// One named pipeline
#[derive(Debug, Clone)]
pub struct PipelineEntry {
    pub name: String,
    pub estimator: Box<dyn Classifier>,
    pub tuning: TuningSpec,
}

/// Registry of active pipelines
#[derive(Debug, Clone, Default)]
pub struct PipelineCatalog {
    entries: BTreeMap<String, PipelineEntry>,
}

impl PipelineCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of built-in pipelines, all of them when `names` is `None`.
    pub fn with_builtins(names: Option<&[String]>) -> Result<Self> {
        let names: Vec<String> = match names {
            Some(names) => names.to_vec(),
            None => BUILTIN_NAMES.iter().map(|n| n.to_string()).collect(),
        };
        let mut catalog = Self::new();
        for name in names {
            let pipeline = BuiltinPipeline::from_name(&name).ok_or_else(|| {
                DecoderError::ConfigError(format!(
                    "unknown pipeline {}, expected one of {}",
                    name,
                    BUILTIN_NAMES.join(", ")
                ))
            })?;
            let tuning = pipeline.default_tuning();
            catalog.add_or_modify(&name, Box::new(pipeline), tuning);
        }
        Ok(catalog)
    }

    /// Insert or replace an entry. Returns `true` when the name is new.
    pub fn add_or_modify(&mut self, name: &str, estimator: Box<dyn Classifier>, tuning: TuningSpec) -> bool {
        let entry = PipelineEntry {
            name: name.to_string(),
            estimator,
            tuning,
        };
        self.entries.insert(name.to_string(), entry).is_none()
    }

    /// Remove every name in `names`. Nothing is removed unless all exist.
    pub fn delete<S: AsRef<str>>(&mut self, names: &[S]) -> Result<()> {
        if let Some(missing) = names.iter().find(|n| !self.entries.contains_key(n.as_ref())) {
            return Err(DecoderError::PipelineNotFound(missing.as_ref().to_string()));
        }
        for name in names {
            self.entries.remove(name.as_ref());
        }
        Ok(())
    }

    /// Replace only the search descriptor of `name`.
    pub fn modify_parameters(&mut self, name: &str, tuning: TuningSpec) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| DecoderError::PipelineNotFound(name.to_string()))?;
        entry.tuning = tuning;
        Ok(())
    }

    /// Replace only the estimator of `name`.
    pub fn replace_estimator(&mut self, name: &str, estimator: Box<dyn Classifier>) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| DecoderError::PipelineNotFound(name.to_string()))?;
        entry.estimator = estimator;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PipelineEntry> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PipelineEntry> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names in catalog order
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Entries in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &PipelineEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_sorted() {
        let catalog = PipelineCatalog::with_builtins(None).unwrap();
        assert_eq!(catalog.names(), vec!["CSP", "ERPLR", "LogVarNB", "MDM", "TSLR"]);
        assert_eq!(catalog.get("TSLR").unwrap().tuning.mode(), TuningMode::Grid);
        assert_eq!(catalog.get("MDM").unwrap().tuning.mode(), TuningMode::None);
    }

    #[test]
    fn test_unknown_builtin() {
        let names = vec!["MDM".to_string(), "Xdawn".to_string()];
        let err = PipelineCatalog::with_builtins(Some(&names)).unwrap_err();
        assert!(matches!(err, DecoderError::ConfigError(_)));
    }

    #[test]
    fn test_add_or_modify_reports_new() {
        let mut catalog = PipelineCatalog::new();
        let mdm = BuiltinPipeline::from_name("MDM").unwrap();
        assert!(catalog.add_or_modify("mine", Box::new(mdm.clone()), TuningSpec::None));
        assert!(!catalog.add_or_modify("mine", Box::new(mdm), TuningSpec::random(vec!["x".into()], None)));
        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog.get("mine").unwrap().tuning,
            TuningSpec::Random { params: vec!["x".into()], n_iter: DEFAULT_N_ITER }
        );
    }

    #[test]
    fn test_delete_is_atomic() {
        let mut catalog = PipelineCatalog::with_builtins(None).unwrap();
        let err = catalog.delete(&["CSP", "nope"]).unwrap_err();
        assert!(matches!(err, DecoderError::PipelineNotFound(ref n) if n == "nope"));
        assert!(catalog.contains("CSP"));

        catalog.delete(&["CSP", "MDM"]).unwrap();
        assert_eq!(catalog.names(), vec!["ERPLR", "LogVarNB", "TSLR"]);
    }

    #[test]
    fn test_modify_parameters_keeps_estimator() {
        let mut catalog = PipelineCatalog::with_builtins(Some(&["ERPLR".to_string()])).unwrap();
        catalog.modify_parameters("ERPLR", TuningSpec::None).unwrap();
        let entry = catalog.get("ERPLR").unwrap();
        assert_eq!(entry.tuning, TuningSpec::None);
        assert_eq!(entry.estimator.params()["factor"], ParamValue::Int(2));
        assert!(catalog.modify_parameters("nope", TuningSpec::None).is_err());
    }

    #[test]
    fn test_tuning_spec_json() {
        let spec: TuningSpec = serde_json::from_str(r#"{"mode": "RANDOM", "params": ["n_components"], "n_iter": 4}"#).unwrap();
        assert_eq!(spec.mode(), TuningMode::Random);
        let grid: TuningSpec = serde_json::from_str(r#"{"mode": "GRID", "grid": {"nelec": "staircase"}}"#).unwrap();
        assert_eq!(grid.mode(), TuningMode::Grid);
    }
}
