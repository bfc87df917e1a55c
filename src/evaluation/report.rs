//! Run log and prediction artifact

use super::scorer::Scorecard;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const RUN_LOG_FILE: &str = "run_log.txt";
pub const PREDICTIONS_FILE: &str = "predictions.json";

/// Ordered `key : value` record of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub started_at: DateTime<Utc>,
    entries: Vec<(String, String)>,
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.push((key.into(), value.to_string()));
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// First value logged under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.started_at = Utc::now();
    }

    /// Append the final scores of every pipeline, in pipeline order.
    pub fn push_scores(&mut self, scorecards: &BTreeMap<String, Scorecard>) {
        let names: Vec<&str> = scorecards.keys().map(String::as_str).collect();
        self.push("pipelines", format!("{:?}", names));
        self.push("scores", format_map(scorecards, |c| Some(c.accuracy)));
        self.push(
            "scores fold",
            scorecards
                .iter()
                .map(|(n, c)| format!("{}: {:.4} +/- {:.4}", n, c.folds.mean_score, c.folds.std_score))
                .collect::<Vec<_>>()
                .join(", "),
        );
        if scorecards.values().any(|c| c.precision.is_some()) {
            self.push("scores auc", format_map(scorecards, Scorecard::auc));
            self.push("recalls", format_map(scorecards, |c| c.recall));
            self.push("precisions", format_map(scorecards, |c| c.precision));
        }
        for (name, card) in scorecards {
            self.push(format!("confusion {}", name), format!("{:?}", card.confusion));
        }
    }

    /// Write to `dir/run_log.txt`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(RUN_LOG_FILE);
        fs::write(&path, self.to_string())?;
        Ok(path)
    }
}

impl fmt::Display for RunLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "started : {}", self.started_at.to_rfc3339())?;
        for (key, value) in &self.entries {
            writeln!(f, "{} : {}", key, value)?;
        }
        Ok(())
    }
}

fn format_map<F>(cards: &BTreeMap<String, Scorecard>, value: F) -> String
where
    F: Fn(&Scorecard) -> Option<f64>,
{
    let parts: Vec<String> = cards
        .iter()
        .filter_map(|(name, card)| value(card).map(|v| format!("{}: {:.4}", name, v)))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

/// Predicted labels of every pipeline, in fold-traversal order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionArtifact {
    pub predictions: BTreeMap<String, Vec<usize>>,
    pub expected_answers: Vec<usize>,
}

impl PredictionArtifact {
    /// Write to `dir/predictions.json`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(PREDICTIONS_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
