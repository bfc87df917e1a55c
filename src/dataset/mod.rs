//! Epoch datasets
//!
//! A [`Dataset`] keeps epochs per subject. Runs work on the flattened view
//! ([`FlatDataset`]), where every epoch carries its label and the index of the
//! subject it came from.

pub mod assembler;
pub mod preprocess;
pub mod reader;

pub use assembler::{AssemblyConfig, DatasetAssembler, DatasetLayout};
pub use reader::{JsonEpochReader, ReadOptions, Recording, RecordingReader};

use crate::error::{DecoderError, Result};
use ndarray::{concatenate, Array1, Array3, Axis};
use serde::{Deserialize, Serialize};

/// Epochs and labels of one subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectData {
    pub name: String,
    /// `(epochs, channels, times)`
    pub epochs: Array3<f64>,
    pub labels: Array1<usize>,
}

impl SubjectData {
    pub fn new(name: impl Into<String>, epochs: Array3<f64>, labels: Array1<usize>) -> Result<Self> {
        let name = name.into();
        if epochs.shape()[0] != labels.len() {
            return Err(DecoderError::ShapeError {
                expected: format!("{} labels for subject {}", epochs.shape()[0], name),
                actual: format!("{} labels", labels.len()),
            });
        }
        Ok(Self { name, epochs, labels })
    }

    pub fn n_epochs(&self) -> usize {
        self.labels.len()
    }
}

/// Subject × epoch × channel × time dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub subjects: Vec<SubjectData>,
    pub channel_names: Vec<String>,
    /// Class names, indexed by label
    pub class_names: Vec<String>,
    pub sfreq: f64,
}

impl Dataset {
    /// Build a dataset, checking that every subject has the same channel
    /// count and epoch length.
    pub fn new(
        subjects: Vec<SubjectData>,
        channel_names: Vec<String>,
        class_names: Vec<String>,
        sfreq: f64,
    ) -> Result<Self> {
        if subjects.is_empty() {
            return Err(DecoderError::ValidationError("dataset has no subjects".to_string()));
        }
        let n_times = subjects[0].epochs.shape()[2];
        for subject in &subjects {
            let shape = subject.epochs.shape();
            if shape[1] != channel_names.len() || shape[2] != n_times {
                return Err(DecoderError::ShapeError {
                    expected: format!("(_, {}, {})", channel_names.len(), n_times),
                    actual: format!("{:?} for subject {}", shape, subject.name),
                });
            }
            if let Some(&bad) = subject.labels.iter().find(|&&l| l >= class_names.len()) {
                return Err(DecoderError::ValidationError(format!(
                    "subject {} has label {} but only {} classes exist",
                    subject.name,
                    bad,
                    class_names.len()
                )));
            }
        }
        Ok(Self {
            subjects,
            channel_names,
            class_names,
            sfreq,
        })
    }

    pub fn n_subjects(&self) -> usize {
        self.subjects.len()
    }

    pub fn n_epochs(&self) -> usize {
        self.subjects.iter().map(|s| s.n_epochs()).sum()
    }

    pub fn n_channels(&self) -> usize {
        self.channel_names.len()
    }

    pub fn n_times(&self) -> usize {
        self.subjects.first().map(|s| s.epochs.shape()[2]).unwrap_or(0)
    }

    pub fn n_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Subject index of every epoch, in flattening order.
    pub fn groups(&self) -> Array1<usize> {
        self.subjects
            .iter()
            .enumerate()
            .flat_map(|(i, s)| std::iter::repeat(i).take(s.n_epochs()))
            .collect()
    }

    /// Epoch count per class, indexed by label.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes()];
        for subject in &self.subjects {
            for &label in subject.labels.iter() {
                counts[label] += 1;
            }
        }
        counts
    }

    /// Concatenate every subject in order.
    pub fn flatten(&self) -> Result<FlatDataset> {
        let views: Vec<_> = self.subjects.iter().map(|s| s.epochs.view()).collect();
        let x = concatenate(Axis(0), &views)?;
        let label_views: Vec<_> = self.subjects.iter().map(|s| s.labels.view()).collect();
        let labels = concatenate(Axis(0), &label_views)?;
        FlatDataset::new(x, labels, self.groups())
    }

    /// Keep only `channels` (indices into `channel_names`) for every subject.
    pub fn select_channels(&mut self, channels: &[usize]) -> Result<()> {
        if channels.is_empty() {
            return Err(DecoderError::ValidationError("empty channel selection".to_string()));
        }
        if let Some(&bad) = channels.iter().find(|&&c| c >= self.n_channels()) {
            return Err(DecoderError::ValidationError(format!(
                "channel index {} out of range ({} channels)",
                bad,
                self.n_channels()
            )));
        }
        for subject in &mut self.subjects {
            subject.epochs = subject.epochs.select(Axis(1), channels);
        }
        self.channel_names = channels.iter().map(|&c| self.channel_names[c].clone()).collect();
        Ok(())
    }

    /// Split off the last `n_subjects / fraction` subjects as a hold-out set.
    ///
    /// Returns `(cross_validation, holdout)`.
    pub fn split_holdout(&self, fraction: usize) -> Result<(Dataset, Dataset)> {
        if fraction == 0 {
            return Err(DecoderError::ConfigError("holdout fraction must be positive".to_string()));
        }
        let n_holdout = self.n_subjects() / fraction;
        if n_holdout == 0 || n_holdout >= self.n_subjects() {
            return Err(DecoderError::ConfigError(format!(
                "cannot hold out 1/{} of {} subjects",
                fraction,
                self.n_subjects()
            )));
        }
        let split = self.n_subjects() - n_holdout;
        let part = |subjects: &[SubjectData]| Dataset {
            subjects: subjects.to_vec(),
            channel_names: self.channel_names.clone(),
            class_names: self.class_names.clone(),
            sfreq: self.sfreq,
        };
        Ok((part(&self.subjects[..split]), part(&self.subjects[split..])))
    }
}

/// Flattened epochs with aligned labels and subject groups
#[derive(Debug, Clone)]
pub struct FlatDataset {
    /// `(epochs, channels, times)`
    pub x: Array3<f64>,
    pub labels: Array1<usize>,
    pub groups: Array1<usize>,
}

impl FlatDataset {
    pub fn new(x: Array3<f64>, labels: Array1<usize>, groups: Array1<usize>) -> Result<Self> {
        let n = x.shape()[0];
        if labels.len() != n || groups.len() != n {
            return Err(DecoderError::ShapeError {
                expected: format!("{} labels and groups", n),
                actual: format!("{} labels, {} groups", labels.len(), groups.len()),
            });
        }
        Ok(Self { x, labels, groups })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Epochs and labels at `indices`, in that order.
    pub fn take(&self, indices: &[usize]) -> (Array3<f64>, Array1<usize>) {
        (self.x.select(Axis(0), indices), self.labels.select(Axis(0), indices))
    }
}
