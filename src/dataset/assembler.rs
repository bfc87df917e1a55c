//! Building a [`Dataset`] from a directory of recordings

use super::preprocess::{Baseline, Reference};
use super::reader::{JsonEpochReader, ReadOptions, Recording, RecordingReader};
use super::{Dataset, SubjectData};
use crate::error::{DecoderError, Result};
use ndarray::{concatenate, s, Array1, Array3, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// How recordings are arranged under the dataset root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetLayout {
    /// `root/{paradigm}/{subject file | subject directory}`
    #[default]
    ParadigmFolders,
    /// `root/{subject file}`, classes are event codes
    OneFilePerSubject,
}

/// Dataset assembly parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub layout: DatasetLayout,
    /// Maximum number of subjects to read
    pub max_subjects: Option<usize>,
    pub tmin: Option<f64>,
    pub tmax: Option<f64>,
    pub picks: Option<Vec<String>>,
    pub bads: Vec<String>,
    pub filter_band: (Option<f64>, Option<f64>),
    pub resample: Option<f64>,
    pub baseline: Option<Baseline>,
    /// With paradigm folders, the event code kept for each paradigm (in
    /// sorted paradigm order). With one file per subject, the event codes
    /// that become classes.
    pub event_ids: Option<Vec<i64>>,
    pub reference: Option<Reference>,
}

impl AssemblyConfig {
    pub fn with_layout(mut self, layout: DatasetLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_max_subjects(mut self, max_subjects: usize) -> Self {
        self.max_subjects = Some(max_subjects);
        self
    }

    pub fn with_window(mut self, tmin: f64, tmax: f64) -> Self {
        self.tmin = Some(tmin);
        self.tmax = Some(tmax);
        self
    }

    pub fn with_filter_band(mut self, l_freq: Option<f64>, h_freq: Option<f64>) -> Self {
        self.filter_band = (l_freq, h_freq);
        self
    }

    pub fn with_event_ids(mut self, event_ids: Vec<i64>) -> Self {
        self.event_ids = Some(event_ids);
        self
    }

    fn read_options(&self, event_ids: Option<Vec<i64>>) -> ReadOptions {
        ReadOptions {
            tmin: self.tmin,
            tmax: self.tmax,
            picks: self.picks.clone(),
            bads: self.bads.clone(),
            filter_band: self.filter_band,
            resample: self.resample,
            baseline: self.baseline,
            event_ids,
            reference: self.reference.clone(),
        }
    }
}

/// A subject inside a paradigm folder: one file or a directory of files
#[derive(Debug, Clone)]
struct SubjectSource {
    name: String,
    files: Vec<PathBuf>,
}

/// Shape every recording must agree on
#[derive(Debug, Clone, PartialEq)]
struct Layout {
    channel_names: Vec<String>,
    n_times: usize,
    sfreq: f64,
}

/// Builds a subject × epoch × channel × time dataset from recordings
pub struct DatasetAssembler {
    config: AssemblyConfig,
    reader: Box<dyn RecordingReader>,
}

impl DatasetAssembler {
    /// Assembler reading `*.epochs.json` files
    pub fn new(config: AssemblyConfig) -> Self {
        Self {
            config,
            reader: Box::new(JsonEpochReader::new()),
        }
    }

    /// Use another recording reader
    pub fn with_reader(mut self, reader: Box<dyn RecordingReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    /// Number of subjects available under `root`.
    pub fn count_subjects(&self, root: &Path) -> Result<usize> {
        match self.config.layout {
            DatasetLayout::ParadigmFolders => {
                let paradigms = sorted_dirs(root)?;
                let first = paradigms.first().ok_or_else(|| {
                    DecoderError::AssemblyError(format!("{} has no paradigm folders", root.display()))
                })?;
                Ok(self.subject_sources(first)?.len())
            }
            DatasetLayout::OneFilePerSubject => Ok(self.subject_files(root)?.len()),
        }
    }

    /// Read and assemble the dataset under `root`.
    pub fn assemble(&self, root: &Path) -> Result<Dataset> {
        let dataset = match self.config.layout {
            DatasetLayout::ParadigmFolders => self.assemble_paradigm_folders(root)?,
            DatasetLayout::OneFilePerSubject => self.assemble_one_file_per_subject(root)?,
        };
        info!(
            subjects = dataset.n_subjects(),
            epochs = dataset.n_epochs(),
            channels = dataset.n_channels(),
            classes = ?dataset.class_names,
            "Dataset assembled"
        );
        Ok(dataset)
    }

    fn subject_sources(&self, paradigm_dir: &Path) -> Result<Vec<SubjectSource>> {
        let mut sources: Vec<SubjectSource> = self
            .subject_files(paradigm_dir)?
            .into_iter()
            .map(|f| SubjectSource {
                name: subject_name(&f),
                files: vec![f],
            })
            .collect();

        for dir in sorted_dirs(paradigm_dir)? {
            let files = self.subject_files(&dir)?;
            if files.is_empty() {
                warn!(dir = %dir.display(), "Subject directory holds no readable recordings");
                continue;
            }
            sources.push(SubjectSource {
                name: subject_name(&dir),
                files,
            });
        }
        Ok(sources)
    }

    fn subject_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = read_dir(dir)?
            .into_iter()
            .filter(|p| self.reader.accepts(p))
            .collect();
        files.sort();
        Ok(files)
    }

    fn read_checked(&self, path: &Path, options: &ReadOptions, layout: &mut Option<Layout>) -> Result<Recording> {
        let rec = self.reader.read(path, options)?;
        let this = Layout {
            channel_names: rec.channel_names.clone(),
            n_times: rec.n_times(),
            sfreq: rec.sfreq,
        };
        match layout {
            Some(expected) if *expected != this => Err(DecoderError::AssemblyError(format!(
                "{} has {} channels x {} samples at {} Hz, expected {} x {} at {} Hz",
                path.display(),
                this.channel_names.len(),
                this.n_times,
                this.sfreq,
                expected.channel_names.len(),
                expected.n_times,
                expected.sfreq
            ))),
            Some(_) => Ok(rec),
            None => {
                *layout = Some(this);
                Ok(rec)
            }
        }
    }

    fn assemble_paradigm_folders(&self, root: &Path) -> Result<Dataset> {
        let paradigm_dirs = sorted_dirs(root)?;
        if paradigm_dirs.len() < 2 {
            return Err(DecoderError::AssemblyError(format!(
                "{} needs at least two paradigm folders, found {}",
                root.display(),
                paradigm_dirs.len()
            )));
        }
        if let Some(ids) = &self.config.event_ids {
            if ids.len() != paradigm_dirs.len() {
                return Err(DecoderError::AssemblyError(format!(
                    "{} event ids given for {} paradigms",
                    ids.len(),
                    paradigm_dirs.len()
                )));
            }
        }
        let class_names: Vec<String> = paradigm_dirs.iter().map(|d| subject_name(d)).collect();

        let sources: Vec<Vec<SubjectSource>> = paradigm_dirs
            .iter()
            .map(|d| self.subject_sources(d))
            .collect::<Result<_>>()?;
        let available = sources.iter().map(|s| s.len()).max().unwrap_or(0);
        let n_subjects = self.config.max_subjects.map_or(available, |m| m.min(available));
        if n_subjects == 0 {
            return Err(DecoderError::AssemblyError(format!(
                "no readable recordings under {}",
                root.display()
            )));
        }

        let mut layout = None;
        let mut subjects = Vec::with_capacity(n_subjects);
        for subject_idx in 0..n_subjects {
            let mut per_class = Vec::with_capacity(class_names.len());
            let mut name = None;
            for (label, paradigm) in sources.iter().enumerate() {
                let source = paradigm.get(subject_idx).ok_or_else(|| {
                    DecoderError::AssemblyError(format!(
                        "subject {} has no epochs for paradigm {}",
                        subject_idx, class_names[label]
                    ))
                })?;
                name.get_or_insert_with(|| source.name.clone());

                let event_ids = self.config.event_ids.as_ref().map(|ids| vec![ids[label]]);
                let options = self.config.read_options(event_ids);
                let mut parts = Vec::with_capacity(source.files.len());
                for file in &source.files {
                    parts.push(self.read_checked(file, &options, &mut layout)?.data);
                }
                let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
                per_class.push(concatenate(Axis(0), &views)?);
            }
            let name = name.unwrap_or_else(|| format!("subject_{}", subject_idx));
            subjects.push(build_subject(name, per_class, &class_names)?);
        }

        finish(subjects, layout, class_names)
    }

    fn assemble_one_file_per_subject(&self, root: &Path) -> Result<Dataset> {
        let mut files = self.subject_files(root)?;
        if let Some(max) = self.config.max_subjects {
            files.truncate(max);
        }
        if files.is_empty() {
            return Err(DecoderError::AssemblyError(format!(
                "no readable recordings under {}",
                root.display()
            )));
        }

        let options = self.config.read_options(self.config.event_ids.clone());
        let mut layout = None;
        let mut recordings: Vec<(String, Recording)> = Vec::with_capacity(files.len());
        for file in &files {
            recordings.push((subject_name(file), self.read_checked(file, &options, &mut layout)?));
        }

        let codes: Vec<i64> = match &self.config.event_ids {
            Some(ids) => ids.clone(),
            None => recordings
                .iter()
                .flat_map(|(_, r)| r.events.iter().copied())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        };
        if codes.len() < 2 {
            return Err(DecoderError::AssemblyError(format!(
                "need at least two event types, found {:?}",
                codes
            )));
        }
        let class_names: Vec<String> = codes
            .iter()
            .map(|code| {
                recordings
                    .iter()
                    .find_map(|(_, r)| r.event_names.get(code).cloned())
                    .unwrap_or_else(|| code.to_string())
            })
            .collect();

        let mut subjects = Vec::with_capacity(recordings.len());
        for (name, rec) in recordings {
            let per_class: Vec<Array3<f64>> = codes
                .iter()
                .map(|code| {
                    let idx: Vec<usize> = (0..rec.events.len()).filter(|&i| rec.events[i] == *code).collect();
                    rec.data.select(Axis(0), &idx)
                })
                .collect();
            subjects.push(build_subject(name, per_class, &class_names)?);
        }

        finish(subjects, layout, class_names)
    }
}

/// Truncate every class to the size of the smallest one, keeping the first
/// epochs of each.
pub fn truncate_to_smallest(per_class: &mut [Array3<f64>]) {
    let smallest = per_class.iter().map(|a| a.shape()[0]).min().unwrap_or(0);
    for part in per_class.iter_mut() {
        if part.shape()[0] > smallest {
            *part = part.slice(s![..smallest, .., ..]).to_owned();
        }
    }
}

fn build_subject(name: String, mut per_class: Vec<Array3<f64>>, class_names: &[String]) -> Result<SubjectData> {
    for (label, part) in per_class.iter().enumerate() {
        if part.shape()[0] == 0 {
            return Err(DecoderError::AssemblyError(format!(
                "subject {} has no epochs for class {}",
                name, class_names[label]
            )));
        }
    }

    if per_class.len() == 2 {
        truncate_to_smallest(&mut per_class);
    } else {
        warn!(
            subject = %name,
            classes = per_class.len(),
            "Class balancing is only defined for two classes, keeping every epoch"
        );
    }

    let labels: Array1<usize> = per_class
        .iter()
        .enumerate()
        .flat_map(|(label, part)| std::iter::repeat(label).take(part.shape()[0]))
        .collect();
    let views: Vec<_> = per_class.iter().map(|p| p.view()).collect();
    let epochs = concatenate(Axis(0), &views)?;
    SubjectData::new(name, epochs, labels)
}

fn finish(subjects: Vec<SubjectData>, layout: Option<Layout>, class_names: Vec<String>) -> Result<Dataset> {
    let layout = layout.ok_or_else(|| DecoderError::AssemblyError("no recordings were read".to_string()))?;
    Dataset::new(subjects, layout.channel_names, class_names, layout.sfreq)
        .map_err(|e| DecoderError::AssemblyError(e.to_string()))
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| DecoderError::AssemblyError(format!("cannot read {}: {}", dir.display(), e)))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        if !hidden {
            paths.push(path);
        }
    }
    Ok(paths)
}

fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = read_dir(dir)?.into_iter().filter(|p| p.is_dir()).collect();
    dirs.sort();
    Ok(dirs)
}

fn subject_name(path: &Path) -> String {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.strip_suffix(JsonEpochReader::EXTENSION).unwrap_or(name).to_string()
}
