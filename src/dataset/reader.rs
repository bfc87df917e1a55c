//! Reading epoched recordings from disk

use super::preprocess::{self, Baseline, Reference};
use crate::error::{DecoderError, Result};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Epoched recording of one file
#[derive(Debug, Clone)]
pub struct Recording {
    /// `(epochs, channels, times)`
    pub data: Array3<f64>,
    /// Event code of every epoch
    pub events: Vec<i64>,
    pub channel_names: Vec<String>,
    pub sfreq: f64,
    /// Time of the first sample relative to the event, in seconds
    pub tmin: f64,
    /// Pass band already applied to the data, if known
    pub highpass: Option<f64>,
    pub lowpass: Option<f64>,
    /// Optional names for event codes
    pub event_names: BTreeMap<i64, String>,
}

impl Recording {
    pub fn n_epochs(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn n_times(&self) -> usize {
        self.data.shape()[2]
    }
}

/// Parameters applied while reading a recording
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    pub tmin: Option<f64>,
    pub tmax: Option<f64>,
    pub picks: Option<Vec<String>>,
    pub bads: Vec<String>,
    /// `(l_freq, h_freq)`; a missing edge keeps the recording's own band
    pub filter_band: (Option<f64>, Option<f64>),
    /// Target sampling frequency (integer division of the original)
    pub resample: Option<f64>,
    pub baseline: Option<Baseline>,
    /// Event codes to keep
    pub event_ids: Option<Vec<i64>>,
    pub reference: Option<Reference>,
}

impl ReadOptions {
    /// Apply every option in order: events, channels, reference, filter,
    /// crop, resample, baseline.
    pub fn apply(&self, rec: &mut Recording) -> Result<()> {
        if let Some(codes) = &self.event_ids {
            preprocess::select_events(rec, codes);
        }
        preprocess::pick_channels(rec, self.picks.as_deref(), &self.bads)?;
        if let Some(reference) = &self.reference {
            preprocess::rereference(rec, reference)?;
        }
        let (l_freq, h_freq) = self.filter_band;
        preprocess::bandpass(rec, l_freq, h_freq)?;
        if self.tmin.is_some() || self.tmax.is_some() {
            preprocess::crop(rec, self.tmin, self.tmax)?;
        }
        if let Some(target) = self.resample {
            preprocess::resample(rec, target)?;
        }
        if let Some(baseline) = self.baseline {
            preprocess::apply_baseline(rec, baseline)?;
        }
        Ok(())
    }
}

/// Source of epoched recordings
pub trait RecordingReader: Send + Sync {
    /// Whether this reader understands `path`.
    fn accepts(&self, path: &Path) -> bool;

    /// Read `path` and apply `options`.
    fn read(&self, path: &Path, options: &ReadOptions) -> Result<Recording>;
}

#[derive(Debug, Serialize, Deserialize)]
struct EpochFile {
    sfreq: f64,
    #[serde(default)]
    tmin: f64,
    channels: Vec<String>,
    #[serde(default)]
    highpass: Option<f64>,
    #[serde(default)]
    lowpass: Option<f64>,
    #[serde(default)]
    event_id: BTreeMap<String, i64>,
    events: Vec<i64>,
    /// `[epoch][channel][time]`
    data: Vec<Vec<Vec<f64>>>,
}

/// Reader for `*.epochs.json` files
#[derive(Debug, Clone, Default)]
pub struct JsonEpochReader;

impl JsonEpochReader {
    pub const EXTENSION: &'static str = ".epochs.json";

    pub fn new() -> Self {
        Self
    }

    fn parse(path: &Path) -> Result<Recording> {
        let text = fs::read_to_string(path)?;
        let file: EpochFile = serde_json::from_str(&text).map_err(|e| {
            DecoderError::AssemblyError(format!("{}: {}", path.display(), e))
        })?;

        let n_epochs = file.data.len();
        let n_channels = file.channels.len();
        let n_times = file.data.first().and_then(|e| e.first()).map_or(0, |c| c.len());
        if file.events.len() != n_epochs {
            return Err(DecoderError::AssemblyError(format!(
                "{}: {} events for {} epochs",
                path.display(),
                file.events.len(),
                n_epochs
            )));
        }
        if file.sfreq <= 0.0 {
            return Err(DecoderError::AssemblyError(format!(
                "{}: sampling frequency must be positive",
                path.display()
            )));
        }

        let mut flat = Vec::with_capacity(n_epochs * n_channels * n_times);
        for (e, epoch) in file.data.iter().enumerate() {
            if epoch.len() != n_channels || epoch.iter().any(|c| c.len() != n_times) {
                return Err(DecoderError::AssemblyError(format!(
                    "{}: epoch {} is not {} channels x {} samples",
                    path.display(),
                    e,
                    n_channels,
                    n_times
                )));
            }
            for channel in epoch {
                flat.extend_from_slice(channel);
            }
        }
        let data = Array3::from_shape_vec((n_epochs, n_channels, n_times), flat)?;

        Ok(Recording {
            data,
            events: file.events,
            channel_names: file.channels,
            sfreq: file.sfreq,
            tmin: file.tmin,
            highpass: file.highpass,
            lowpass: file.lowpass,
            event_names: file.event_id.into_iter().map(|(name, code)| (code, name)).collect(),
        })
    }

    /// Write a recording in the format [`JsonEpochReader`] reads.
    pub fn write(path: &Path, rec: &Recording) -> Result<()> {
        let file = EpochFile {
            sfreq: rec.sfreq,
            tmin: rec.tmin,
            channels: rec.channel_names.clone(),
            highpass: rec.highpass,
            lowpass: rec.lowpass,
            event_id: rec.event_names.iter().map(|(code, name)| (name.clone(), *code)).collect(),
            events: rec.events.clone(),
            data: rec
                .data
                .outer_iter()
                .map(|epoch| epoch.outer_iter().map(|c| c.to_vec()).collect())
                .collect(),
        };
        fs::write(path, serde_json::to_string(&file)?)?;
        Ok(())
    }
}

impl RecordingReader for JsonEpochReader {
    fn accepts(&self, path: &Path) -> bool {
        path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(Self::EXTENSION))
    }

    fn read(&self, path: &Path, options: &ReadOptions) -> Result<Recording> {
        let mut rec = Self::parse(path)?;
        options.apply(&mut rec).map_err(|e| match e {
            DecoderError::AssemblyError(msg) => {
                DecoderError::AssemblyError(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        debug!(
            file = %path.display(),
            epochs = rec.n_epochs(),
            channels = rec.channel_names.len(),
            times = rec.n_times(),
            "Read recording"
        );
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Recording {
        Recording {
            data: Array3::from_shape_fn((3, 2, 10), |(e, c, t)| (e * 100 + c * 10 + t) as f64),
            events: vec![1, 2, 1],
            channel_names: vec!["C3".into(), "C4".into()],
            sfreq: 10.0,
            tmin: -0.2,
            highpass: None,
            lowpass: None,
            event_names: [(1, "left".to_string()), (2, "right".to_string())].into_iter().collect(),
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s01.epochs.json");
        JsonEpochReader::write(&path, &sample()).unwrap();

        let reader = JsonEpochReader::new();
        assert!(reader.accepts(&path));
        let rec = reader.read(&path, &ReadOptions::default()).unwrap();
        assert_eq!(rec.data, sample().data);
        assert_eq!(rec.event_names[&2], "right");
        assert!((rec.tmin + 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_options_select_and_crop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s01.epochs.json");
        JsonEpochReader::write(&path, &sample()).unwrap();

        let options = ReadOptions {
            event_ids: Some(vec![1]),
            tmin: Some(0.0),
            tmax: Some(0.4),
            picks: Some(vec!["C4".into()]),
            ..Default::default()
        };
        let rec = JsonEpochReader::new().read(&path, &options).unwrap();
        assert_eq!(rec.data.shape(), &[2, 1, 5]);
        assert_eq!(rec.data[[1, 0, 0]], 212.0);
    }

    #[test]
    fn test_malformed_file_is_assembly_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.epochs.json");
        std::fs::write(&path, r#"{"sfreq": 10, "channels": ["a"], "events": [1, 2], "data": [[[1.0]]]}"#)
            .unwrap();
        let err = JsonEpochReader::new().read(&path, &ReadOptions::default()).unwrap_err();
        assert!(matches!(err, DecoderError::AssemblyError(_)));
        assert!(!JsonEpochReader::new().accepts(&dir.path().join("notes.txt")));
    }
}
