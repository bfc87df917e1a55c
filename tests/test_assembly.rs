//! Integration tests for dataset assembly from on-disk recordings

use epoch_decoder::dataset::{
    AssemblyConfig, DatasetAssembler, DatasetLayout, JsonEpochReader, Recording,
};
use epoch_decoder::evaluation::report::{PredictionArtifact, PREDICTIONS_FILE, RUN_LOG_FILE};
use epoch_decoder::prelude::*;
use ndarray::Array3;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const CHANNELS: [&str; 3] = ["C3", "Cz", "C4"];

/// `n` epochs of one event code; the epoch index is stored in every sample
/// of channel 1 so truncation order can be checked.
fn recording(events: Vec<i64>, amplitude: f64) -> Recording {
    let n = events.len();
    let data = Array3::from_shape_fn((n, 3, 40), |(e, c, t)| {
        if c == 1 {
            e as f64
        } else {
            amplitude * ((t as f64) * 0.4 + e as f64 * 1.3 + c as f64).sin()
        }
    });
    Recording {
        data,
        events,
        channel_names: CHANNELS.iter().map(|c| c.to_string()).collect(),
        sfreq: 100.0,
        tmin: 0.0,
        highpass: None,
        lowpass: None,
        event_names: BTreeMap::from([(1, "left".to_string()), (2, "right".to_string())]),
    }
}

fn write(path: &Path, rec: &Recording) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    JsonEpochReader::write(path, rec).unwrap();
}

/// `root/{left,right}/sNN.epochs.json`
fn paradigm_dataset(root: &Path, counts: &[(usize, usize)]) {
    for (s, &(left, right)) in counts.iter().enumerate() {
        write(&root.join("left").join(format!("s{:02}.epochs.json", s)), &recording(vec![1; left], 1.0));
        write(&root.join("right").join(format!("s{:02}.epochs.json", s)), &recording(vec![2; right], 3.0));
    }
}

#[test]
fn test_two_paradigms_are_truncated_per_subject() {
    let dir = tempdir().unwrap();
    paradigm_dataset(dir.path(), &[(7, 10), (9, 9)]);

    let dataset = DatasetAssembler::new(AssemblyConfig::default()).assemble(dir.path()).unwrap();
    assert_eq!(dataset.class_names, vec!["left", "right"]);
    assert_eq!(dataset.n_subjects(), 2);
    assert_eq!(dataset.subjects[0].n_epochs(), 14);
    assert_eq!(dataset.subjects[1].n_epochs(), 18);

    let first = &dataset.subjects[0];
    let labels: Vec<usize> = first.labels.to_vec();
    assert_eq!(labels, [vec![0; 7], vec![1; 7]].concat());
    // The first 7 right-hand epochs are kept, in order.
    let kept: Vec<f64> = (7..14).map(|e| first.epochs[[e, 1, 0]]).collect();
    assert_eq!(kept, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    let groups = dataset.groups();
    assert_eq!(groups.len(), 32);
    assert_eq!(groups.iter().filter(|&&g| g == 1).count(), 18);
    assert_eq!(dataset.class_counts(), vec![16, 16]);
}

#[test]
fn test_subject_directory_files_are_concatenated() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(&root.join("left/s00/a.epochs.json"), &recording(vec![1; 3], 1.0));
    write(&root.join("left/s00/b.epochs.json"), &recording(vec![1; 2], 1.0));
    write(&root.join("right/s00.epochs.json"), &recording(vec![2; 5], 2.0));

    let assembler = DatasetAssembler::new(AssemblyConfig::default());
    assert_eq!(assembler.count_subjects(root).unwrap(), 1);
    let dataset = assembler.assemble(root).unwrap();
    assert_eq!(dataset.subjects[0].n_epochs(), 10);
    assert_eq!(dataset.subjects[0].epochs[[3, 1, 0]], 0.0);
}

#[test]
fn test_missing_subject_is_fatal() {
    let dir = tempdir().unwrap();
    paradigm_dataset(dir.path(), &[(5, 5)]);
    write(&dir.path().join("left/s01.epochs.json"), &recording(vec![1; 5], 1.0));

    let err = DatasetAssembler::new(AssemblyConfig::default()).assemble(dir.path()).unwrap_err();
    assert!(matches!(err, DecoderError::AssemblyError(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_zero_epoch_class_is_fatal() {
    let dir = tempdir().unwrap();
    paradigm_dataset(dir.path(), &[(5, 5)]);
    let config = AssemblyConfig::default().with_event_ids(vec![1, 7]);

    let err = DatasetAssembler::new(config).assemble(dir.path()).unwrap_err();
    assert!(matches!(err, DecoderError::AssemblyError(_)));
}

#[test]
fn test_one_file_per_subject() {
    let dir = tempdir().unwrap();
    for s in 0..3 {
        let events = vec![1, 2, 2, 1, 2, 1, 2, 2];
        write(&dir.path().join(format!("s{}.epochs.json", s)), &recording(events, 1.0));
    }
    let config = AssemblyConfig::default()
        .with_layout(DatasetLayout::OneFilePerSubject)
        .with_max_subjects(2);

    let dataset = DatasetAssembler::new(config).assemble(dir.path()).unwrap();
    assert_eq!(dataset.n_subjects(), 2);
    assert_eq!(dataset.class_names, vec!["left", "right"]);
    // 3 left and 5 right epochs, truncated to 3 each.
    assert_eq!(dataset.subjects[0].n_epochs(), 6);
}

#[test]
fn test_mismatched_channels_are_rejected() {
    let dir = tempdir().unwrap();
    paradigm_dataset(dir.path(), &[(4, 4)]);
    let mut odd = recording(vec![2; 4], 1.0);
    odd.channel_names[2] = "Pz".to_string();
    write(&dir.path().join("right/s00.epochs.json"), &odd);

    let err = DatasetAssembler::new(AssemblyConfig::default()).assemble(dir.path()).unwrap_err();
    assert!(matches!(err, DecoderError::AssemblyError(_)));
}

#[test]
fn test_run_path_writes_outputs() {
    let dir = tempdir().unwrap();
    paradigm_dataset(dir.path(), &[(10, 10), (10, 10)]);

    let config = RunConfig::new()
        .with_pipelines(vec!["LogVarNB".to_string(), "MDM".to_string()])
        .with_cv(CVStrategy::GroupKFold { n_splits: 2 });
    let mut decoder = Decoder::new(config).unwrap();
    let report = decoder.run_path(dir.path()).unwrap();

    assert_eq!(report.outputs.len(), 2);
    let log = fs::read_to_string(dir.path().join(RUN_LOG_FILE)).unwrap();
    assert!(log.contains("class counts : left: 20, right: 20"));
    assert!(log.contains("scores : {LogVarNB: "));

    let artifact = PredictionArtifact::load(&dir.path().join(PREDICTIONS_FILE)).unwrap();
    assert_eq!(artifact.predictions.keys().collect::<Vec<_>>(), vec!["LogVarNB", "MDM"]);
    assert_eq!(artifact.predictions["MDM"].len(), 40);
    assert_eq!(artifact.expected_answers.len(), 40);
}

#[test]
fn test_reused_decoder_writes_next_to_each_dataset() {
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();
    paradigm_dataset(first.path(), &[(10, 10), (10, 10)]);
    paradigm_dataset(second.path(), &[(6, 6), (6, 6)]);

    let config = RunConfig::new()
        .with_pipelines(vec!["MDM".to_string()])
        .with_cv(CVStrategy::GroupKFold { n_splits: 2 });
    let mut decoder = Decoder::new(config).unwrap();
    decoder.run_path(first.path()).unwrap();
    let report = decoder.run_path(second.path()).unwrap();

    assert!(decoder.config().output_dir.is_none());
    assert!(report.outputs.iter().all(|p| p.starts_with(second.path())));
    assert!(second.path().join(RUN_LOG_FILE).exists());

    let kept = PredictionArtifact::load(&first.path().join(PREDICTIONS_FILE)).unwrap();
    assert_eq!(kept.expected_answers.len(), 40);
    let latest = PredictionArtifact::load(&second.path().join(PREDICTIONS_FILE)).unwrap();
    assert_eq!(latest.expected_answers.len(), 24);
}
