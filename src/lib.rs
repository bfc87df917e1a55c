//! Epoch Decoder - cross-validated classification of labeled EEG epochs
//!
//! This crate evaluates a catalog of interchangeable classification pipelines
//! on a subject × epoch × channel × time dataset:
//! - Dataset assembly from per-paradigm or per-subject recordings
//! - A named pipeline catalog with grid / randomized search descriptors
//! - Optional channel selection and hyperparameter tuning
//! - Group-aware cross-validation with per-pipeline failure isolation
//! - Confusion matrices, accuracy, precision/recall and ROC/AUC per pipeline
//!
//! # Modules
//!
//! - [`dataset`] - Recordings, preprocessing and dataset assembly
//! - [`pipeline`] - The [`pipeline::Classifier`] capability, built-in pipelines, catalog
//! - [`selection`] - Staircase candidates and electrode selection
//! - [`tuning`] - Grid and randomized hyperparameter search
//! - [`evaluation`] - Splitters, the [`evaluation::Decoder`] run, scoring and reports
//! - [`cli`] - Command-line interface
//!
//! # Ordering
//!
//! Pipelines are always visited in byte-wise lexicographic order of their
//! names: tuning, every fold pass, scoring, the run log and the prediction
//! artifact all follow it.

// Core error handling
pub mod error;
pub mod config;

// Data
pub mod dataset;

// Models and search
pub mod pipeline;
pub mod selection;
pub mod tuning;

// Runs
pub mod evaluation;

// Utilities
pub mod utils;

// Services
pub mod cli;

pub use error::{DecoderError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{DecoderError, Result};

    // Configuration
    pub use crate::config::RunConfig;

    // Data
    pub use crate::dataset::{AssemblyConfig, Dataset, DatasetAssembler, DatasetLayout, SubjectData};

    // Pipelines
    pub use crate::pipeline::{
        BuiltinPipeline, Classifier, GridAxis, ParamValue, Params, PipelineCatalog, TuningMode, TuningSpec,
    };

    // Selection and tuning
    pub use crate::selection::{FeatureSelector, SelectionMode};
    pub use crate::tuning::HyperparameterTuner;

    // Evaluation
    pub use crate::evaluation::{CVStrategy, Decoder, RunReport, RunStage, Scorecard};
}
