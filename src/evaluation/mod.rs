//! Cross-validated evaluation
//!
//! Splitters, the per-pipeline prediction tracker, the [`Decoder`] run state
//! machine, final scoring and the files a run leaves behind.

pub mod cross_validation;
pub mod orchestrator;
pub mod report;
pub mod scorer;
pub mod tracker;

pub use cross_validation::{CVResults, CVSplit, CVStrategy, CrossValidator, DEFAULT_RANDOM_STATE};
pub use orchestrator::{Decoder, RemovedPipeline, RunReport, RunStage, SkippedStep};
pub use report::{PredictionArtifact, RunLog};
pub use scorer::{RocCurve, Scorecard, Scorer};
pub use tracker::{PipelineState, PredictionTracker};
