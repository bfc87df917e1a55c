//! Error types for the epoch decoder

use thiserror::Error;

/// Result type alias for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Main error type for the decoder
#[derive(Error, Debug)]
pub enum DecoderError {
    /// A pipeline raised while being fitted or queried during a fold.
    /// Recoverable: the pipeline is dropped and the run continues.
    #[error("Pipeline '{name}' failed: {reason}")]
    PipelineFitError { name: String, reason: String },

    /// Missing events, a subject without epochs, or a malformed recording.
    #[error("Assembly error: {0}")]
    AssemblyError(String),

    /// Feature selection or hyperparameter tuning failed.
    #[error("Optimization error: {0}")]
    OptimizationError(String),

    /// Final scores could not be computed.
    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Pipeline {0} does not exist")]
    PipelineNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DecoderError {
    /// Fatal errors abort a run; everything else degrades it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DecoderError::AssemblyError(_) | DecoderError::AggregationError(_)
        )
    }
}

impl From<serde_json::Error> for DecoderError {
    fn from(err: serde_json::Error) -> Self {
        DecoderError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for DecoderError {
    fn from(err: ndarray::ShapeError) -> Self {
        DecoderError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
