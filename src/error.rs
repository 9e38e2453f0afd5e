use std::time::Duration;

/// Errors surfaced by the analysis and recommendation pipeline.
///
/// Per-frame numerical problems never show up here: they degrade to zero or
/// absent values inside the frame and the stream keeps going.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("invalid audio data: {0}")]
    InvalidAudioData(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("analysis exceeded its time budget ({elapsed:?} > {budget:?})")]
    AnalysisTimeout { elapsed: Duration, budget: Duration },

    #[error("processing failed: {0}")]
    ProcessingFailed(String),

    #[error("analysis cancelled")]
    Cancelled,

    #[error("invalid scale library: {0}")]
    InvalidScaleLibrary(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
