//! Sung-note detection and scale recommendation.
//!
//! Samples flow through [`audio`] (spectrum, voice activity, syllables) into
//! [`music`] (notes, quality filtering, scale ranking). [`Analyzer`] runs the
//! whole batch pipeline; [`StreamingSession`] covers live input.

pub mod audio;
pub mod error;
pub mod music;

pub use audio::analysis::{AnalysisConfig, AnalysisReport, Analyzer, CancelToken, StreamingSession};
pub use error::{AnalysisError, Result};
pub use music::note::{Note, NoteMapper};
pub use music::recommend::{RecommendationConfig, ScaleRecommendationResult, ScaleRecommender};
pub use music::scale::{Genre, Mood, Scale, ScaleLibrary, ScaleType};
