use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vocalscale::audio::syllable::SegmenterConfig;
use vocalscale::audio::vad::VadConfig;
use vocalscale::music::quality::QualityFilterConfig;
use vocalscale::{AnalysisConfig, RecommendationConfig};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    #[serde(default)]
    pub quality: QualityFilterConfig,
    #[serde(default)]
    pub recommend: RecommendationConfig,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisSection {
    #[serde(default = "default_reference_a4")]
    pub reference_a4: f32,
    /// Seconds
    #[serde(default)]
    pub timeout: Option<f32>,
    /// Scale library TOML replacing the built-in table
    #[serde(default)]
    pub scales: Option<PathBuf>,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            reference_a4: default_reference_a4(),
            timeout: None,
            scales: None,
        }
    }
}

fn default_reference_a4() -> f32 { 440.0 }

impl Config {
    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            vad: self.vad.clone(),
            segmenter: self.segmenter.clone(),
            quality: self.quality.clone(),
            reference_a4: self.analysis.reference_a4,
            timeout: self.analysis.timeout.and_then(secs_to_duration),
        }
    }
}

/// `None` for negative or non-finite values.
pub fn secs_to_duration(secs: f32) -> Option<Duration> {
    Duration::try_from_secs_f32(secs).ok()
}

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    toml::from_str(&content)
        .map_err(|e| log::warn!("Invalid config {}: {}", path.display(), e))
        .ok()
}
