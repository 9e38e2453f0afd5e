use serde::{Deserialize, Serialize};

use super::features::{rms, zero_crossings};
use super::spectrum::{FrequencyFrame, SpectralAnalyzer};
use super::vad::VadSegment;
use crate::error::{AnalysisError, Result};
use crate::music::note::{Note, NoteMapper};

const ENERGY_FLOOR: f32 = 0.01;
const SILENCE_ENERGY: f32 = 0.005;
const BREATH_ENERGY: f32 = 0.03;
// Crossings per sample above which a quiet syllable reads as breath
const BREATH_ZCR: f32 = 0.25;
const NOISE_CONFIDENCE: f32 = 0.15;
const TRANSITION_CONFIDENCE: f32 = 0.35;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    pub window_size: usize,
    pub overlap: f32,
    /// Relative frame-to-frame RMS change that places a boundary
    pub energy_change_threshold: f32,
    /// `1 - cosine similarity` between consecutive spectra that places a boundary
    pub spectral_change_threshold: f32,
    /// Seconds
    pub min_syllable_duration: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            window_size: 2048,
            overlap: 0.5,
            energy_change_threshold: 0.5,
            spectral_change_threshold: 0.35,
            min_syllable_duration: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Speech,
    Silence,
    Noise,
    Breath,
    Transition,
}

impl SegmentKind {
    fn classify(energy: f32, zcr: f32, confidence: f32) -> Self {
        if energy < SILENCE_ENERGY {
            SegmentKind::Silence
        } else if energy < BREATH_ENERGY && zcr > BREATH_ZCR {
            SegmentKind::Breath
        } else if confidence < NOISE_CONFIDENCE {
            SegmentKind::Noise
        } else if confidence < TRANSITION_CONFIDENCE {
            SegmentKind::Transition
        } else {
            SegmentKind::Speech
        }
    }
}

/// One syllable-sized slice of a speech segment with its dominant spectrum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyllableSegment {
    pub index: usize,
    pub start_time: f32,
    pub end_time: f32,
    /// Frame with the strongest spectral peak inside the syllable
    #[serde(skip_serializing)]
    pub frame: FrequencyFrame,
    pub note: Option<Note>,
    /// Mean frame RMS, 0.0-1.0
    pub energy: f32,
    /// Tonal confidence of `frame`, 0.0-1.0
    pub confidence: f32,
    pub kind: SegmentKind,
}

impl SyllableSegment {
    pub fn duration(&self) -> f32 {
        self.end_time - self.start_time
    }

    pub fn with_note(self, note: Option<Note>) -> Self {
        Self { note, ..self }
    }

    pub fn with_index(self, index: usize) -> Self {
        Self { index, ..self }
    }
}

/// Per-frame measurements of one speech segment.
struct FrameStats {
    time: f32,
    energy: f32,
    zcr: f32,
    frame: FrequencyFrame,
}

#[derive(Debug, Clone)]
pub struct SyllableSegmenter {
    config: SegmenterConfig,
    analyzer: SpectralAnalyzer,
}

impl SyllableSegmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        if !(config.min_syllable_duration > 0.0) {
            return Err(AnalysisError::InvalidAudioData(format!(
                "minimum syllable duration must be positive, got {}",
                config.min_syllable_duration
            )));
        }
        let analyzer = SpectralAnalyzer::new(config.window_size, config.overlap)?;
        Ok(Self { config, analyzer })
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Splits every speech segment of `vad_segments` into syllables. Segments
    /// shorter than the minimum syllable duration are skipped.
    pub fn segment(
        &self,
        samples: &[f32],
        sample_rate: f32,
        vad_segments: &[VadSegment],
    ) -> Result<Vec<SyllableSegment>> {
        if samples.is_empty() {
            return Err(AnalysisError::InvalidAudioData("no samples".into()));
        }
        if !(sample_rate > 0.0) || !sample_rate.is_finite() {
            return Err(AnalysisError::InvalidAudioData(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }

        let mut syllables = Vec::new();
        for segment in vad_segments.iter().filter(|s| s.is_speech) {
            if segment.duration() < self.config.min_syllable_duration {
                log::trace!(
                    "Skipping {:.3}s speech segment at {:.3}s",
                    segment.duration(),
                    segment.start_time
                );
                continue;
            }
            let start = ((segment.start_time * sample_rate).round() as usize).min(samples.len());
            let end = ((segment.end_time * sample_rate).round() as usize).min(samples.len());
            if end <= start {
                continue;
            }
            self.segment_span(&samples[start..end], sample_rate, segment, &mut syllables)?;
        }

        log::debug!(
            "Segmenter: {} syllables from {} speech segments",
            syllables.len(),
            vad_segments.iter().filter(|s| s.is_speech).count()
        );
        Ok(syllables)
    }

    fn segment_span(
        &self,
        span: &[f32],
        sample_rate: f32,
        segment: &VadSegment,
        out: &mut Vec<SyllableSegment>,
    ) -> Result<()> {
        let window = self.analyzer.window_size();
        let stats: Vec<FrameStats> = self
            .analyzer
            .analyze_segments(span, sample_rate)?
            .map(|frame| {
                let offset = (frame.timestamp() * sample_rate).round() as usize;
                let raw = &span[offset.min(span.len())..(offset + window).min(span.len())];
                // Frames come back relative to the span
                let time = segment.start_time + frame.timestamp();
                FrameStats {
                    time,
                    energy: rms(raw).clamp(0.0, 1.0),
                    zcr: zero_crossings(raw) as f32 / raw.len().max(1) as f32,
                    frame: frame.with_timestamp(time),
                }
            })
            .collect();

        let boundaries = self.boundaries(&stats, segment);
        for pair in boundaries.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let inside: Vec<&FrameStats> = stats
                .iter()
                .filter(|s| s.time >= from && s.time < to)
                .collect();

            let syllable = if inside.is_empty() {
                // Hop longer than the syllable: analyse its samples directly
                let a = (((from - segment.start_time) * sample_rate).round() as usize).min(span.len());
                let b = (((to - segment.start_time) * sample_rate).round() as usize).min(span.len());
                let raw = &span[a..b.max(a)];
                if raw.is_empty() {
                    continue;
                }
                let frame = self.analyzer.analyze(raw, sample_rate)?.with_timestamp(from);
                let energy = rms(raw).clamp(0.0, 1.0);
                let zcr = zero_crossings(raw) as f32 / raw.len() as f32;
                build(out.len(), from, to, frame, energy, zcr)
            } else {
                let n = inside.len() as f32;
                let energy = inside.iter().map(|s| s.energy).sum::<f32>() / n;
                let zcr = inside.iter().map(|s| s.zcr).sum::<f32>() / n;
                let dominant = inside
                    .iter()
                    .max_by(|a, b| a.frame.peak_magnitude().total_cmp(&b.frame.peak_magnitude()))
                    .map(|s| s.frame.clone());
                let Some(frame) = dominant else {
                    continue;
                };
                build(out.len(), from, to, frame, energy, zcr)
            };
            out.push(syllable);
        }
        Ok(())
    }

    /// Boundary times including the segment's own start and end.
    fn boundaries(&self, stats: &[FrameStats], segment: &VadSegment) -> Vec<f32> {
        let min = self.config.min_syllable_duration;
        let mut boundaries = vec![segment.start_time];
        for i in 1..stats.len() {
            let (prev, cur) = (&stats[i - 1], &stats[i]);
            let energy_change = (cur.energy - prev.energy).abs() / prev.energy.max(ENERGY_FLOOR);
            // Spectral shape is meaningless for silent frames
            let spectral_change = if prev.energy < SILENCE_ENERGY || cur.energy < SILENCE_ENERGY {
                0.0
            } else {
                1.0 - cur.frame.cosine_similarity(&prev.frame)
            };
            if energy_change < self.config.energy_change_threshold
                && spectral_change < self.config.spectral_change_threshold
            {
                continue;
            }
            let last = boundaries[boundaries.len() - 1];
            if cur.time - last >= min && segment.end_time - cur.time >= min {
                boundaries.push(cur.time);
            }
        }
        boundaries.push(segment.end_time);
        boundaries
    }
}

fn build(index: usize, start: f32, end: f32, frame: FrequencyFrame, energy: f32, zcr: f32) -> SyllableSegment {
    let confidence = NoteMapper::confidence(&frame);
    SyllableSegment {
        index,
        start_time: start,
        end_time: end,
        frame,
        note: None,
        energy,
        confidence,
        kind: SegmentKind::classify(energy, zcr, confidence),
    }
}
