use serde::{Deserialize, Serialize};

use crate::audio::syllable::SyllableSegment;

// Stage 2 denominator floor for near-silent previous segments
const ENERGY_FLOOR: f32 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityFilterConfig {
    pub min_confidence: f32,
    pub min_energy: f32,
    /// Seconds
    pub min_duration: f32,
    /// Seconds
    pub max_duration: f32,
    pub energy_change_ratio: f32,
    pub min_pitch_change_semitones: u8,
    pub min_frequency_change_hz: f32,
}

impl Default for QualityFilterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            min_energy: 0.08,
            min_duration: 0.2,
            max_duration: 1.0,
            energy_change_ratio: 0.5,
            min_pitch_change_semitones: 3,
            min_frequency_change_hz: 100.0,
        }
    }
}

/// Stage 1: confidence, energy and duration bounds; a note is required.
pub fn basic_thresholds(segments: Vec<SyllableSegment>, config: &QualityFilterConfig) -> Vec<SyllableSegment> {
    segments
        .into_iter()
        .filter(|s| {
            s.confidence > config.min_confidence
                && s.energy > config.min_energy
                && s.duration() >= config.min_duration
                && s.duration() <= config.max_duration
                && s.note.is_some()
        })
        .collect()
}

/// Stage 2: after the first, keep a segment only when its energy or pitch
/// moved far enough from the last kept one.
pub fn energy_change(segments: Vec<SyllableSegment>, config: &QualityFilterConfig) -> Vec<SyllableSegment> {
    let mut kept: Vec<SyllableSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        let keep = match kept.last() {
            None => true,
            Some(previous) => {
                let relative = (segment.energy - previous.energy).abs() / previous.energy.max(ENERGY_FLOOR);
                let pitch_moved = match (&segment.note, &previous.note) {
                    (Some(note), Some(prev)) => {
                        note.semitones_from(prev).unsigned_abs() >= config.min_pitch_change_semitones as u32
                    }
                    _ => false,
                };
                relative >= config.energy_change_ratio || pitch_moved
            }
        };
        if keep {
            kept.push(segment);
        }
    }
    kept
}

/// Stage 3: drop segments whose note sits within `min_frequency_change_hz`
/// of the last kept note. Segments without a note pass.
pub fn frequency_change(segments: Vec<SyllableSegment>, config: &QualityFilterConfig) -> Vec<SyllableSegment> {
    let mut kept: Vec<SyllableSegment> = Vec::with_capacity(segments.len());
    let mut last_frequency: Option<f32> = None;
    for segment in segments {
        let frequency = segment.note.as_ref().map(|n| n.frequency);
        match (frequency, last_frequency) {
            (None, _) => kept.push(segment),
            (Some(f), Some(previous)) if (f - previous).abs() < config.min_frequency_change_hz => {}
            (Some(f), _) => {
                last_frequency = Some(f);
                kept.push(segment);
            }
        }
    }
    kept
}

/// Stage 4: keep segments at or above `mean + stddev` of the energies.
pub fn noise_floor(segments: Vec<SyllableSegment>) -> Vec<SyllableSegment> {
    if segments.is_empty() {
        return segments;
    }
    let n = segments.len() as f32;
    let mean = segments.iter().map(|s| s.energy).sum::<f32>() / n;
    let variance = segments.iter().map(|s| (s.energy - mean).powi(2)).sum::<f32>() / n;
    let floor = mean + variance.sqrt();
    segments
        .into_iter()
        .filter(|s| s.energy >= floor - 1e-6)
        .collect()
}

/// Four-stage statistical cleanup of a syllable stream, re-indexed from 0.
#[derive(Debug, Clone, Default)]
pub struct QualityFilter {
    config: QualityFilterConfig,
}

impl QualityFilter {
    pub fn new(config: QualityFilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityFilterConfig {
        &self.config
    }

    pub fn apply(&self, segments: Vec<SyllableSegment>) -> Vec<SyllableSegment> {
        let input = segments.len();
        let stage1 = basic_thresholds(segments, &self.config);
        let after_basic = stage1.len();
        let stage2 = energy_change(stage1, &self.config);
        let after_energy = stage2.len();
        let stage3 = frequency_change(stage2, &self.config);
        let after_frequency = stage3.len();
        let stage4 = noise_floor(stage3);

        log::debug!(
            "Quality filter: {} -> {} (basic) -> {} (energy) -> {} (frequency) -> {} (noise floor)",
            input,
            after_basic,
            after_energy,
            after_frequency,
            stage4.len()
        );

        stage4
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.with_index(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::spectrum::FrequencyFrame;
    use crate::audio::syllable::SegmentKind;
    use crate::music::note::NoteMapper;

    fn syllable(index: usize, midi: Option<u8>, energy: f32, confidence: f32, duration: f32) -> SyllableSegment {
        let start = index as f32;
        SyllableSegment {
            index,
            start_time: start,
            end_time: start + duration,
            frame: FrequencyFrame::new(vec![0.0, 21.5], vec![0.0, 1.0], 44100.0, 2048, start).unwrap(),
            note: midi.and_then(|m| NoteMapper::default().from_midi(m)),
            energy,
            confidence,
            kind: SegmentKind::Speech,
        }
    }

    fn midis(segments: &[SyllableSegment]) -> Vec<Option<u8>> {
        segments.iter().map(|s| s.note.as_ref().map(|n| n.midi_number)).collect()
    }

    #[test]
    fn test_basic_thresholds() {
        let config = QualityFilterConfig::default();
        let segments = vec![
            syllable(0, Some(60), 0.3, 0.9, 0.5),
            syllable(1, Some(60), 0.3, 0.6, 0.5),  // confidence not above 0.6
            syllable(2, Some(60), 0.08, 0.9, 0.5), // energy not above 0.08
            syllable(3, Some(60), 0.3, 0.9, 0.1),  // too short
            syllable(4, Some(60), 0.3, 0.9, 1.5),  // too long
            syllable(5, None, 0.3, 0.9, 0.5),
            syllable(6, Some(72), 0.3, 0.9, 0.2),
            syllable(7, Some(72), 0.3, 0.9, 1.0),
        ];
        let kept = basic_thresholds(segments, &config);
        assert_eq!(kept.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 6, 7]);
    }

    #[test]
    fn test_energy_change_compares_with_last_kept() {
        let config = QualityFilterConfig::default();
        let segments = vec![
            syllable(0, Some(60), 0.2, 0.9, 0.5),
            syllable(1, Some(61), 0.25, 0.9, 0.5), // small change in both
            syllable(2, Some(61), 0.35, 0.9, 0.5), // +75% vs the first
            syllable(3, Some(65), 0.35, 0.9, 0.5), // +4 semitones
            syllable(4, Some(66), 0.4, 0.9, 0.5),
        ];
        let kept = energy_change(segments, &config);
        assert_eq!(kept.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 2, 3]);
    }

    #[test]
    fn test_energy_change_floors_quiet_previous() {
        let config = QualityFilterConfig {
            min_energy: 0.0,
            ..QualityFilterConfig::default()
        };
        // 0.004 / max(0.005, 0.01) = 0.4, under the 0.5 ratio
        let segments = vec![
            syllable(0, Some(60), 0.005, 0.9, 0.5),
            syllable(1, Some(60), 0.009, 0.9, 0.5),
            syllable(2, Some(60), 0.02, 0.9, 0.5),
        ];
        let kept = energy_change(segments, &config);
        assert_eq!(kept.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_frequency_change() {
        let config = QualityFilterConfig::default();
        // A4 440, A#4 466, E5 659, F5 698, A5 880
        let segments = vec![
            syllable(0, Some(69), 0.3, 0.9, 0.5),
            syllable(1, Some(70), 0.3, 0.9, 0.5),
            syllable(2, None, 0.3, 0.9, 0.5),
            syllable(3, Some(76), 0.3, 0.9, 0.5),
            syllable(4, Some(77), 0.3, 0.9, 0.5),
            syllable(5, Some(81), 0.3, 0.9, 0.5),
        ];
        let kept = frequency_change(segments, &config);
        assert_eq!(midis(&kept), vec![Some(69), None, Some(76), Some(81)]);
    }

    #[test]
    fn test_noise_floor_uses_population_stddev() {
        // mean 0.5, population stddev 0.5 / sqrt(2) ≈ 0.354 -> floor ≈ 0.854
        let segments = vec![
            syllable(0, Some(60), 0.0, 0.9, 0.5),
            syllable(1, Some(62), 0.5, 0.9, 0.5),
            syllable(2, Some(64), 1.0, 0.9, 0.5),
            syllable(3, Some(65), 0.5, 0.9, 0.5),
        ];
        let kept = noise_floor(segments);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].index, 2);

        let equal = vec![
            syllable(0, Some(60), 0.3, 0.9, 0.5),
            syllable(1, Some(62), 0.3, 0.9, 0.5),
        ];
        assert_eq!(noise_floor(equal).len(), 2);
        assert!(noise_floor(Vec::new()).is_empty());
    }

    #[test]
    fn test_apply_reindexes() {
        let filter = QualityFilter::default();
        let segments = vec![
            syllable(0, Some(60), 0.05, 0.9, 0.5),
            syllable(1, Some(60), 0.3, 0.9, 0.5),
            syllable(2, Some(72), 0.3, 0.9, 0.5),
        ];
        let kept = filter.apply(segments);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(midis(&kept), vec![Some(60), Some(72)]);
        assert!(filter.apply(Vec::new()).is_empty());
    }
}
