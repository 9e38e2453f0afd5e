use serde::{Deserialize, Serialize};

use super::features::{FeatureExtractor, FrameFeatures};
use super::spectrum::SpectralAnalyzer;
use crate::error::{AnalysisError, Result};

// Weights of the energy / ZCR / flux terms in the speech score
const ENERGY_WEIGHT: f32 = 0.6;
const ZCR_WEIGHT: f32 = 0.2;
const FLUX_WEIGHT: f32 = 0.2;
const SPEECH_SCORE: f32 = 0.6;

// Frames under half the energy threshold are never raw speech
const ENERGY_GATE: f32 = 0.5;
// Frames louder than this many base thresholds don't feed the noise estimate
const NOISE_CEILING: f32 = 5.0;
const ADAPTIVE_MULTIPLIER: f32 = 3.0;
const HANGOVER_CONFIDENCE: f32 = 0.5;

const DURATION_EPSILON: f32 = 1e-6;

/// Voice activity detection settings. Thresholds are in the units of
/// [`FrameFeatures`]: normalized RMS, crossings per frame, summed flux.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub energy_threshold: f32,
    pub zcr_threshold: f32,
    pub spectral_flux_threshold: f32,
    /// Seconds
    pub min_speech_duration: f32,
    /// Seconds
    pub min_silence_duration: f32,
    /// Seconds a speech run is extended after the last speech frame
    pub hangover_time: f32,
    pub use_adaptive_threshold: bool,
    /// Seconds from the start of the recording used to learn the noise floor
    pub noise_estimation_time: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frame_size: 1024,
            hop_size: 512,
            energy_threshold: 0.01,
            zcr_threshold: 50.0,
            spectral_flux_threshold: 0.02,
            min_speech_duration: 0.1,
            min_silence_duration: 0.05,
            hangover_time: 0.1,
            use_adaptive_threshold: true,
            noise_estimation_time: 0.25,
        }
    }
}

impl VadConfig {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(AnalysisError::InvalidAudioData(msg));
        if self.sample_rate == 0 {
            return invalid("VAD sample rate must be positive".into());
        }
        if self.hop_size == 0 || self.hop_size > self.frame_size {
            return invalid(format!(
                "VAD hop size {} must be within 1..={}",
                self.hop_size, self.frame_size
            ));
        }
        if !(self.energy_threshold > 0.0)
            || !(self.zcr_threshold > 0.0)
            || !(self.spectral_flux_threshold > 0.0)
        {
            return invalid("VAD thresholds must be positive".into());
        }
        if self.min_speech_duration < 0.0
            || self.min_silence_duration < 0.0
            || self.hangover_time < 0.0
            || self.noise_estimation_time < 0.0
        {
            return invalid("VAD durations must not be negative".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VadFrameResult {
    pub energy_level: f32,
    pub zero_crossing_rate: f32,
    pub spectral_flux: f32,
    pub confidence: f32,
    pub is_speech: bool,
    pub frame_time: f32,
    pub frame_duration: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VadSegment {
    pub start_time: f32,
    pub end_time: f32,
    pub is_speech: bool,
    pub average_confidence: f32,
}

impl VadSegment {
    pub fn duration(&self) -> f32 {
        self.end_time - self.start_time
    }
}

/// Everything one detection step carries to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VadState {
    noise_energy_sum: f32,
    noise_flux_sum: f32,
    noise_frames: u32,
    /// Length of the current speech run, hangover frames excluded
    speech_run: f32,
    hangover_armed: bool,
    last_speech_end: Option<f32>,
}

impl VadState {
    pub fn noise_floor(&self) -> Option<(f32, f32)> {
        if self.noise_frames == 0 {
            None
        } else {
            let n = self.noise_frames as f32;
            Some((self.noise_energy_sum / n, self.noise_flux_sum / n))
        }
    }

    fn thresholds(&self, config: &VadConfig) -> (f32, f32) {
        match self.noise_floor() {
            Some((energy, flux)) if config.use_adaptive_threshold => (
                config.energy_threshold.max(energy * ADAPTIVE_MULTIPLIER),
                config.spectral_flux_threshold.max(flux * ADAPTIVE_MULTIPLIER),
            ),
            _ => (config.energy_threshold, config.spectral_flux_threshold),
        }
    }
}

/// One classification step: `(state, frame) -> (state', result)`.
pub fn step(config: &VadConfig, state: VadState, features: &FrameFeatures) -> (VadState, VadFrameResult) {
    let mut next = state;
    let (energy_threshold, flux_threshold) = state.thresholds(config);

    let energy_score = (features.energy / energy_threshold).clamp(0.0, 1.0);
    let zcr_score = (features.zero_crossing_rate / config.zcr_threshold).clamp(0.0, 1.0);
    let flux_score = (features.spectral_flux / flux_threshold).clamp(0.0, 1.0);
    let score = ENERGY_WEIGHT * energy_score + ZCR_WEIGHT * zcr_score + FLUX_WEIGHT * flux_score;

    let raw_speech = score >= SPEECH_SCORE && features.energy >= energy_threshold * ENERGY_GATE;

    if features.time < config.noise_estimation_time
        && features.energy < config.energy_threshold * NOISE_CEILING
    {
        next.noise_energy_sum += features.energy;
        next.noise_flux_sum += features.spectral_flux;
        next.noise_frames += 1;
    }

    let frame_end = features.time + features.duration;
    let (is_speech, confidence) = if raw_speech {
        next.speech_run += features.duration;
        if next.speech_run + DURATION_EPSILON >= config.min_speech_duration {
            next.hangover_armed = true;
        }
        next.last_speech_end = Some(frame_end);
        (true, score)
    } else {
        let in_hangover = state.hangover_armed
            && state
                .last_speech_end
                .map_or(false, |end| features.time - end < config.hangover_time);
        if in_hangover {
            (true, HANGOVER_CONFIDENCE)
        } else {
            next.speech_run = 0.0;
            next.hangover_armed = false;
            (false, 1.0 - score)
        }
    };

    let result = VadFrameResult {
        energy_level: features.energy,
        zero_crossing_rate: features.zero_crossing_rate,
        spectral_flux: features.spectral_flux,
        confidence: confidence.clamp(0.0, 1.0),
        is_speech,
        frame_time: features.time,
        frame_duration: features.duration,
    };
    (next, result)
}

/// Frame-level speech detector for one recording session.
///
/// Holds the adaptive noise estimate and hangover state of the session, so an
/// instance must not be shared between unrelated sources; call [`reset`]
/// before reusing it.
///
/// [`reset`]: VoiceActivityDetector::reset
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    state: VadState,
    extractor: FeatureExtractor,
    processed_samples: u64,
    pending: Vec<f32>,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Result<Self> {
        config.validate()?;
        let analyzer = SpectralAnalyzer::new(config.frame_size, 0.0)?;
        Ok(Self::with_analyzer(config, analyzer))
    }

    /// Uses a caller-provided analyzer for the flux spectrum. Its window
    /// size should match `config.frame_size`.
    pub fn with_analyzer(config: VadConfig, analyzer: SpectralAnalyzer) -> Self {
        Self {
            config,
            state: VadState::default(),
            extractor: FeatureExtractor::new(analyzer),
            processed_samples: 0,
            pending: Vec::new(),
        }
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// Seconds of audio consumed since creation or the last reset.
    pub fn elapsed(&self) -> f32 {
        self.processed_samples as f32 / self.config.sample_rate as f32
    }

    /// Classifies every hop of `samples`, continuing the session clock. The
    /// trailing frame may be partial; its duration is the real remainder.
    pub fn detect_voice_activity(&mut self, samples: &[f32]) -> Vec<VadFrameResult> {
        let hop = self.config.hop_size;
        let frame_size = self.config.frame_size;
        let mut results = Vec::with_capacity(samples.len() / hop + 1);

        let mut pos = 0;
        while pos < samples.len() {
            let end = (pos + frame_size).min(samples.len());
            let advance = hop.min(samples.len() - pos);
            results.push(self.process_frame(&samples[pos..end], advance));
            pos += hop;
        }

        log::trace!(
            "VAD: {} frames, {:.0}% speech",
            results.len(),
            speech_ratio(&results) * 100.0
        );
        results
    }

    /// Streaming entry point: buffers arbitrary chunk sizes and only emits
    /// frames once a full window is available.
    pub fn process_buffer(&mut self, buffer: &[f32]) -> Vec<VadFrameResult> {
        let hop = self.config.hop_size;
        let frame_size = self.config.frame_size;

        let mut pending = std::mem::take(&mut self.pending);
        pending.extend_from_slice(buffer);

        let mut results = Vec::new();
        let mut offset = 0;
        while pending.len() - offset >= frame_size {
            results.push(self.process_frame(&pending[offset..offset + frame_size], hop));
            offset += hop;
        }
        pending.drain(..offset);
        self.pending = pending;
        results
    }

    /// Classifies whatever [`process_buffer`] is still holding.
    ///
    /// [`process_buffer`]: VoiceActivityDetector::process_buffer
    pub fn flush(&mut self) -> Vec<VadFrameResult> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Vec::new();
        }
        self.detect_voice_activity(&pending)
    }

    fn process_frame(&mut self, frame: &[f32], advance: usize) -> VadFrameResult {
        let sample_rate = self.config.sample_rate as f32;
        let time = self.processed_samples as f32 / sample_rate;
        let duration = advance as f32 / sample_rate;
        let features = self.extractor.extract(frame, sample_rate, time, duration);
        let (next, result) = step(&self.config, self.state, &features);
        self.state = next;
        self.processed_samples += advance as u64;
        result
    }

    /// Merges frame results into alternating segments and enforces the
    /// minimum durations.
    pub fn create_segments(&self, results: &[VadFrameResult]) -> Vec<VadSegment> {
        let mut segments: Vec<VadSegment> = Vec::new();
        for result in results {
            let end = result.frame_time + result.frame_duration;
            match segments.last_mut() {
                Some(last) if last.is_speech == result.is_speech => {
                    let weight = last.average_confidence * last.duration()
                        + result.confidence * result.frame_duration;
                    last.end_time = end;
                    last.average_confidence = weighted(weight, last.duration());
                }
                Some(last) => {
                    let start = last.end_time;
                    segments.push(VadSegment {
                        start_time: start,
                        end_time: end.max(start),
                        is_speech: result.is_speech,
                        average_confidence: result.confidence,
                    });
                }
                None => segments.push(VadSegment {
                    start_time: result.frame_time,
                    end_time: end,
                    is_speech: result.is_speech,
                    average_confidence: result.confidence,
                }),
            }
        }

        let merged = self.merge_short_segments(segments);
        log::debug!(
            "VAD: {} segments ({} speech)",
            merged.len(),
            merged.iter().filter(|s| s.is_speech).count()
        );
        merged
    }

    /// Repeatedly flips the shortest segment under its class minimum (the
    /// earliest on ties) and merges it into its neighbours, until every
    /// segment meets its minimum or only one is left. The output is a fixed
    /// point of this function.
    pub fn merge_short_segments(&self, segments: Vec<VadSegment>) -> Vec<VadSegment> {
        let mut segments = coalesce(segments);
        while segments.len() > 1 {
            let violation = segments
                .iter()
                .enumerate()
                .filter(|(_, s)| s.duration() + DURATION_EPSILON < self.min_duration(s.is_speech))
                .fold(None::<(usize, f32)>, |best, (i, s)| match best {
                    Some((_, d)) if d <= s.duration() => best,
                    _ => Some((i, s.duration())),
                });

            let Some((index, _)) = violation else {
                break;
            };
            let segment = &mut segments[index];
            segment.is_speech = !segment.is_speech;
            segment.average_confidence = 1.0 - segment.average_confidence;
            segments = coalesce(segments);
        }
        segments
    }

    fn min_duration(&self, is_speech: bool) -> f32 {
        if is_speech {
            self.config.min_speech_duration
        } else {
            self.config.min_silence_duration
        }
    }

    pub fn speech_segments(segments: &[VadSegment]) -> Vec<VadSegment> {
        segments.iter().copied().filter(|s| s.is_speech).collect()
    }

    pub fn reset(&mut self) {
        log::debug!("VAD: reset");
        self.state = VadState::default();
        self.extractor.reset();
        self.processed_samples = 0;
        self.pending.clear();
    }
}

pub fn speech_ratio(results: &[VadFrameResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().filter(|r| r.is_speech).count() as f32 / results.len() as f32
}

fn weighted(weight: f32, duration: f32) -> f32 {
    if duration > 0.0 {
        (weight / duration).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn coalesce(segments: Vec<VadSegment>) -> Vec<VadSegment> {
    let mut out: Vec<VadSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match out.last_mut() {
            Some(last) if last.is_speech == segment.is_speech => {
                let weight = last.average_confidence * last.duration()
                    + segment.average_confidence * segment.duration();
                last.end_time = segment.end_time;
                last.average_confidence = weighted(weight, last.duration());
            }
            _ => out.push(segment),
        }
    }
    out
}
