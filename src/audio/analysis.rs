use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::spectrum::{FrequencyFrame, SpectralAnalyzer};
use super::syllable::{SegmenterConfig, SyllableSegment, SyllableSegmenter};
use super::vad::{speech_ratio, VadConfig, VadFrameResult, VadSegment, VoiceActivityDetector};
use crate::error::{AnalysisError, Result};
use crate::music::note::{Note, NoteMapper, CONCERT_A4};
use crate::music::quality::{QualityFilter, QualityFilterConfig};
use crate::music::recommend::{RecommendationConfig, ScaleRecommendationResult, ScaleRecommender};
use crate::music::scale::ScaleLibrary;

// Samples fed to the VAD between cancellation / budget checks
const CHECK_INTERVAL: usize = 16384;

/// Shared flag a caller flips to stop a running analysis.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub vad: VadConfig,
    pub segmenter: SegmenterConfig,
    pub quality: QualityFilterConfig,
    pub reference_a4: f32,
    /// Wall-clock budget for one `analyze` call
    pub timeout: Option<Duration>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            segmenter: SegmenterConfig::default(),
            quality: QualityFilterConfig::default(),
            reference_a4: CONCERT_A4,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    /// Seconds
    pub duration: f32,
    pub sample_rate: u32,
    pub speech_ratio: f32,
    pub vad_segments: Vec<VadSegment>,
    /// Syllables that survived quality filtering
    pub syllables: Vec<SyllableSegment>,
    pub notes: Vec<Note>,
    /// Distinct, ascending
    pub pitch_classes: Vec<u8>,
    /// Syllables before quality filtering
    pub raw_syllable_count: usize,
}

impl AnalysisReport {
    pub fn pitch_class_input(&self) -> Vec<i32> {
        self.pitch_classes.iter().map(|&pc| pc as i32).collect()
    }
}

struct Budget<'a> {
    started: Instant,
    timeout: Option<Duration>,
    cancel: &'a CancelToken,
}

impl Budget<'_> {
    fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            log::warn!("Analysis cancelled");
            return Err(AnalysisError::Cancelled);
        }
        if let Some(budget) = self.timeout {
            let elapsed = self.started.elapsed();
            if elapsed >= budget {
                return Err(AnalysisError::AnalysisTimeout { elapsed, budget });
            }
        }
        Ok(())
    }
}

/// Batch pipeline: VAD, segments, syllables, notes, quality filter.
///
/// Detector and segmenter state is created per call, so one `Analyzer` can
/// serve any number of recordings.
#[derive(Debug, Clone)]
pub struct Analyzer {
    config: AnalysisConfig,
    segmenter: SyllableSegmenter,
    mapper: NoteMapper,
    filter: QualityFilter,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.vad.validate()?;
        let segmenter = SyllableSegmenter::new(config.segmenter.clone())?;
        if !(config.reference_a4 > 0.0) || !config.reference_a4.is_finite() {
            return Err(AnalysisError::InvalidAudioData(format!(
                "reference pitch must be positive, got {}",
                config.reference_a4
            )));
        }
        Ok(Self {
            mapper: NoteMapper::new(config.reference_a4),
            filter: QualityFilter::new(config.quality.clone()),
            segmenter,
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn analyze(&self, samples: &[f32], sample_rate: u32, cancel: &CancelToken) -> Result<AnalysisReport> {
        if samples.is_empty() {
            return Err(AnalysisError::InvalidAudioData("no samples".into()));
        }
        if sample_rate == 0 {
            return Err(AnalysisError::InvalidAudioData("sample rate must be positive".into()));
        }
        let budget = Budget {
            started: Instant::now(),
            timeout: self.config.timeout,
            cancel,
        };
        budget.check()?;

        let sr = sample_rate as f32;
        let duration = samples.len() as f32 / sr;

        log::info!("Pass 1: Voice activity detection ({:.1}s)...", duration);
        let vad_config = VadConfig {
            sample_rate,
            ..self.config.vad.clone()
        };
        let mut vad = VoiceActivityDetector::new(vad_config)?;
        let mut frames = Vec::with_capacity(samples.len() / vad.config().hop_size + 1);
        for chunk in samples.chunks(CHECK_INTERVAL) {
            frames.extend(vad.process_buffer(chunk));
            budget.check()?;
        }
        frames.extend(vad.flush());

        log::info!("Pass 2: Building segments from {} frames...", frames.len());
        let vad_segments = vad.create_segments(&frames);
        let speech = VoiceActivityDetector::speech_segments(&vad_segments);
        budget.check()?;

        log::info!("Pass 3: Syllable segmentation ({} speech segments)...", speech.len());
        let mut syllables = Vec::new();
        for segment in &speech {
            let found = self
                .segmenter
                .segment(samples, sr, std::slice::from_ref(segment))
                .map_err(|e| {
                    AnalysisError::ProcessingFailed(format!("segment at {:.2}s: {}", segment.start_time, e))
                })?;
            syllables.extend(found);
            budget.check()?;
        }
        let raw_syllable_count = syllables.len();

        log::info!("Pass 4: Note mapping ({} syllables)...", raw_syllable_count);
        let syllables: Vec<SyllableSegment> = syllables
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                let note = self.mapper.note_for_frame(&s.frame, s.duration());
                s.with_note(note).with_index(i)
            })
            .collect();
        budget.check()?;

        log::info!("Pass 5: Quality filtering...");
        let syllables = self.filter.apply(syllables);
        let notes: Vec<Note> = syllables.iter().filter_map(|s| s.note.clone()).collect();
        let mut pitch_classes: Vec<u8> = notes.iter().map(|n| n.pitch_class).collect();
        pitch_classes.sort_unstable();
        pitch_classes.dedup();

        if notes.is_empty() {
            log::warn!("No notes survived quality filtering");
        }
        log::info!(
            "Analysis: {:.0}% speech, {} of {} syllables kept, pitch classes {:?}",
            speech_ratio(&frames) * 100.0,
            syllables.len(),
            raw_syllable_count,
            pitch_classes
        );

        Ok(AnalysisReport {
            duration,
            sample_rate,
            speech_ratio: speech_ratio(&frames),
            vad_segments,
            syllables,
            notes,
            pitch_classes,
            raw_syllable_count,
        })
    }

    /// Ranks `library` against the report's pitch classes.
    pub fn recommend(
        &self,
        report: &AnalysisReport,
        library: &ScaleLibrary,
        config: &RecommendationConfig,
    ) -> Result<Vec<ScaleRecommendationResult>> {
        if report.notes.is_empty() {
            return Err(AnalysisError::InsufficientData("no notes detected".into()));
        }
        ScaleRecommender::new(library).recommend(&report.pitch_class_input(), config)
    }
}

/// What one [`StreamingSession::push`] produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamUpdate {
    pub frames: Vec<VadFrameResult>,
    /// Speech segments that can no longer change
    pub closed_segments: Vec<VadSegment>,
    /// Spectrum of the newest window
    pub spectrum: Option<FrequencyFrame>,
    /// Note at the newest window's peak
    pub note: Option<Note>,
}

/// Incremental VAD over a live source, emitting speech segments as they close.
#[derive(Debug, Clone)]
pub struct StreamingSession {
    vad: VoiceActivityDetector,
    analyzer: SpectralAnalyzer,
    mapper: NoteMapper,
    results: Vec<VadFrameResult>,
    emitted: usize,
    tail: Vec<f32>,
}

impl StreamingSession {
    pub fn new(config: VadConfig, reference_a4: f32) -> Result<Self> {
        let analyzer = SpectralAnalyzer::new(config.frame_size.clamp(512, 4096), 0.5)?;
        Ok(Self {
            vad: VoiceActivityDetector::new(config)?,
            analyzer,
            mapper: NoteMapper::new(reference_a4),
            results: Vec::new(),
            emitted: 0,
            tail: Vec::new(),
        })
    }

    pub fn elapsed(&self) -> f32 {
        self.vad.elapsed()
    }

    pub fn push(&mut self, buffer: &[f32]) -> StreamUpdate {
        let frames = self.vad.process_buffer(buffer);
        self.results.extend_from_slice(&frames);

        let window = self.analyzer.window_size();
        self.tail.extend_from_slice(buffer);
        if self.tail.len() > window {
            self.tail.drain(..self.tail.len() - window);
        }
        let spectrum = if self.tail.is_empty() {
            None
        } else {
            self.analyzer
                .analyze(&self.tail, self.vad.config().sample_rate as f32)
                .ok()
        };
        let note = spectrum
            .as_ref()
            .and_then(|frame| self.mapper.note_for_frame(frame, frame.window_size() as f32 / frame.sample_rate()));

        // The last two segments can still grow or be merged away
        let closed = self.closed_speech(2);
        StreamUpdate {
            frames,
            closed_segments: closed,
            spectrum,
            note,
        }
    }

    /// Flushes buffered audio and closes every remaining segment.
    pub fn finish(&mut self) -> StreamUpdate {
        let frames = self.vad.flush();
        self.results.extend_from_slice(&frames);
        StreamUpdate {
            frames,
            closed_segments: self.closed_speech(0),
            spectrum: None,
            note: None,
        }
    }

    /// Emits speech segments that became stable and drops their frames,
    /// keeping the newest closed segment as merge context for the tail.
    fn closed_speech(&mut self, open: usize) -> Vec<VadSegment> {
        let segments = self.vad.create_segments(&self.results);
        let stable = segments.len().saturating_sub(open);
        if stable <= self.emitted {
            return Vec::new();
        }
        let closed = VoiceActivityDetector::speech_segments(&segments[self.emitted..stable]);

        let anchor = segments[stable - 1].start_time;
        let cut = self
            .results
            .iter()
            .position(|r| r.frame_time + 0.5 * r.frame_duration >= anchor)
            .unwrap_or(self.results.len());
        self.results.drain(..cut);
        self.emitted = 1;
        closed
    }

    pub fn reset(&mut self) {
        self.vad.reset();
        self.results.clear();
        self.emitted = 0;
        self.tail.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44100;

    fn tone(freq: f32, amplitude: f32, seconds: f32) -> Vec<f32> {
        (0..(seconds * SR as f32) as usize)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn silence(seconds: f32) -> Vec<f32> {
        vec![0.0; (seconds * SR as f32) as usize]
    }

    fn melody() -> Vec<f32> {
        let mut samples = silence(0.3);
        for freq in [261.63, 329.63, 392.0, 523.25] {
            samples.extend(tone(freq, 0.6, 0.5));
            samples.extend(silence(0.3));
        }
        samples
    }

    #[test]
    fn test_melody_yields_notes() {
        let analyzer = Analyzer::new(AnalysisConfig::default()).unwrap();
        let report = analyzer.analyze(&melody(), SR, &CancelToken::new()).unwrap();
        assert!(report.raw_syllable_count >= 4, "{} syllables", report.raw_syllable_count);
        assert!(!report.notes.is_empty());
        assert_eq!(report.notes.len(), report.syllables.len());
        assert!(report.pitch_classes.windows(2).all(|w| w[0] < w[1]));
        assert!(report
            .pitch_classes
            .iter()
            .all(|pc| [0u8, 4, 7].contains(pc)), "{:?}", report.pitch_classes);
        assert!(report.syllables.iter().enumerate().all(|(i, s)| s.index == i));

        let end = report.vad_segments.last().unwrap().end_time;
        assert!((end - report.duration).abs() < 1e-3);
    }

    #[test]
    fn test_silence_has_no_notes() {
        let analyzer = Analyzer::new(AnalysisConfig::default()).unwrap();
        let report = analyzer.analyze(&silence(1.0), SR, &CancelToken::new()).unwrap();
        assert!(report.notes.is_empty());
        assert_eq!(report.speech_ratio, 0.0);
        assert!(matches!(
            analyzer.recommend(&report, &ScaleLibrary::builtin(), &RecommendationConfig::default()),
            Err(AnalysisError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_cancelled_before_start() {
        let analyzer = Analyzer::new(AnalysisConfig::default()).unwrap();
        let token = CancelToken::new();
        let shared = token.clone();
        shared.cancel();
        assert!(token.is_cancelled());
        assert_eq!(analyzer.analyze(&melody(), SR, &token), Err(AnalysisError::Cancelled));
    }

    #[test]
    fn test_zero_budget_times_out() {
        let analyzer = Analyzer::new(AnalysisConfig {
            timeout: Some(Duration::ZERO),
            ..AnalysisConfig::default()
        })
        .unwrap();
        match analyzer.analyze(&melody(), SR, &CancelToken::new()) {
            Err(AnalysisError::AnalysisTimeout { budget, .. }) => assert_eq!(budget, Duration::ZERO),
            other => panic!("expected timeout, got {:?}", other.map(|r| r.notes.len())),
        }
    }

    #[test]
    fn test_invalid_input() {
        let analyzer = Analyzer::new(AnalysisConfig::default()).unwrap();
        let token = CancelToken::new();
        assert!(matches!(analyzer.analyze(&[], SR, &token), Err(AnalysisError::InvalidAudioData(_))));
        assert!(matches!(analyzer.analyze(&[0.0; 100], 0, &token), Err(AnalysisError::InvalidAudioData(_))));
        assert!(Analyzer::new(AnalysisConfig {
            reference_a4: 0.0,
            ..AnalysisConfig::default()
        })
        .is_err());
    }

    #[test]
    fn test_streaming_session_closes_segments() {
        let mut session = StreamingSession::new(VadConfig::default(), CONCERT_A4).unwrap();
        let samples = melody();
        let mut closed = Vec::new();
        let mut frames = 0;
        let mut saw_note = false;
        for chunk in samples.chunks(4410) {
            let update = session.push(chunk);
            frames += update.frames.len();
            saw_note |= update.note.is_some();
            closed.extend(update.closed_segments);
        }
        let last = session.finish();
        frames += last.frames.len();
        closed.extend(last.closed_segments);

        assert!(saw_note);
        assert_eq!(closed.len(), 4, "{:?}", closed);
        assert!(closed.windows(2).all(|w| w[0].end_time <= w[1].start_time));

        let mut vad = VoiceActivityDetector::new(VadConfig::default()).unwrap();
        assert_eq!(frames, vad.detect_voice_activity(&samples).len());

        session.reset();
        assert_eq!(session.elapsed(), 0.0);
    }

    #[test]
    fn test_streaming_memory_stays_bounded() {
        let config = VadConfig::default();
        let frames_per_second = SR as f32 / config.hop_size as f32;
        let mut samples = Vec::new();
        for _ in 0..60 {
            samples.extend(tone(330.0, 0.5, 0.5));
            samples.extend(silence(0.5));
        }

        let mut session = StreamingSession::new(config.clone(), CONCERT_A4).unwrap();
        let mut closed = Vec::new();
        let mut largest = 0;
        for chunk in samples.chunks(1024) {
            closed.extend(session.push(chunk).closed_segments);
            largest = largest.max(session.results.len());
        }
        closed.extend(session.finish().closed_segments);

        // Anchor plus two open segments of about half a second each
        assert!(
            (largest as f32) < 4.0 * frames_per_second,
            "kept {} frame results",
            largest
        );

        let mut vad = VoiceActivityDetector::new(config).unwrap();
        let frames = vad.detect_voice_activity(&samples);
        let batch = VoiceActivityDetector::speech_segments(&vad.create_segments(&frames));
        assert_eq!(closed.len(), batch.len());
        for (streamed, whole) in closed.iter().zip(&batch) {
            assert!((streamed.start_time - whole.start_time).abs() < 1e-3);
            assert!((streamed.end_time - whole.end_time).abs() < 1e-3);
        }
    }
}
