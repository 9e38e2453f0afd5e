use super::spectrum::SpectralAnalyzer;

/// Raw-domain features of one analysis frame, the input of the VAD step.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameFeatures {
    /// RMS of the frame's real samples, clamped to 0.0-1.0
    pub energy: f32,
    /// Sign changes within the frame
    pub zero_crossing_rate: f32,
    /// Sum of positive per-bin magnitude increases vs. the previous frame
    pub spectral_flux: f32,
    /// Frame start in seconds
    pub time: f32,
    /// Span of input this frame accounts for, in seconds
    pub duration: f32,
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples
        .iter()
        .filter(|s| s.is_finite())
        .map(|s| s * s)
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

pub fn zero_crossings(samples: &[f32]) -> usize {
    samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count()
}

pub fn spectral_flux(current: &[f32], previous: &[f32]) -> f32 {
    current
        .iter()
        .zip(previous.iter())
        .map(|(cur, prev)| (cur - prev).max(0.0))
        .sum()
}

/// Turns consecutive frames into [`FrameFeatures`], keeping the previous
/// spectrum for the flux term.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    analyzer: SpectralAnalyzer,
    previous: Option<Vec<f32>>,
}

impl FeatureExtractor {
    pub fn new(analyzer: SpectralAnalyzer) -> Self {
        Self {
            analyzer,
            previous: None,
        }
    }

    pub fn analyzer(&self) -> &SpectralAnalyzer {
        &self.analyzer
    }

    /// `samples` holds the real samples of the frame (at most one window);
    /// the spectrum is zero-padded past them.
    pub fn extract(&mut self, samples: &[f32], sample_rate: f32, time: f32, duration: f32) -> FrameFeatures {
        let frame = self.analyzer.compute_frame(samples, sample_rate, time);
        let magnitudes = frame.magnitudes().to_vec();

        let flux = match &self.previous {
            Some(previous) => spectral_flux(&magnitudes, previous),
            None => 0.0,
        };
        self.previous = Some(magnitudes);

        let energy = rms(samples).clamp(0.0, 1.0);
        FrameFeatures {
            energy,
            zero_crossing_rate: zero_crossings(samples) as f32,
            spectral_flux: if flux.is_finite() { flux } else { 0.0 },
            time,
            duration,
        }
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}
