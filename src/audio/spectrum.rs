use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Serialize;

use crate::error::{AnalysisError, Result};

pub const MIN_WINDOW_SIZE: usize = 512;
pub const MAX_WINDOW_SIZE: usize = 4096;
pub const MAX_OVERLAP: f32 = 0.9;

// Peaks at or below this are DC offset / rumble
const MIN_PEAK_HZ: f32 = 5.0;
// Peaks at or above this are noise floor / aliasing
const MAX_PEAK_HZ: f32 = 20_000.0;

/// Magnitude spectrum of one analysis window.
///
/// Magnitudes are amplitude-normalized: a sinusoid of amplitude `A` that sits
/// on a bin reads close to `A` at that bin.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrequencyFrame {
    frequencies: Vec<f32>,
    magnitudes: Vec<f32>,
    sample_rate: f32,
    window_size: usize,
    timestamp: f32,
}

/// The strongest bin of a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectralPeak {
    pub bin: usize,
    pub frequency: f32,
    pub magnitude: f32,
}

impl FrequencyFrame {
    /// Builds a frame, replacing non-finite or negative magnitudes with 0.
    pub fn new(
        frequencies: Vec<f32>,
        magnitudes: Vec<f32>,
        sample_rate: f32,
        window_size: usize,
        timestamp: f32,
    ) -> Result<Self> {
        if frequencies.is_empty() || frequencies.len() != magnitudes.len() {
            return Err(AnalysisError::InvalidAudioData(format!(
                "frame needs equal, non-zero bin counts (got {} frequencies, {} magnitudes)",
                frequencies.len(),
                magnitudes.len()
            )));
        }
        if !(sample_rate > 0.0) || window_size == 0 {
            return Err(AnalysisError::InvalidAudioData(format!(
                "frame needs a positive sample rate and window size (got {}, {})",
                sample_rate, window_size
            )));
        }
        let magnitudes = magnitudes.into_iter().map(sanitize).collect();
        Ok(Self {
            frequencies,
            magnitudes,
            sample_rate,
            window_size,
            timestamp,
        })
    }

    pub fn frequencies(&self) -> &[f32] {
        &self.frequencies
    }

    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn timestamp(&self) -> f32 {
        self.timestamp
    }

    /// Same spectrum, re-anchored at `timestamp` seconds.
    pub fn with_timestamp(mut self, timestamp: f32) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Strongest bin strictly between 5 Hz and 20 kHz, if any bin there is non-zero.
    pub fn peak(&self) -> Option<SpectralPeak> {
        let mut best: Option<SpectralPeak> = None;
        for (bin, (&frequency, &magnitude)) in
            self.frequencies.iter().zip(self.magnitudes.iter()).enumerate()
        {
            if frequency <= MIN_PEAK_HZ || frequency >= MAX_PEAK_HZ || magnitude <= 0.0 {
                continue;
            }
            if best.map_or(true, |b| magnitude > b.magnitude) {
                best = Some(SpectralPeak {
                    bin,
                    frequency,
                    magnitude,
                });
            }
        }
        best
    }

    pub fn peak_frequency(&self) -> Option<f32> {
        self.peak().map(|p| p.frequency)
    }

    pub fn peak_magnitude(&self) -> f32 {
        self.peak().map_or(0.0, |p| p.magnitude)
    }

    pub fn total_magnitude(&self) -> f32 {
        self.magnitudes.iter().sum()
    }

    /// Magnitude-weighted mean frequency, 0 for an empty spectrum.
    pub fn spectral_centroid(&self) -> f32 {
        let total = self.total_magnitude();
        if total <= 1e-10 {
            return 0.0;
        }
        self.frequencies
            .iter()
            .zip(self.magnitudes.iter())
            .map(|(f, m)| f * m)
            .sum::<f32>()
            / total
    }

    /// Cosine similarity between two spectra of the same size (0 when either is silent).
    pub fn cosine_similarity(&self, other: &FrequencyFrame) -> f32 {
        let dot: f32 = self
            .magnitudes
            .iter()
            .zip(other.magnitudes.iter())
            .map(|(a, b)| a * b)
            .sum();
        let norm_a = self.magnitudes.iter().map(|m| m * m).sum::<f32>().sqrt();
        let norm_b = other.magnitudes.iter().map(|m| m * m).sum::<f32>().sqrt();
        if norm_a <= 1e-10 || norm_b <= 1e-10 {
            return 0.0;
        }
        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }
}

fn sanitize(value: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Hamming-windowed FFT front end.
///
/// The FFT plan and window are built once; the analyzer is immutable
/// afterwards and can be shared between threads.
#[derive(Clone)]
pub struct SpectralAnalyzer {
    window_size: usize,
    hop_size: usize,
    overlap: f32,
    window: Vec<f32>,
    window_gain: f32,
    fft: Arc<dyn Fft<f32>>,
}

impl fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("window_size", &self.window_size)
            .field("hop_size", &self.hop_size)
            .field("overlap", &self.overlap)
            .finish()
    }
}

impl SpectralAnalyzer {
    pub fn new(window_size: usize, overlap: f32) -> Result<Self> {
        if !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&window_size) {
            return Err(AnalysisError::InvalidAudioData(format!(
                "window size {} outside {}..={}",
                window_size, MIN_WINDOW_SIZE, MAX_WINDOW_SIZE
            )));
        }
        if !(0.0..=MAX_OVERLAP).contains(&overlap) {
            return Err(AnalysisError::InvalidAudioData(format!(
                "overlap {} outside 0.0..={}",
                overlap, MAX_OVERLAP
            )));
        }

        let hop_size = ((window_size as f32 * (1.0 - overlap)).round() as usize).max(1);
        let window = hamming_window(window_size);
        let window_gain = window.iter().sum::<f32>();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(window_size);

        Ok(Self {
            window_size,
            hop_size,
            overlap,
            window,
            window_gain,
            fft,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn overlap(&self) -> f32 {
        self.overlap
    }

    /// Spectrum of the first window of `samples` (zero-padded when shorter).
    pub fn analyze(&self, samples: &[f32], sample_rate: f32) -> Result<FrequencyFrame> {
        validate_input(samples, sample_rate)?;
        Ok(self.compute_frame(samples, sample_rate, 0.0))
    }

    /// Lazy hop-by-hop analysis. Each call starts a fresh pass over `samples`.
    pub fn analyze_segments<'a>(&'a self, samples: &'a [f32], sample_rate: f32) -> Result<Frames<'a>> {
        validate_input(samples, sample_rate)?;
        Ok(Frames {
            analyzer: self,
            samples,
            sample_rate,
            next: 0,
            count: self.frame_count(samples.len()),
        })
    }

    /// Batch analysis of every hop, computed in parallel and returned in time order.
    pub fn analyze_all(&self, samples: &[f32], sample_rate: f32) -> Result<Vec<FrequencyFrame>> {
        validate_input(samples, sample_rate)?;
        let count = self.frame_count(samples.len());
        Ok((0..count)
            .into_par_iter()
            .map(|index| {
                let start = index * self.hop_size;
                self.compute_frame(&samples[start..], sample_rate, start as f32 / sample_rate)
            })
            .collect())
    }

    /// Number of frames `analyze_segments` yields for `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else if len <= self.window_size {
            1
        } else {
            (len - self.window_size) / self.hop_size + 1
        }
    }

    /// Windowed spectrum of `samples[..window_size]`, zero-padded. Does not validate.
    pub(crate) fn compute_frame(&self, samples: &[f32], sample_rate: f32, timestamp: f32) -> FrequencyFrame {
        let n = self.window_size;
        let take = samples.len().min(n);
        let clean: Vec<f32> = samples[..take]
            .iter()
            .map(|&s| if s.is_finite() { s } else { 0.0 })
            .collect();

        let mean = if take > 0 {
            clean.iter().sum::<f32>() / take as f32
        } else {
            0.0
        };

        let mut buffer: Vec<Complex<f32>> = vec![Complex::new(0.0, 0.0); n];
        for (i, &s) in clean.iter().enumerate() {
            buffer[i] = Complex::new((s - mean) * self.window[i], 0.0);
        }
        self.fft.process(&mut buffer);

        let half = n / 2;
        let scale = 2.0 / self.window_gain;
        let magnitudes: Vec<f32> = buffer[..half]
            .iter()
            .map(|c| sanitize(c.norm() * scale))
            .collect();
        let frequencies: Vec<f32> = (0..half)
            .map(|k| k as f32 * sample_rate / n as f32)
            .collect();

        FrequencyFrame {
            frequencies,
            magnitudes,
            sample_rate,
            window_size: n,
            timestamp,
        }
    }
}

/// Iterator returned by [`SpectralAnalyzer::analyze_segments`].
pub struct Frames<'a> {
    analyzer: &'a SpectralAnalyzer,
    samples: &'a [f32],
    sample_rate: f32,
    next: usize,
    count: usize,
}

impl Iterator for Frames<'_> {
    type Item = FrequencyFrame;

    fn next(&mut self) -> Option<FrequencyFrame> {
        if self.next >= self.count {
            return None;
        }
        let start = self.next * self.analyzer.hop_size;
        self.next += 1;
        Some(self.analyzer.compute_frame(
            &self.samples[start..],
            self.sample_rate,
            start as f32 / self.sample_rate,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Frames<'_> {}

fn validate_input(samples: &[f32], sample_rate: f32) -> Result<()> {
    if samples.is_empty() {
        return Err(AnalysisError::InvalidAudioData("no samples".into()));
    }
    if !(sample_rate > 0.0) || !sample_rate.is_finite() {
        return Err(AnalysisError::InvalidAudioData(format!(
            "sample rate must be positive, got {}",
            sample_rate
        )));
    }
    Ok(())
}

pub fn hamming_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.54 - 0.46 * (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos()
        })
        .collect()
}
