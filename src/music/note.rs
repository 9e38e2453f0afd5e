use serde::{Deserialize, Serialize};

use crate::audio::spectrum::FrequencyFrame;

pub const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

pub const CONCERT_A4: f32 = 440.0;
const A4_MIDI: f32 = 69.0;
const SHARPNESS_NEIGHBOURS: usize = 5;

/// An equal-tempered note. `midi_number` determines `octave`, `pitch_class`
/// and `frequency`; `deviation_cents` records how far the detected pitch was
/// from `frequency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub name: String,
    pub frequency: f32,
    pub midi_number: u8,
    pub octave: i32,
    pub pitch_class: u8,
    pub deviation_cents: f32,
    /// Seconds
    pub duration: f32,
    /// 0.0-1.0
    pub amplitude: f32,
}

impl Note {
    /// Signed distance in semitones from `other` to `self`.
    pub fn semitones_from(&self, other: &Note) -> i32 {
        self.midi_number as i32 - other.midi_number as i32
    }

    pub fn with_timing(mut self, duration: f32, amplitude: f32) -> Self {
        self.duration = duration.max(0.0);
        self.amplitude = clamp_unit(amplitude);
        self
    }
}

pub fn note_name(midi: u8) -> String {
    let (octave, pitch_class) = octave_and_class(midi);
    format!("{}{}", PITCH_CLASS_NAMES[pitch_class as usize], octave)
}

fn octave_and_class(midi: u8) -> (i32, u8) {
    (midi as i32 / 12 - 1, midi % 12)
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Frequency ↔ note conversion against a reference A4. Stateless and `Copy`,
/// so it can be shared freely across sessions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteMapper {
    reference_a4: f32,
}

impl Default for NoteMapper {
    fn default() -> Self {
        Self {
            reference_a4: CONCERT_A4,
        }
    }
}

impl NoteMapper {
    pub fn new(reference_a4: f32) -> Self {
        Self { reference_a4 }
    }

    pub fn reference_a4(&self) -> f32 {
        self.reference_a4
    }

    pub fn midi_to_frequency(&self, midi: u8) -> f32 {
        self.reference_a4 * 2f32.powf((midi as f32 - A4_MIDI) / 12.0)
    }

    /// Fractional MIDI number of `freq`; `None` for non-positive or non-finite input.
    pub fn frequency_to_midi(&self, freq: f32) -> Option<f32> {
        if !freq.is_finite() || freq <= 0.0 {
            return None;
        }
        let midi = A4_MIDI + 12.0 * (freq / self.reference_a4).log2();
        midi.is_finite().then_some(midi)
    }

    /// Nearest note to `freq`, or `None` when it falls outside MIDI 0-127.
    pub fn from_frequency(&self, freq: f32, duration: f32, amplitude: f32) -> Option<Note> {
        let rounded = self.frequency_to_midi(freq)?.round();
        if !(0.0..=127.0).contains(&rounded) {
            return None;
        }
        let note = self.from_midi(rounded as u8)?;
        let deviation_cents = 1200.0 * (freq / note.frequency).log2();
        Some(Note {
            deviation_cents,
            ..note.with_timing(duration, amplitude)
        })
    }

    pub fn from_midi(&self, midi: u8) -> Option<Note> {
        if midi > 127 {
            return None;
        }
        let (octave, pitch_class) = octave_and_class(midi);
        Some(Note {
            name: note_name(midi),
            frequency: self.midi_to_frequency(midi),
            midi_number: midi,
            octave,
            pitch_class,
            deviation_cents: 0.0,
            duration: 0.0,
            amplitude: 1.0,
        })
    }

    /// Note at the frame's spectral peak; the peak magnitude becomes the amplitude.
    pub fn note_for_frame(&self, frame: &FrequencyFrame, duration: f32) -> Option<Note> {
        let peak = frame.peak()?;
        self.from_frequency(peak.frequency, duration, peak.magnitude)
    }

    /// How tonal a frame is, 0.0-1.0.
    ///
    /// `peak_ratio` is the peak's share of all magnitude; `peak_sharpness` is
    /// `1 - mean(±5 neighbouring bins) / peak`. The blend
    /// `(0.6 * ratio + 0.4 * sharpness) * 2` is clamped to 0.0-1.0.
    pub fn confidence(frame: &FrequencyFrame) -> f32 {
        let Some(peak) = frame.peak() else {
            return 0.0;
        };
        let magnitudes = frame.magnitudes();
        let total = frame.total_magnitude();
        if total <= 0.0 || peak.magnitude <= 0.0 {
            return 0.0;
        }
        let peak_ratio = peak.magnitude / total;

        let start = peak.bin.saturating_sub(SHARPNESS_NEIGHBOURS);
        let end = (peak.bin + SHARPNESS_NEIGHBOURS).min(magnitudes.len() - 1);
        let neighbours: Vec<f32> = (start..=end)
            .filter(|&i| i != peak.bin)
            .map(|i| magnitudes[i])
            .collect();
        let peak_sharpness = if neighbours.is_empty() {
            1.0
        } else {
            let mean = neighbours.iter().sum::<f32>() / neighbours.len() as f32;
            (1.0 - mean / peak.magnitude).clamp(0.0, 1.0)
        };

        ((peak_ratio * 0.6 + peak_sharpness * 0.4) * 2.0).clamp(0.0, 1.0)
    }
}
