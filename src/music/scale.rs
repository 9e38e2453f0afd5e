use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleType {
    Major,
    Minor,
    Mode,
    Pentatonic,
    Blues,
    Harmonic,
    Symmetric,
    Exotic,
    Chromatic,
}

impl ScaleType {
    pub fn label(self) -> &'static str {
        match self {
            ScaleType::Major => "major",
            ScaleType::Minor => "minor",
            ScaleType::Mode => "church mode",
            ScaleType::Pentatonic => "pentatonic",
            ScaleType::Blues => "blues",
            ScaleType::Harmonic => "harmonic",
            ScaleType::Symmetric => "symmetric",
            ScaleType::Exotic => "exotic",
            ScaleType::Chromatic => "chromatic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Happy,
    Sad,
    Calm,
    Energetic,
    Mysterious,
    Romantic,
    Dramatic,
    Neutral,
}

impl Mood {
    pub const ALL: [Mood; 8] = [
        Mood::Happy,
        Mood::Sad,
        Mood::Calm,
        Mood::Energetic,
        Mood::Mysterious,
        Mood::Romantic,
        Mood::Dramatic,
        Mood::Neutral,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Mood::Happy => "happy",
            Mood::Sad => "sad",
            Mood::Calm => "calm",
            Mood::Energetic => "energetic",
            Mood::Mysterious => "mysterious",
            Mood::Romantic => "romantic",
            Mood::Dramatic => "dramatic",
            Mood::Neutral => "neutral",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Mood::Happy => "bright and uplifting",
            Mood::Sad => "melancholic and introspective",
            Mood::Calm => "relaxed and settled",
            Mood::Energetic => "driving and lively",
            Mood::Mysterious => "ambiguous and unresolved",
            Mood::Romantic => "warm and dreamy",
            Mood::Dramatic => "tense and intense",
            Mood::Neutral => "no strong colour",
        }
    }

    /// Pairs of moods that pull in opposite directions.
    pub fn contradicts(self, other: Mood) -> bool {
        matches!(
            (self, other),
            (Mood::Happy, Mood::Sad)
                | (Mood::Sad, Mood::Happy)
                | (Mood::Calm, Mood::Energetic)
                | (Mood::Energetic, Mood::Calm)
                | (Mood::Calm, Mood::Dramatic)
                | (Mood::Dramatic, Mood::Calm)
        )
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Mood {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Mood::ALL
            .iter()
            .copied()
            .find(|m| m.name() == lower)
            .ok_or_else(|| format!("unknown mood '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Genre {
    Classical,
    Jazz,
    Blues,
    Rock,
    Pop,
    Folk,
    World,
    Electronic,
    Ambient,
    Metal,
}

impl Genre {
    pub const ALL: [Genre; 10] = [
        Genre::Classical,
        Genre::Jazz,
        Genre::Blues,
        Genre::Rock,
        Genre::Pop,
        Genre::Folk,
        Genre::World,
        Genre::Electronic,
        Genre::Ambient,
        Genre::Metal,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Genre::Classical => "classical",
            Genre::Jazz => "jazz",
            Genre::Blues => "blues",
            Genre::Rock => "rock",
            Genre::Pop => "pop",
            Genre::Folk => "folk",
            Genre::World => "world",
            Genre::Electronic => "electronic",
            Genre::Ambient => "ambient",
            Genre::Metal => "metal",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Genre {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Genre::ALL
            .iter()
            .copied()
            .find(|g| g.name() == lower)
            .ok_or_else(|| format!("unknown genre '{}'", s))
    }
}

/// A scale as pitch-class intervals over a C root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub scale_type: ScaleType,
    pub intervals: Vec<u8>,
    pub mood: Mood,
    pub complexity: u8,
    #[serde(default)]
    pub genres: Vec<Genre>,
}

impl Scale {
    /// Sorts and dedupes `intervals`, rejecting values outside 0-11 and
    /// complexity outside 1-5.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        scale_type: ScaleType,
        intervals: &[u8],
        mood: Mood,
        complexity: u8,
        genres: &[Genre],
    ) -> Result<Self> {
        Scale {
            id: id.into(),
            name: name.into(),
            scale_type,
            intervals: intervals.to_vec(),
            mood,
            complexity,
            genres: genres.to_vec(),
        }
        .normalized()
    }

    fn normalized(mut self) -> Result<Self> {
        if self.id.trim().is_empty() {
            return Err(AnalysisError::InvalidScaleLibrary("scale with empty id".into()));
        }
        if let Some(bad) = self.intervals.iter().find(|&&i| i > 11) {
            return Err(AnalysisError::InvalidScaleLibrary(format!(
                "scale '{}' has interval {} outside 0-11",
                self.id, bad
            )));
        }
        if !(1..=5).contains(&self.complexity) {
            return Err(AnalysisError::InvalidScaleLibrary(format!(
                "scale '{}' has complexity {} outside 1-5",
                self.id, self.complexity
            )));
        }
        self.intervals.sort_unstable();
        self.intervals.dedup();
        if self.intervals.is_empty() {
            return Err(AnalysisError::InvalidScaleLibrary(format!(
                "scale '{}' has no intervals",
                self.id
            )));
        }
        // Keeps first occurrences in their listed order
        let genres = std::mem::take(&mut self.genres);
        for genre in genres {
            if !self.genres.contains(&genre) {
                self.genres.push(genre);
            }
        }
        Ok(self)
    }

    pub fn note_count(&self) -> usize {
        self.intervals.len()
    }

    /// Bit `i` is set when pitch class `i` belongs to the scale.
    pub fn mask(&self) -> u16 {
        pitch_class_mask(self.intervals.iter().map(|&i| i as i32))
    }

    pub fn contains(&self, pitch_class: u8) -> bool {
        self.mask() & (1 << (pitch_class % 12)) != 0
    }
}

pub fn pitch_class_mask(pitch_classes: impl IntoIterator<Item = i32>) -> u16 {
    pitch_classes
        .into_iter()
        .fold(0u16, |mask, pc| mask | (1 << pc.rem_euclid(12)))
}

pub fn mask_to_pitch_classes(mask: u16) -> Vec<u8> {
    (0..12u8).filter(|pc| mask & (1 << pc) != 0).collect()
}

#[derive(Deserialize)]
struct LibraryFile {
    #[serde(rename = "scale", default)]
    scales: Vec<Scale>,
}

/// Read-only scale table, built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleLibrary {
    scales: Vec<Scale>,
}

impl ScaleLibrary {
    pub fn from_scales(scales: Vec<Scale>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(scales.len());
        for scale in scales {
            let scale = scale.normalized()?;
            if !seen.insert(scale.id.clone()) {
                return Err(AnalysisError::InvalidScaleLibrary(format!(
                    "duplicate scale id '{}'",
                    scale.id
                )));
            }
            normalized.push(scale);
        }
        if normalized.is_empty() {
            return Err(AnalysisError::InvalidScaleLibrary("library is empty".into()));
        }
        Ok(Self { scales: normalized })
    }

    /// Parses `[[scale]]` tables.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: LibraryFile = toml::from_str(source)
            .map_err(|e| AnalysisError::InvalidScaleLibrary(e.to_string()))?;
        Self::from_scales(file.scales)
    }

    pub fn builtin() -> Self {
        use Genre::*;
        use ScaleType as T;
        let table: &[(&str, &str, ScaleType, &[u8], Mood, u8, &[Genre])] = &[
            ("major", "Major (Ionian)", T::Major, &[0, 2, 4, 5, 7, 9, 11], Mood::Happy, 1, &[Classical, Pop, Rock, Folk]),
            ("natural_minor", "Natural Minor (Aeolian)", T::Minor, &[0, 2, 3, 5, 7, 8, 10], Mood::Sad, 2, &[Classical, Pop, Rock]),
            ("harmonic_minor", "Harmonic Minor", T::Harmonic, &[0, 2, 3, 5, 7, 8, 11], Mood::Dramatic, 3, &[Classical, Metal]),
            ("melodic_minor", "Melodic Minor", T::Minor, &[0, 2, 3, 5, 7, 9, 11], Mood::Mysterious, 3, &[Jazz, Classical]),
            ("dorian", "Dorian", T::Mode, &[0, 2, 3, 5, 7, 9, 10], Mood::Calm, 2, &[Jazz, Folk, Rock]),
            ("phrygian", "Phrygian", T::Mode, &[0, 1, 3, 5, 7, 8, 10], Mood::Mysterious, 3, &[Metal, World]),
            ("lydian", "Lydian", T::Mode, &[0, 2, 4, 6, 7, 9, 11], Mood::Romantic, 3, &[Jazz, Ambient]),
            ("mixolydian", "Mixolydian", T::Mode, &[0, 2, 4, 5, 7, 9, 10], Mood::Energetic, 2, &[Rock, Blues, Folk]),
            ("locrian", "Locrian", T::Mode, &[0, 1, 3, 5, 6, 8, 10], Mood::Dramatic, 5, &[Metal, Jazz]),
            ("major_pentatonic", "Major Pentatonic", T::Pentatonic, &[0, 2, 4, 7, 9], Mood::Happy, 1, &[Pop, Folk, World]),
            ("minor_pentatonic", "Minor Pentatonic", T::Pentatonic, &[0, 3, 5, 7, 10], Mood::Sad, 1, &[Blues, Rock]),
            ("egyptian", "Egyptian (Suspended Pentatonic)", T::Pentatonic, &[0, 2, 5, 7, 10], Mood::Neutral, 2, &[World, Folk]),
            ("blues", "Blues", T::Blues, &[0, 3, 5, 6, 7, 10], Mood::Energetic, 2, &[Blues, Rock, Jazz]),
            ("bebop_dominant", "Bebop Dominant", T::Major, &[0, 2, 4, 5, 7, 9, 10, 11], Mood::Energetic, 4, &[Jazz]),
            ("whole_tone", "Whole Tone", T::Symmetric, &[0, 2, 4, 6, 8, 10], Mood::Mysterious, 4, &[Jazz, Ambient, Classical]),
            ("diminished", "Diminished (Half-Whole)", T::Symmetric, &[0, 1, 3, 4, 6, 7, 9, 10], Mood::Dramatic, 5, &[Jazz, Classical]),
            ("hirajoshi", "Hirajoshi", T::Exotic, &[0, 2, 3, 7, 8], Mood::Calm, 3, &[World, Ambient]),
            ("in_sen", "In Sen", T::Exotic, &[0, 1, 5, 7, 10], Mood::Mysterious, 3, &[World, Ambient]),
            ("hungarian_minor", "Hungarian Minor", T::Exotic, &[0, 2, 3, 6, 7, 8, 11], Mood::Dramatic, 4, &[World, Classical]),
            ("double_harmonic", "Double Harmonic", T::Exotic, &[0, 1, 4, 5, 7, 8, 11], Mood::Mysterious, 4, &[World]),
            ("persian", "Persian", T::Exotic, &[0, 1, 4, 5, 6, 8, 11], Mood::Mysterious, 5, &[World]),
            ("chromatic", "Chromatic", T::Chromatic, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11], Mood::Neutral, 5, &[Electronic, Classical]),
        ];

        let scales = table
            .iter()
            .map(|&(id, name, scale_type, intervals, mood, complexity, genres)| Scale {
                id: id.to_string(),
                name: name.to_string(),
                scale_type,
                intervals: intervals.to_vec(),
                mood,
                complexity,
                genres: genres.to_vec(),
            })
            .collect();
        Self { scales }
    }

    pub fn get(&self, id: &str) -> Option<&Scale> {
        self.scales.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Scale> {
        self.scales.iter()
    }

    pub fn scales(&self) -> &[Scale] {
        &self.scales
    }

    pub fn len(&self) -> usize {
        self.scales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scales.is_empty()
    }
}

impl Default for ScaleLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl<'a> IntoIterator for &'a ScaleLibrary {
    type Item = &'a Scale;
    type IntoIter = std::slice::Iter<'a, Scale>;

    fn into_iter(self) -> Self::IntoIter {
        self.scales.iter()
    }
}
