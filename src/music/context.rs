//! Contextual re-ranking on top of the base recommendation score.
//!
//! Every mode starts from [`ScaleRecommender::candidates`], records its own
//! sub-score in `context_score`, adjusts `confidence_score`, and re-sorts and
//! re-truncates the list.

use serde::{Deserialize, Serialize};

use super::recommend::{
    sort_results, ContextKind, RecommendationConfig, ScaleRecommendationResult, ScaleRecommender,
};
use super::scale::{Genre, Mood, Scale, ScaleType};
use crate::audio::syllable::{SegmentKind, SyllableSegment};
use crate::error::Result;

const CONTEXT_BLEND: f32 = 0.3;

/// Scales the user picked before, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceHistory {
    selections: Vec<Scale>,
}

impl PreferenceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, scale: &Scale) {
        self.selections.push(scale.clone());
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    fn share(&self, matches: impl Fn(&Scale) -> bool) -> f32 {
        if self.selections.is_empty() {
            return 0.0;
        }
        self.selections.iter().filter(|s| matches(s)).count() as f32 / self.selections.len() as f32
    }

    pub fn mean_complexity(&self) -> Option<f32> {
        if self.selections.is_empty() {
            return None;
        }
        let sum: f32 = self.selections.iter().map(|s| s.complexity as f32).sum();
        Some(sum / self.selections.len() as f32)
    }

    /// Additive bonus for scales resembling past picks; 0 for an empty history.
    pub fn bonus(&self, scale: &Scale) -> f32 {
        let Some(mean) = self.mean_complexity() else {
            return 0.0;
        };
        let type_share = self.share(|s| s.scale_type == scale.scale_type);
        let mood_share = self.share(|s| s.mood == scale.mood);
        let closeness = (1.0 - (scale.complexity as f32 - mean).abs() / 4.0).max(0.0);
        0.2 * type_share + 0.15 * mood_share + 0.1 * closeness
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoodProfile {
    pub primary: Mood,
    pub secondary: Option<Mood>,
    /// 0.0-1.0
    pub intensity: f32,
}

impl MoodProfile {
    pub fn factor(&self, scale: &Scale) -> f32 {
        let intensity = self.intensity.clamp(0.0, 1.0);
        let mut factor = 0.0;
        if scale.mood == self.primary {
            factor += 0.7 * intensity;
        }
        if self.secondary == Some(scale.mood) {
            factor += 0.3 * intensity;
        }
        if self.secondary.is_some_and(|s| s.contradicts(self.primary)) {
            factor *= 0.7;
        }
        factor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// 5-11 morning, 12-16 afternoon, 17-20 evening, otherwise night.
    pub fn from_hour(hour: u32) -> Self {
        match hour % 24 {
            5..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            17..=20 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    pub fn moods(self) -> &'static [Mood] {
        match self {
            TimeOfDay::Morning => &[Mood::Happy, Mood::Energetic],
            TimeOfDay::Afternoon => &[Mood::Energetic, Mood::Neutral],
            TimeOfDay::Evening => &[Mood::Romantic, Mood::Calm],
            TimeOfDay::Night => &[Mood::Mysterious, Mood::Calm, Mood::Sad],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    pub fn moods(self) -> &'static [Mood] {
        match self {
            Season::Spring => &[Mood::Happy, Mood::Romantic],
            Season::Summer => &[Mood::Energetic, Mood::Happy],
            Season::Autumn => &[Mood::Sad, Mood::Calm],
            Season::Winter => &[Mood::Mysterious, Mood::Dramatic, Mood::Sad],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occasion {
    Celebration,
    Relaxation,
    Focus,
    Workout,
    Reflection,
    Performance,
}

impl Occasion {
    pub fn moods(self) -> &'static [Mood] {
        match self {
            Occasion::Celebration => &[Mood::Happy, Mood::Energetic],
            Occasion::Relaxation => &[Mood::Calm, Mood::Romantic],
            Occasion::Focus => &[Mood::Calm, Mood::Neutral],
            Occasion::Workout => &[Mood::Energetic, Mood::Dramatic],
            Occasion::Reflection => &[Mood::Sad, Mood::Mysterious, Mood::Calm],
            Occasion::Performance => &[Mood::Dramatic, Mood::Energetic],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeContext {
    pub time_of_day: TimeOfDay,
    pub season: Season,
    pub occasion: Occasion,
}

impl TimeContext {
    pub fn factor(&self, scale: &Scale) -> f32 {
        let hit = |moods: &[Mood]| if moods.contains(&scale.mood) { 1.0 } else { 0.0 };
        0.4 * hit(self.time_of_day.moods()) + 0.3 * hit(self.season.moods()) + 0.3 * hit(self.occasion.moods())
    }
}

/// Coarse timbre description of the analysed voice, each axis 0.0-1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceQuality {
    pub brightness: f32,
    pub stability: f32,
    pub breathiness: f32,
    pub energy: f32,
}

impl Default for VoiceQuality {
    fn default() -> Self {
        Self {
            brightness: 0.5,
            stability: 0.5,
            breathiness: 0.0,
            energy: 0.5,
        }
    }
}

impl VoiceQuality {
    /// Brightness from the mean spectral centroid (4 kHz reads as fully
    /// bright), stability from the mean absolute pitch deviation (50 cents is
    /// fully unstable), breathiness from the share of breath and noise
    /// syllables, energy from the mean RMS (0.5 is full).
    pub fn from_syllables(syllables: &[SyllableSegment]) -> Self {
        if syllables.is_empty() {
            return Self::default();
        }
        let n = syllables.len() as f32;
        let centroid = syllables.iter().map(|s| s.frame.spectral_centroid()).sum::<f32>() / n;
        let deviations: Vec<f32> = syllables
            .iter()
            .filter_map(|s| s.note.as_ref())
            .map(|note| note.deviation_cents.abs())
            .collect();
        let stability = if deviations.is_empty() {
            0.5
        } else {
            1.0 - (deviations.iter().sum::<f32>() / deviations.len() as f32 / 50.0).clamp(0.0, 1.0)
        };
        let breathy = syllables
            .iter()
            .filter(|s| matches!(s.kind, SegmentKind::Breath | SegmentKind::Noise))
            .count() as f32;
        let energy = syllables.iter().map(|s| s.energy).sum::<f32>() / n;

        Self {
            brightness: (centroid / 4000.0).clamp(0.0, 1.0),
            stability,
            breathiness: breathy / n,
            energy: (energy / 0.5).clamp(0.0, 1.0),
        }
    }

    /// The mood the voice itself carries.
    pub fn voice_mood(&self) -> Mood {
        if self.energy > 0.6 && self.brightness > 0.5 {
            Mood::Energetic
        } else if self.brightness > 0.5 {
            Mood::Happy
        } else if self.energy > 0.6 {
            Mood::Dramatic
        } else if self.brightness < 0.25 {
            Mood::Sad
        } else {
            Mood::Calm
        }
    }

    /// The mood the voice is best suited to.
    pub fn suggested_mood(&self) -> Mood {
        if self.breathiness > 0.4 {
            Mood::Romantic
        } else if self.stability < 0.4 {
            Mood::Mysterious
        } else if self.energy > 0.6 {
            Mood::Energetic
        } else {
            Mood::Calm
        }
    }

    pub fn factor(&self, scale: &Scale) -> f32 {
        let voice = if scale.mood == self.voice_mood() { 0.4 } else { 0.0 };
        let suggested = if scale.mood == self.suggested_mood() { 0.6 } else { 0.0 };
        voice + suggested
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub preferred_moods: Vec<Mood>,
    pub preferred_genres: Vec<Genre>,
    pub preferred_types: Vec<ScaleType>,
    pub preferred_complexity: u8,
    pub min_complexity: u8,
    pub max_complexity: u8,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            preferred_moods: Vec::new(),
            preferred_genres: Vec::new(),
            preferred_types: Vec::new(),
            preferred_complexity: 3,
            min_complexity: 1,
            max_complexity: 5,
        }
    }
}

impl UserProfile {
    pub fn allows(&self, scale: &Scale) -> bool {
        (self.min_complexity..=self.max_complexity).contains(&scale.complexity)
    }

    pub fn weight(&self, scale: &Scale) -> f32 {
        let mood = if self.preferred_moods.contains(&scale.mood) { 1.0 } else { 0.0 };
        let genre = if scale.genres.iter().any(|g| self.preferred_genres.contains(g)) {
            1.0
        } else {
            0.0
        };
        let kind = if self.preferred_types.contains(&scale.scale_type) { 1.0 } else { 0.0 };
        let diff = (scale.complexity as f32 - self.preferred_complexity as f32).abs();
        let closeness = (1.0 - diff / 4.0).max(0.0);
        (0.4 * mood + 0.3 * genre + 0.2 * kind + 0.1 * closeness).clamp(0.0, 1.0)
    }
}

fn blend(base: f32, factor: f32) -> f32 {
    ((1.0 - CONTEXT_BLEND) * base + CONTEXT_BLEND * factor).clamp(0.0, 1.0)
}

impl ScaleRecommender<'_> {
    pub fn recommend_with_history(
        &self,
        pitch_classes: &[i32],
        config: &RecommendationConfig,
        history: &PreferenceHistory,
    ) -> Result<Vec<ScaleRecommendationResult>> {
        self.contextual(pitch_classes, config, ContextKind::History, |scale, base| {
            let bonus = history.bonus(scale);
            Some((bonus, (base + bonus).clamp(0.0, 1.0)))
        })
    }

    pub fn recommend_for_mood(
        &self,
        pitch_classes: &[i32],
        config: &RecommendationConfig,
        profile: &MoodProfile,
    ) -> Result<Vec<ScaleRecommendationResult>> {
        self.contextual(pitch_classes, config, ContextKind::MoodProfile, |scale, base| {
            let factor = profile.factor(scale);
            Some((factor, blend(base, factor)))
        })
    }

    pub fn recommend_for_time(
        &self,
        pitch_classes: &[i32],
        config: &RecommendationConfig,
        context: &TimeContext,
    ) -> Result<Vec<ScaleRecommendationResult>> {
        self.contextual(pitch_classes, config, ContextKind::TimeContext, |scale, base| {
            let factor = context.factor(scale);
            Some((factor, blend(base, factor)))
        })
    }

    pub fn recommend_for_voice(
        &self,
        pitch_classes: &[i32],
        config: &RecommendationConfig,
        voice: &VoiceQuality,
    ) -> Result<Vec<ScaleRecommendationResult>> {
        self.contextual(pitch_classes, config, ContextKind::VoiceQuality, |scale, base| {
            let factor = voice.factor(scale);
            Some((factor, blend(base, factor)))
        })
    }

    /// Drops scales outside the profile's complexity range.
    pub fn recommend_personalized(
        &self,
        pitch_classes: &[i32],
        config: &RecommendationConfig,
        profile: &UserProfile,
    ) -> Result<Vec<ScaleRecommendationResult>> {
        self.contextual(pitch_classes, config, ContextKind::Personalization, |scale, base| {
            if !profile.allows(scale) {
                return None;
            }
            let weight = profile.weight(scale);
            Some((weight, (0.6 * base + 0.4 * weight).clamp(0.0, 1.0)))
        })
    }

    /// `adjust` maps a scale and its base confidence to `(context score, new
    /// confidence)`, or `None` to drop the scale.
    fn contextual(
        &self,
        pitch_classes: &[i32],
        config: &RecommendationConfig,
        kind: ContextKind,
        adjust: impl Fn(&Scale, f32) -> Option<(f32, f32)>,
    ) -> Result<Vec<ScaleRecommendationResult>> {
        let mut results: Vec<ScaleRecommendationResult> = self
            .candidates(pitch_classes, config)?
            .into_iter()
            .filter_map(|mut result| {
                let (score, confidence) = adjust(&result.scale, result.base_confidence)?;
                result.context_score = Some(score);
                result.context = Some(kind);
                result.confidence_score = confidence;
                Some(result)
            })
            .collect();
        sort_results(&mut results);
        results.truncate(config.max_results);
        log::debug!("{:?} ranking: {} scales", kind, results.len());
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::spectrum::FrequencyFrame;
    use crate::music::note::NoteMapper;
    use crate::music::scale::ScaleLibrary;

    const C_MINOR_ISH: [i32; 5] = [0, 2, 3, 7, 10];

    fn wide() -> RecommendationConfig {
        RecommendationConfig {
            min_similarity_threshold: 0.0,
            max_results: 50,
            ..RecommendationConfig::default()
        }
    }

    fn position(results: &[ScaleRecommendationResult], id: &str) -> usize {
        results.iter().position(|r| r.scale.id == id).unwrap()
    }

    #[test]
    fn test_history_bonus() {
        let library = ScaleLibrary::builtin();
        let blues = library.get("blues").unwrap();
        let major = library.get("major").unwrap();

        let empty = PreferenceHistory::new();
        assert_eq!(empty.bonus(blues), 0.0);

        let mut history = PreferenceHistory::new();
        history.record(blues);
        history.record(blues);
        // same type, same mood, same complexity
        assert!((history.bonus(blues) - 0.45).abs() < 1e-6);
        assert!(history.bonus(major) < history.bonus(blues));
    }

    #[test]
    fn test_history_changes_ranking() {
        let library = ScaleLibrary::builtin();
        let recommender = ScaleRecommender::new(&library);
        let base = recommender.recommend(&C_MINOR_ISH, &wide()).unwrap();

        let mut history = PreferenceHistory::new();
        for _ in 0..5 {
            history.record(library.get("blues").unwrap());
        }
        let ranked = recommender.recommend_with_history(&C_MINOR_ISH, &wide(), &history).unwrap();
        assert!(position(&ranked, "blues") <= position(&base, "blues"));
        assert!(ranked.iter().all(|r| r.context == Some(ContextKind::History)));
        assert!(ranked.iter().all(|r| r.confidence_score >= r.base_confidence));
        assert!(ranked.windows(2).all(|w| w[0].confidence_score >= w[1].confidence_score));
    }

    #[test]
    fn test_mood_profile_factor() {
        let library = ScaleLibrary::builtin();
        let minor = library.get("natural_minor").unwrap();
        assert_eq!(minor.mood, Mood::Sad);

        let focused = MoodProfile {
            primary: Mood::Sad,
            secondary: Some(Mood::Mysterious),
            intensity: 1.0,
        };
        assert!((focused.factor(minor) - 0.7).abs() < 1e-6);

        let conflicted = MoodProfile {
            primary: Mood::Sad,
            secondary: Some(Mood::Happy),
            intensity: 1.0,
        };
        assert!((conflicted.factor(minor) - 0.49).abs() < 1e-6);

        let half = MoodProfile {
            primary: Mood::Happy,
            secondary: Some(Mood::Sad),
            intensity: 0.5,
        };
        assert!((half.factor(minor) - 0.3 * 0.5 * 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_mood_ranking_blends_seventy_thirty() {
        let library = ScaleLibrary::builtin();
        let recommender = ScaleRecommender::new(&library);
        let profile = MoodProfile {
            primary: Mood::Sad,
            secondary: None,
            intensity: 1.0,
        };
        let ranked = recommender.recommend_for_mood(&C_MINOR_ISH, &wide(), &profile).unwrap();
        for r in &ranked {
            let factor = r.context_score.unwrap();
            assert!((r.confidence_score - (0.7 * r.base_confidence + 0.3 * factor)).abs() < 1e-5);
        }
    }

    #[test]
    fn test_time_context() {
        assert_eq!(TimeOfDay::from_hour(7), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(13), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(19), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(2), TimeOfDay::Night);

        let library = ScaleLibrary::builtin();
        let minor = library.get("natural_minor").unwrap();
        let gloomy = TimeContext {
            time_of_day: TimeOfDay::Night,
            season: Season::Autumn,
            occasion: Occasion::Reflection,
        };
        assert!((gloomy.factor(minor) - 1.0).abs() < 1e-6);
        let party = TimeContext {
            time_of_day: TimeOfDay::Morning,
            season: Season::Summer,
            occasion: Occasion::Celebration,
        };
        assert_eq!(party.factor(minor), 0.0);

        let recommender = ScaleRecommender::new(&library);
        let ranked = recommender.recommend_for_time(&C_MINOR_ISH, &wide(), &gloomy).unwrap();
        assert!(ranked.iter().all(|r| r.context == Some(ContextKind::TimeContext)));
    }

    #[test]
    fn test_voice_quality_from_syllables() {
        assert_eq!(VoiceQuality::from_syllables(&[]), VoiceQuality::default());

        let frame = FrequencyFrame::new(vec![0.0, 200.0, 400.0], vec![0.0, 1.0, 1.0], 44100.0, 2048, 0.0).unwrap();
        let mapper = NoteMapper::default();
        let syllables = vec![
            SyllableSegment {
                index: 0,
                start_time: 0.0,
                end_time: 0.3,
                frame: frame.clone(),
                note: mapper.from_frequency(445.0, 0.3, 0.5),
                energy: 0.4,
                confidence: 0.9,
                kind: SegmentKind::Speech,
            },
            SyllableSegment {
                index: 1,
                start_time: 0.3,
                end_time: 0.6,
                frame,
                note: None,
                energy: 0.02,
                confidence: 0.1,
                kind: SegmentKind::Breath,
            },
        ];
        let voice = VoiceQuality::from_syllables(&syllables);
        assert!((voice.brightness - 300.0 / 4000.0).abs() < 1e-4);
        assert!((voice.breathiness - 0.5).abs() < 1e-6);
        assert!((voice.energy - 0.42).abs() < 1e-4);
        assert!(voice.stability > 0.55 && voice.stability < 0.65, "{}", voice.stability);
        assert_eq!(voice.voice_mood(), Mood::Sad);
        assert_eq!(voice.suggested_mood(), Mood::Romantic);
    }

    #[test]
    fn test_personalization_filters_and_weights() {
        let library = ScaleLibrary::builtin();
        let recommender = ScaleRecommender::new(&library);
        let profile = UserProfile {
            preferred_moods: vec![Mood::Sad],
            preferred_genres: vec![Genre::Classical],
            preferred_types: vec![ScaleType::Minor],
            preferred_complexity: 2,
            min_complexity: 1,
            max_complexity: 2,
        };
        let ranked = recommender.recommend_personalized(&C_MINOR_ISH, &wide(), &profile).unwrap();
        assert!(!ranked.is_empty());
        assert!(ranked.iter().all(|r| r.scale.complexity <= 2));
        for r in &ranked {
            let w = r.context_score.unwrap();
            assert!((0.0..=1.0).contains(&w));
            assert!((r.confidence_score - (0.6 * r.base_confidence + 0.4 * w)).abs() < 1e-5);
        }
    }
}
