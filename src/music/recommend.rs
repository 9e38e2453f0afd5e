use serde::{Deserialize, Serialize};

use super::scale::{mask_to_pitch_classes, pitch_class_mask, Genre, Mood, Scale, ScaleLibrary};
use crate::error::{AnalysisError, Result};

const SIMILARITY_WEIGHT: f32 = 0.4;
const COVERAGE_WEIGHT: f32 = 0.3;
const NOTE_COUNT_WEIGHT: f32 = 0.1;
const COMPLEXITY_WEIGHT: f32 = 0.1;
const PREFERENCE_WEIGHT: f32 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub min_similarity_threshold: f32,
    pub max_results: usize,
    pub min_complexity: u8,
    pub max_complexity: u8,
    pub preferred_mood: Option<Mood>,
    pub preferred_genres: Vec<Genre>,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            min_similarity_threshold: 0.2,
            max_results: 5,
            min_complexity: 1,
            max_complexity: 5,
            preferred_mood: None,
            preferred_genres: Vec::new(),
        }
    }
}

impl RecommendationConfig {
    pub fn allows_complexity(&self, complexity: u8) -> bool {
        (self.min_complexity..=self.max_complexity).contains(&complexity)
    }

    /// No preference, the same mood, or a neutral scale.
    pub fn allows_mood(&self, mood: Mood) -> bool {
        match self.preferred_mood {
            None => true,
            Some(preferred) => mood == preferred || mood == Mood::Neutral,
        }
    }
}

/// Which contextual adjustment produced `context_score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    History,
    MoodProfile,
    TimeContext,
    VoiceQuality,
    Personalization,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleRecommendationResult {
    pub scale: Scale,
    pub similarity_score: f32,
    pub confidence_score: f32,
    pub matching_notes: Vec<u8>,
    pub coverage: f32,
    /// Confidence before any contextual adjustment
    pub base_confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextKind>,
}

/// `|a ∩ b| / |a ∪ b|` over pitch-class masks; 0 when both are empty.
pub fn jaccard_similarity(a: u16, b: u16) -> f32 {
    let union = (a | b).count_ones();
    if union == 0 {
        return 0.0;
    }
    (a & b).count_ones() as f32 / union as f32
}

pub fn complexity_bonus(complexity: u8) -> f32 {
    match complexity {
        1 => 0.7,
        2 => 0.85,
        3 | 4 => 1.0,
        5 => 0.6,
        _ => 0.0,
    }
}

/// 0.5 for a mood match plus 0.5 for any shared genre.
pub fn preference_bonus(scale: &Scale, config: &RecommendationConfig) -> f32 {
    let mood = match config.preferred_mood {
        Some(mood) if mood == scale.mood => 0.5,
        _ => 0.0,
    };
    let genre = if scale.genres.iter().any(|g| config.preferred_genres.contains(g)) {
        0.5
    } else {
        0.0
    };
    mood + genre
}

/// Folds arbitrary pitch numbers (MIDI numbers, negative offsets) to a
/// pitch-class mask, requiring at least two distinct classes.
pub fn normalize_pitch_classes(pitch_classes: &[i32]) -> Result<u16> {
    let mask = pitch_class_mask(pitch_classes.iter().copied());
    if mask.count_ones() < 2 {
        return Err(AnalysisError::InsufficientData(format!(
            "need at least 2 distinct pitch classes, got {}",
            mask.count_ones()
        )));
    }
    Ok(mask)
}

/// Descending confidence, then similarity, then id.
pub fn sort_results(results: &mut [ScaleRecommendationResult]) {
    results.sort_by(|a, b| {
        b.confidence_score
            .total_cmp(&a.confidence_score)
            .then(b.similarity_score.total_cmp(&a.similarity_score))
            .then_with(|| a.scale.id.cmp(&b.scale.id))
    });
}

/// `1 − 0.7·shared − 0.3·max(0, 1 − |Δcomplexity| / 5)`, where `shared` is
/// the common notes over the larger scale's note count.
pub fn transition_difficulty(from: &Scale, to: &Scale) -> f32 {
    let (a, b) = (from.mask(), to.mask());
    let larger = a.count_ones().max(b.count_ones());
    let shared = if larger == 0 {
        0.0
    } else {
        (a & b).count_ones() as f32 / larger as f32
    };
    let complexity_diff = (from.complexity as f32 - to.complexity as f32).abs();
    let closeness = (1.0 - complexity_diff / 5.0).max(0.0);
    (1.0 - 0.7 * shared - 0.3 * closeness).clamp(0.0, 1.0)
}

/// Rewards pairs that together cover many pitch classes with little overlap.
pub fn harmony_score(a: &Scale, b: &Scale) -> f32 {
    let (a, b) = (a.mask(), b.mask());
    let union = (a | b).count_ones();
    if union == 0 {
        return 0.0;
    }
    let overlap = (a & b).count_ones() as f32 / union as f32;
    0.6 * (union as f32 / 12.0) + 0.4 * (1.0 - overlap)
}

/// Stateless scorer over a borrowed library.
#[derive(Debug, Clone, Copy)]
pub struct ScaleRecommender<'a> {
    library: &'a ScaleLibrary,
}

impl<'a> ScaleRecommender<'a> {
    pub fn new(library: &'a ScaleLibrary) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &'a ScaleLibrary {
        self.library
    }

    pub fn recommend(
        &self,
        pitch_classes: &[i32],
        config: &RecommendationConfig,
    ) -> Result<Vec<ScaleRecommendationResult>> {
        let mut results = self.candidates(pitch_classes, config)?;
        sort_results(&mut results);
        results.truncate(config.max_results);
        log::debug!(
            "Recommended {} scales for {:?}",
            results.len(),
            mask_to_pitch_classes(normalize_pitch_classes(pitch_classes)?)
        );
        Ok(results)
    }

    /// Every scale that passes the similarity, complexity and mood filters,
    /// scored but neither sorted nor truncated.
    pub fn candidates(
        &self,
        pitch_classes: &[i32],
        config: &RecommendationConfig,
    ) -> Result<Vec<ScaleRecommendationResult>> {
        let input = normalize_pitch_classes(pitch_classes)?;
        Ok(self
            .library
            .iter()
            .filter(|scale| config.allows_complexity(scale.complexity) && config.allows_mood(scale.mood))
            .map(|scale| self.score(scale, input, config))
            .filter(|result| result.similarity_score >= config.min_similarity_threshold)
            .collect())
    }

    pub fn score(&self, scale: &Scale, input: u16, config: &RecommendationConfig) -> ScaleRecommendationResult {
        let scale_mask = scale.mask();
        let similarity = jaccard_similarity(input, scale_mask);
        let matching = input & scale_mask;
        let coverage = if input == 0 {
            0.0
        } else {
            matching.count_ones() as f32 / input.count_ones() as f32
        };
        let note_count = if scale.note_count() >= 3 { 1.0 } else { 0.0 };

        let confidence = SIMILARITY_WEIGHT * similarity
            + COVERAGE_WEIGHT * coverage
            + NOTE_COUNT_WEIGHT * note_count
            + COMPLEXITY_WEIGHT * complexity_bonus(scale.complexity)
            + PREFERENCE_WEIGHT * preference_bonus(scale, config);
        let confidence = confidence.clamp(0.0, 1.0);

        ScaleRecommendationResult {
            scale: scale.clone(),
            similarity_score: similarity,
            confidence_score: confidence,
            matching_notes: mask_to_pitch_classes(matching),
            coverage,
            base_confidence: confidence,
            context_score: None,
            context: None,
        }
    }

    /// Other scales ordered from easiest to hardest to move to from `from`.
    pub fn suggest_transitions(&self, from: &Scale, limit: usize) -> Vec<(Scale, f32)> {
        let mut ranked: Vec<(Scale, f32)> = self
            .library
            .iter()
            .filter(|s| s.id != from.id)
            .map(|s| (s.clone(), transition_difficulty(from, s)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        ranked.truncate(limit);
        ranked
    }

    /// Other scales ordered by how well they complement `scale`.
    pub fn complementary_scales(&self, scale: &Scale, limit: usize) -> Vec<(Scale, f32)> {
        let mut ranked: Vec<(Scale, f32)> = self
            .library
            .iter()
            .filter(|s| s.id != scale.id)
            .map(|s| (s.clone(), harmony_score(scale, s)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music::scale::ScaleType;

    fn adhoc(id: &str, intervals: &[u8], complexity: u8) -> Scale {
        Scale::new(id, id, ScaleType::Exotic, intervals, Mood::Neutral, complexity, &[]).unwrap()
    }

    #[test]
    fn test_triad_against_major() {
        let library = ScaleLibrary::builtin();
        let recommender = ScaleRecommender::new(&library);
        let major = library.get("major").unwrap();
        let result = recommender.score(major, pitch_class_mask([0, 4, 7]), &RecommendationConfig::default());
        assert_eq!(result.coverage, 1.0);
        assert!((result.similarity_score - 3.0 / 7.0).abs() < 1e-6);
        assert_eq!(result.matching_notes, vec![0, 4, 7]);

        // 0.4·3/7 + 0.3·1 + 0.1·1 + 0.1·0.7 + 0
        let expected = 0.4 * 3.0 / 7.0 + 0.3 + 0.1 + 0.07;
        assert!((result.confidence_score - expected).abs() < 1e-5);
    }

    #[test]
    fn test_jaccard_properties() {
        let major = pitch_class_mask([0, 2, 4, 5, 7, 9, 11]);
        let pentatonic = pitch_class_mask([0, 2, 4, 7, 9]);
        let black_keys = pitch_class_mask([1, 3, 6, 8, 10]);
        assert_eq!(jaccard_similarity(major, pentatonic), jaccard_similarity(pentatonic, major));
        assert_eq!(jaccard_similarity(major, major), 1.0);
        assert_eq!(jaccard_similarity(pentatonic, black_keys), 0.0);
        assert_eq!(jaccard_similarity(0, 0), 0.0);
    }

    #[test]
    fn test_complexity_bonus_table() {
        assert_eq!(
            [1, 2, 3, 4, 5].map(complexity_bonus),
            [0.7, 0.85, 1.0, 1.0, 0.6]
        );
    }

    #[test]
    fn test_recommend_sorted_bounded_and_thresholded() {
        let library = ScaleLibrary::builtin();
        let recommender = ScaleRecommender::new(&library);
        for config in [
            RecommendationConfig::default(),
            RecommendationConfig {
                max_results: 3,
                min_similarity_threshold: 0.5,
                ..RecommendationConfig::default()
            },
            RecommendationConfig {
                max_results: 50,
                min_similarity_threshold: 0.0,
                ..RecommendationConfig::default()
            },
        ] {
            let results = recommender.recommend(&[60, 62, 64, 67, 69], &config).unwrap();
            assert!(results.len() <= config.max_results);
            assert!(results
                .windows(2)
                .all(|w| w[0].confidence_score >= w[1].confidence_score));
            assert!(results
                .iter()
                .all(|r| r.similarity_score >= config.min_similarity_threshold));
        }
    }

    #[test]
    fn test_pentatonic_input_prefers_pentatonic() {
        let library = ScaleLibrary::builtin();
        let recommender = ScaleRecommender::new(&library);
        let results = recommender
            .recommend(&[0, 2, 4, 7, 9], &RecommendationConfig::default())
            .unwrap();
        assert_eq!(results[0].scale.id, "major_pentatonic");
        assert_eq!(results[0].similarity_score, 1.0);
    }

    #[test]
    fn test_insufficient_pitch_classes() {
        let library = ScaleLibrary::builtin();
        let recommender = ScaleRecommender::new(&library);
        let config = RecommendationConfig::default();
        assert!(matches!(
            recommender.recommend(&[], &config),
            Err(AnalysisError::InsufficientData(_))
        ));
        assert!(recommender.recommend(&[5], &config).is_err());
        assert!(recommender.recommend(&[0, 12, 24], &config).is_err());
        assert!(recommender.recommend(&[0, 13], &config).is_ok());
    }

    #[test]
    fn test_mood_and_complexity_filters() {
        let library = ScaleLibrary::builtin();
        let recommender = ScaleRecommender::new(&library);
        let config = RecommendationConfig {
            preferred_mood: Some(Mood::Sad),
            min_similarity_threshold: 0.0,
            max_results: 50,
            ..RecommendationConfig::default()
        };
        let results = recommender.recommend(&[0, 3, 7], &config).unwrap();
        assert!(!results.is_empty());
        assert!(results
            .iter()
            .all(|r| r.scale.mood == Mood::Sad || r.scale.mood == Mood::Neutral));

        let config = RecommendationConfig {
            min_complexity: 3,
            max_complexity: 4,
            min_similarity_threshold: 0.0,
            max_results: 50,
            ..RecommendationConfig::default()
        };
        let results = recommender.recommend(&[0, 3, 7], &config).unwrap();
        assert!(results.iter().all(|r| (3..=4).contains(&r.scale.complexity)));
    }

    #[test]
    fn test_preferences_raise_confidence() {
        let library = ScaleLibrary::builtin();
        let recommender = ScaleRecommender::new(&library);
        let blues = library.get("blues").unwrap();
        let input = pitch_class_mask([0, 3, 5, 7]);
        let plain = recommender.score(blues, input, &RecommendationConfig::default());
        let preferred = recommender.score(
            blues,
            input,
            &RecommendationConfig {
                preferred_mood: Some(Mood::Energetic),
                preferred_genres: vec![Genre::Blues],
                ..RecommendationConfig::default()
            },
        );
        assert!((preferred.confidence_score - plain.confidence_score - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_transition_difficulty() {
        let a = adhoc("a", &[0, 2, 4, 5, 7, 9, 11], 2);
        assert!(transition_difficulty(&a, &a).abs() < 1e-6);

        let near = adhoc("near", &[0, 2, 4, 5, 7, 9, 10], 2);
        let far = adhoc("far", &[1, 3, 6, 8, 10], 5);
        assert!(transition_difficulty(&a, &near) < transition_difficulty(&a, &far));
        assert!(transition_difficulty(&a, &far) <= 1.0);
    }

    #[test]
    fn test_harmony_prefers_complementary_pairs() {
        let white = adhoc("white", &[0, 2, 4, 7, 9], 1);
        let black = adhoc("black", &[1, 3, 6, 8, 10], 1);
        let identical = harmony_score(&white, &white);
        let complementary = harmony_score(&white, &black);
        assert!((complementary - (0.6 * 10.0 / 12.0 + 0.4)).abs() < 1e-6);
        assert!((identical - 0.6 * 5.0 / 12.0).abs() < 1e-6);
        assert!(complementary > identical);
    }

    #[test]
    fn test_transition_and_complement_rankings() {
        let library = ScaleLibrary::builtin();
        let recommender = ScaleRecommender::new(&library);
        let major = library.get("major").unwrap();

        let transitions = recommender.suggest_transitions(major, 3);
        assert_eq!(transitions.len(), 3);
        assert!(transitions.iter().all(|(s, _)| s.id != "major"));
        assert!(transitions.windows(2).all(|w| w[0].1 <= w[1].1));

        let complements = recommender.complementary_scales(major, 3);
        assert!(complements.windows(2).all(|w| w[0].1 >= w[1].1));
    }
}
