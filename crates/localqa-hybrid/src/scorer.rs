//! Hybrid relevance scoring.
//!
//! `final = vector + exact/substring + fuzzy + phrase`. The vector part is a
//! weighted dot product against the three fragment vectors (all unit length).
//! Boosts are additive and uncapped; callers filter by an absolute threshold.

use std::collections::HashSet;

use localqa_core::types::{Fragment, ScoredFragment};
use localqa_text::distance::bounded_levenshtein;
use localqa_text::{AnalyzedQuery, QueryNormalizer};

pub const CATEGORY_WEIGHT: f32 = 0.4;
pub const CONTENT_WEIGHT: f32 = 0.3;
pub const COMBINED_WEIGHT: f32 = 0.3;

pub const EXACT_BOOST: f32 = 0.5;
pub const PREFIX_BOOST: f32 = 0.5;
pub const SUBSTRING_BOOST: f32 = 0.3;
pub const FUZZY_DISTANCE_1_BOOST: f32 = 0.4;
pub const FUZZY_DISTANCE_2_BOOST: f32 = 0.25;
pub const PHRASE_BOOST: f32 = 0.4;

/// Prefix, substring and fuzzy rules ignore query words shorter than this.
pub const MIN_PARTIAL_MATCH_LEN: usize = 3;
/// Words of at least this many characters may be two edits away.
pub const LONG_WORD_LEN: usize = 6;

/// Query state computed once and reused for every candidate.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub embedding: Vec<f32>,
    pub analyzed: AnalyzedQuery,
}

#[derive(Clone)]
pub struct HybridScorer {
    normalizer: QueryNormalizer,
}

impl HybridScorer {
    pub fn new(normalizer: QueryNormalizer) -> Self { Self { normalizer } }

    pub fn normalizer(&self) -> &QueryNormalizer { &self.normalizer }

    pub fn prepare(&self, raw: &str, embedding: Vec<f32>) -> PreparedQuery {
        PreparedQuery { embedding, analyzed: self.normalizer.analyze(raw) }
    }

    /// Final score of one fragment. Pure: identical inputs give identical bits.
    pub fn score(&self, query: &PreparedQuery, fragment: &Fragment) -> f32 {
        self.score_fragment(query, fragment, 0).final_score
    }

    pub fn score_fragment<'a>(&self, query: &PreparedQuery, fragment: &'a Fragment, ordinal: usize) -> ScoredFragment<'a> {
        let vector_score = vector_score(&query.embedding, fragment);
        let category_words = self.normalizer.words(&fragment.category);
        let keywords = query.analyzed.keywords_for(&category_words);
        let (exact_boost, fuzzy_boost) = keyword_boosts(&keywords, &category_words, &fragment.category.to_lowercase());
        let phrase_boost = if query.analyzed.shares_phrase_with(&category_words) { PHRASE_BOOST } else { 0.0 };
        let boost = exact_boost + fuzzy_boost + phrase_boost;
        ScoredFragment {
            fragment,
            ordinal,
            vector_score,
            exact_boost,
            fuzzy_boost,
            phrase_boost,
            boost,
            final_score: vector_score + boost,
        }
    }

    pub fn score_all<'a>(&self, query: &PreparedQuery, candidates: &[&'a Fragment]) -> Vec<ScoredFragment<'a>> {
        candidates.iter().enumerate().map(|(i, f)| self.score_fragment(query, f, i)).collect()
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `0.4*category + 0.3*content + 0.3*combined`; vectors are pre-normalized
/// so cosine similarity is a plain dot product.
pub fn vector_score(query_embedding: &[f32], fragment: &Fragment) -> f32 {
    CATEGORY_WEIGHT * dot(query_embedding, &fragment.category_vector)
        + CONTENT_WEIGHT * dot(query_embedding, &fragment.content_vector)
        + COMBINED_WEIGHT * dot(query_embedding, &fragment.combined_vector)
}

/// Returns `(exact_or_substring, fuzzy)` boosts. Each distinct query word
/// contributes at most one boost from each group.
pub fn keyword_boosts(keywords: &[String], category_words: &[String], category_lower: &str) -> (f32, f32) {
    let mut seen = HashSet::new();
    let mut exact = 0.0f32;
    let mut fuzzy = 0.0f32;
    for word in keywords {
        if !seen.insert(word.as_str()) { continue; }
        let len = word.chars().count();
        let partial_ok = len >= MIN_PARTIAL_MATCH_LEN;
        if category_words.iter().any(|c| c == word) {
            exact += EXACT_BOOST;
        } else if partial_ok && category_words.iter().any(|c| c.starts_with(word.as_str())) {
            exact += PREFIX_BOOST;
        } else if partial_ok && category_lower.contains(word.as_str()) {
            exact += SUBSTRING_BOOST;
        } else if partial_ok {
            fuzzy += fuzzy_boost(word, len, category_words);
        }
    }
    (exact, fuzzy)
}

fn fuzzy_boost(word: &str, len: usize, category_words: &[String]) -> f32 {
    let allowed = if len < LONG_WORD_LEN { 1 } else { 2 };
    let best = category_words.iter().filter_map(|c| bounded_levenshtein(word, c, allowed)).min();
    match best {
        Some(1) => FUZZY_DISTANCE_1_BOOST,
        Some(2) => FUZZY_DISTANCE_2_BOOST,
        _ => 0.0,
    }
}
