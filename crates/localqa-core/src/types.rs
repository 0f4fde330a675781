//! Domain types shared by the retrieval and serving crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

pub type FragmentId = String;

/// An immutable unit of stored knowledge with precomputed embeddings.
///
/// - `collection`: the knowledge collection the fragment belongs to
/// - `category`: short title, the primary target of keyword matching
/// - `content`: the body text handed to the generator
/// - `category_vector`/`content_vector`/`combined_vector`: unit-normalized
///   embeddings of the category, the content and both together
/// - `domain_tags`: optional tags used by the candidate filter
/// - `source_file`/`chunk_index`: provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub collection: String,
    pub category: String,
    pub content: String,
    pub category_vector: Vec<f32>,
    pub content_vector: Vec<f32>,
    pub combined_vector: Vec<f32>,
    #[serde(default)]
    pub domain_tags: BTreeSet<String>,
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub chunk_index: usize,
}

impl Fragment {
    /// Dimensionality shared by all three vectors, or `None` when they disagree.
    pub fn dim(&self) -> Option<usize> {
        let d = self.category_vector.len();
        (self.content_vector.len() == d && self.combined_vector.len() == d).then_some(d)
    }
}

/// Query languages with a bundled stop-word table.
///
/// `Unfiltered` is the explicit "no stop-word filtering" variant that every
/// unrecognised language code maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    #[default]
    English,
    German,
    French,
    Spanish,
    Italian,
    Portuguese,
    Dutch,
    Swedish,
    Norwegian,
    Danish,
    Finnish,
    Hungarian,
    Russian,
    Unfiltered,
}

impl Language {
    /// Parse an ISO 639-1 code or English language name. Never fails.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_lowercase().as_str() {
            "en" | "eng" | "english" => Self::English,
            "de" | "deu" | "ger" | "german" | "deutsch" => Self::German,
            "fr" | "fra" | "french" => Self::French,
            "es" | "spa" | "spanish" => Self::Spanish,
            "it" | "ita" | "italian" => Self::Italian,
            "pt" | "por" | "portuguese" => Self::Portuguese,
            "nl" | "nld" | "dutch" => Self::Dutch,
            "sv" | "swe" | "swedish" => Self::Swedish,
            "no" | "nb" | "nor" | "norwegian" => Self::Norwegian,
            "da" | "dan" | "danish" => Self::Danish,
            "fi" | "fin" | "finnish" => Self::Finnish,
            "hu" | "hun" | "hungarian" => Self::Hungarian,
            "ru" | "rus" | "russian" => Self::Russian,
            _ => Self::Unfiltered,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::German => "de",
            Self::French => "fr",
            Self::Spanish => "es",
            Self::Italian => "it",
            Self::Portuguese => "pt",
            Self::Dutch => "nl",
            Self::Swedish => "sv",
            Self::Norwegian => "no",
            Self::Danish => "da",
            Self::Finnish => "fi",
            Self::Hungarian => "hu",
            Self::Russian => "ru",
            Self::Unfiltered => "none",
        }
    }
}

impl From<String> for Language {
    fn from(code: String) -> Self { Self::from_code(&code) }
}

impl From<Language> for String {
    fn from(lang: Language) -> Self { lang.code().to_string() }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.code()) }
}

/// A single retrieval request. Constructed per request and discarded after.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub raw_text: String,
    pub language: Language,
    pub collection: String,
    pub top_k: usize,
    pub min_relevance_score: f32,
    pub domain_filter: BTreeSet<String>,
    pub max_chars_per_fragment: Option<usize>,
}

impl Query {
    pub fn new(raw_text: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            language: Language::default(),
            collection: collection.into(),
            top_k: 5,
            min_relevance_score: 0.0,
            domain_filter: BTreeSet::new(),
            max_chars_per_fragment: None,
        }
    }

    pub fn with_language(mut self, language: Language) -> Self { self.language = language; self }
    pub fn with_top_k(mut self, top_k: usize) -> Self { self.top_k = top_k; self }
    pub fn with_min_relevance(mut self, score: f32) -> Self { self.min_relevance_score = score; self }
    pub fn with_max_chars(mut self, max_chars: Option<usize>) -> Self { self.max_chars_per_fragment = max_chars; self }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain_filter = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Reject queries that can never produce a meaningful ranking.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::InvalidQuery("top_k must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.min_relevance_score) {
            return Err(Error::InvalidQuery(format!(
                "min_relevance_score must be within [0, 1], got {}",
                self.min_relevance_score
            )));
        }
        if self.max_chars_per_fragment == Some(0) {
            return Err(Error::InvalidQuery("max_chars_per_fragment must be positive".into()));
        }
        Ok(())
    }
}

/// A fragment together with its hybrid relevance score for one query.
///
/// `boost` is the sum of the exact, fuzzy and phrase contributions and
/// `final_score = vector_score + boost`. There is no upper bound.
/// `ordinal` is the position of the fragment in the candidate list and
/// serves as the deterministic tie-break when ranking.
#[derive(Debug, Clone, Copy)]
pub struct ScoredFragment<'a> {
    pub fragment: &'a Fragment,
    pub ordinal: usize,
    pub vector_score: f32,
    pub exact_boost: f32,
    pub fuzzy_boost: f32,
    pub phrase_boost: f32,
    pub boost: f32,
    pub final_score: f32,
}
