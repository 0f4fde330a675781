//! Query normalization: tokenize, lower-case and drop language filler words
//! while keeping the words of important phrases the query shares with a
//! candidate's category.

use std::collections::HashSet;

use localqa_core::types::Language;
use tantivy::tokenizer::TextAnalyzer;

use crate::phrases::{Phrase, PhraseSet};
use crate::tantivy_utils::{plain_analyzer, positioned_tokens, stop_word_analyzer, tokens};

#[derive(Clone)]
pub struct QueryNormalizer {
    language: Language,
    plain: TextAnalyzer,
    stop: Option<TextAnalyzer>,
    phrases: PhraseSet,
}

impl QueryNormalizer {
    pub fn new<I, S>(language: Language, extra_stop_words: &[String], important_phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let plain = plain_analyzer();
        let stop = stop_word_analyzer(language, extra_stop_words);
        let phrases = PhraseSet::new(important_phrases, &plain, stop.as_ref());
        Self { language, plain, stop, phrases }
    }

    pub fn language(&self) -> Language { self.language }
    pub fn phrases(&self) -> &PhraseSet { &self.phrases }

    /// Lower-cased words of `text` with no filtering; used for categories.
    pub fn words(&self, text: &str) -> Vec<String> { tokens(&self.plain, text) }

    pub fn analyze(&self, raw: &str) -> AnalyzedQuery {
        let all = positioned_tokens(&self.plain, raw);
        let kept: Option<HashSet<usize>> = self.stop.as_ref().map(|stop| positioned_tokens(stop, raw).into_iter().map(|(pos, _)| pos).collect());
        let tokens: Vec<QueryToken> = all
            .into_iter()
            .map(|(pos, text)| {
                let stop = kept.as_ref().is_some_and(|kept| !kept.contains(&pos));
                QueryToken { text, stop }
            })
            .collect();
        let words: Vec<String> = tokens.iter().map(|t| t.text.clone()).collect();
        let phrases = self.phrases.found_in_query(&words).into_iter().filter_map(|i| self.phrases.get(i).cloned()).collect();
        AnalyzedQuery { lowered: raw.trim().to_lowercase(), tokens, phrases }
    }

    /// Keyword string with filler words removed. Never empty for non-blank input.
    pub fn normalize(&self, raw: &str) -> String { self.analyze(raw).keyword_string() }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryToken {
    pub text: String,
    pub stop: bool,
}

/// A query split into tokens with stop-word flags and the important phrases
/// it contains verbatim.
#[derive(Debug, Clone)]
pub struct AnalyzedQuery {
    lowered: String,
    tokens: Vec<QueryToken>,
    phrases: Vec<Phrase>,
}

impl AnalyzedQuery {
    pub fn tokens(&self) -> &[QueryToken] { &self.tokens }
    pub fn phrases(&self) -> &[Phrase] { &self.phrases }

    /// Every word of the original query, unfiltered.
    pub fn words(&self) -> Vec<String> { self.tokens.iter().map(|t| t.text.clone()).collect() }

    /// Keywords with all stop words removed.
    pub fn keywords(&self) -> Vec<String> { self.select(|_| false) }

    /// Keywords for comparison against one category: words of phrases that
    /// occur in both the query and the category are exempt from removal.
    pub fn keywords_for(&self, category_words: &[String]) -> Vec<String> {
        let preserved: HashSet<&str> = self
            .phrases
            .iter()
            .filter(|p| p.loosely_occurs_in(category_words))
            .flat_map(|p| p.words.iter().map(String::as_str))
            .collect();
        self.select(|t| preserved.contains(t.text.as_str()))
    }

    /// True when an important phrase of the query also occurs in the category.
    pub fn shares_phrase_with(&self, category_words: &[String]) -> bool {
        self.phrases.iter().any(|p| p.loosely_occurs_in(category_words))
    }

    pub fn keyword_string(&self) -> String {
        let kept: Vec<&str> = self.tokens.iter().filter(|t| !t.stop).map(|t| t.text.as_str()).collect();
        if kept.is_empty() { self.lowered.clone() } else { kept.join(" ") }
    }

    fn select(&self, exempt: impl Fn(&QueryToken) -> bool) -> Vec<String> {
        let kept: Vec<String> = self.tokens.iter().filter(|t| !t.stop || exempt(t)).map(|t| t.text.clone()).collect();
        if !kept.is_empty() { return kept; }
        // filtering removed everything: fall back to the unfiltered words
        if self.tokens.is_empty() {
            if self.lowered.is_empty() { Vec::new() } else { vec![self.lowered.clone()] }
        } else {
            self.words()
        }
    }
}
