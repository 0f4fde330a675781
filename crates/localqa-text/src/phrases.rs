use tantivy::tokenizer::TextAnalyzer;

use crate::tantivy_utils::{positioned_tokens, tokens};

/// An important multi-word phrase, e.g. "how to win".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrase {
    /// Lower-cased words of the phrase.
    pub words: Vec<String>,
    /// The words that survive stop-word removal; used for loose matching.
    pub content_words: Vec<String>,
}

impl Phrase {
    pub fn text(&self) -> String { self.words.join(" ") }

    /// Verbatim occurrence as a word sequence.
    pub fn occurs_in(&self, words: &[String]) -> bool {
        !self.words.is_empty() && words.windows(self.words.len()).any(|w| w == self.words.as_slice())
    }

    /// Verbatim occurrence, or every content word stem-matches some word
    /// (`"how to win"` matches `"winning conditions"`).
    pub fn loosely_occurs_in(&self, words: &[String]) -> bool {
        if self.occurs_in(words) { return true; }
        !self.content_words.is_empty()
            && self.content_words.iter().all(|cw| words.iter().any(|w| w.starts_with(cw.as_str())))
    }
}

#[derive(Debug, Clone, Default)]
pub struct PhraseSet {
    phrases: Vec<Phrase>,
}

impl PhraseSet {
    pub fn new<I, S>(phrases: I, plain: &TextAnalyzer, stop: Option<&TextAnalyzer>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .filter_map(|p| {
                let words = tokens(plain, p.as_ref());
                if words.is_empty() { return None; }
                let content_words = match stop {
                    Some(stop) => positioned_tokens(stop, p.as_ref()).into_iter().map(|(_, t)| t).collect(),
                    None => words.clone(),
                };
                Some(Phrase { words, content_words })
            })
            .collect();
        Self { phrases }
    }

    pub fn len(&self) -> usize { self.phrases.len() }
    pub fn is_empty(&self) -> bool { self.phrases.is_empty() }
    pub fn get(&self, idx: usize) -> Option<&Phrase> { self.phrases.get(idx) }

    /// Indices of phrases that occur verbatim in the given query words.
    pub fn found_in_query(&self, query_words: &[String]) -> Vec<usize> {
        self.phrases.iter().enumerate().filter(|(_, p)| p.occurs_in(query_words)).map(|(i, _)| i).collect()
    }
}
