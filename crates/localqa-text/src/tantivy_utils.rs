use localqa_core::types::Language;
use tantivy::tokenizer::{Language as TantivyLanguage, LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer, TokenStream};

/// Split on non-alphanumeric characters and lower-case.
pub fn plain_analyzer() -> TextAnalyzer {
	TextAnalyzer::builder(SimpleTokenizer::default()).filter(LowerCaser).build()
}

/// Same tokenization as [`plain_analyzer`] with the language's stop words
/// removed. `None` for [`Language::Unfiltered`].
pub fn stop_word_analyzer(language: Language, extra_stop_words: &[String]) -> Option<TextAnalyzer> {
	let extras = StopWordFilter::remove(extra_stop_words.iter().map(|w| w.to_lowercase()));
	let bundled = tantivy_language(language).and_then(StopWordFilter::new);
	let analyzer = match bundled {
		Some(bundled) => TextAnalyzer::builder(SimpleTokenizer::default()).filter(LowerCaser).filter(bundled).filter(extras).build(),
		None if language == Language::Unfiltered => return None,
		None => TextAnalyzer::builder(SimpleTokenizer::default()).filter(LowerCaser).filter(extras).build(),
	};
	Some(analyzer)
}

fn tantivy_language(language: Language) -> Option<TantivyLanguage> {
	Some(match language {
		Language::English => TantivyLanguage::English,
		Language::German => TantivyLanguage::German,
		Language::French => TantivyLanguage::French,
		Language::Spanish => TantivyLanguage::Spanish,
		Language::Italian => TantivyLanguage::Italian,
		Language::Portuguese => TantivyLanguage::Portuguese,
		Language::Dutch => TantivyLanguage::Dutch,
		Language::Swedish => TantivyLanguage::Swedish,
		Language::Norwegian => TantivyLanguage::Norwegian,
		Language::Danish => TantivyLanguage::Danish,
		Language::Finnish => TantivyLanguage::Finnish,
		Language::Hungarian => TantivyLanguage::Hungarian,
		Language::Russian => TantivyLanguage::Russian,
		Language::Unfiltered => return None,
	})
}

/// Run `analyzer` over `text`, returning `(position, token)` pairs.
pub fn positioned_tokens(analyzer: &TextAnalyzer, text: &str) -> Vec<(usize, String)> {
	// token_stream needs &mut; analyzers are cheap to clone
	let mut analyzer = analyzer.clone();
	let mut stream = analyzer.token_stream(text);
	let mut out = Vec::new();
	while stream.advance() { let t = stream.token(); out.push((t.position, t.text.clone())); }
	out
}

/// Tokens only, in order.
pub fn tokens(analyzer: &TextAnalyzer, text: &str) -> Vec<String> {
	positioned_tokens(analyzer, text).into_iter().map(|(_, t)| t).collect()
}
