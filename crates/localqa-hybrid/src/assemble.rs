//! Context assembly: threshold, rank, cap, truncate, format.

use localqa_core::types::{Query, ScoredFragment};

/// Steps 1-3: drop below-threshold fragments, sort by score descending with a
/// stable ordinal tie-break, keep at most `top_k`.
pub fn rank<'a>(query: &Query, scored: Vec<ScoredFragment<'a>>) -> Vec<ScoredFragment<'a>> {
    let mut kept: Vec<ScoredFragment<'a>> =
        scored.into_iter().filter(|s| s.final_score >= query.min_relevance_score).collect();
    kept.sort_by(|a, b| b.final_score.total_cmp(&a.final_score).then(a.ordinal.cmp(&b.ordinal)));
    kept.truncate(query.top_k);
    kept
}

/// The context string for the generator, or `None` when nothing is relevant.
pub fn assemble(query: &Query, scored: Vec<ScoredFragment<'_>>) -> Option<String> {
    let ranked = rank(query, scored);
    if ranked.is_empty() { return None; }
    let mut out = String::new();
    for s in &ranked {
        let content = match query.max_chars_per_fragment {
            Some(max) => truncate_at_boundary(&s.fragment.content, max),
            None => s.fragment.content.as_str(),
        };
        out.push_str(&format_block(s.final_score, &s.fragment.category, content));
    }
    Some(out)
}

pub fn format_block(score: f32, category: &str, content: &str) -> String {
    format!("[Relevance: {score:.3}]\n[{category}]\n{content}\n")
}

/// Cut `text` to at most `max_chars` characters, preferring the last sentence
/// end, then the last word boundary. A single word longer than the budget is
/// kept whole.
pub fn truncate_at_boundary(text: &str, max_chars: usize) -> &str {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else { return text };
    let head = &text[..cut];

    let sentence_end = head.char_indices().rev().find(|&(i, c)| {
        matches!(c, '.' | '!' | '?') && text[i + 1..].chars().next().is_none_or(char::is_whitespace)
    });
    if let Some((i, _)) = sentence_end {
        return &text[..=i];
    }

    if text[cut..].starts_with(char::is_whitespace) {
        let trimmed = head.trim_end();
        if !trimmed.is_empty() { return trimmed; }
    }
    if let Some(i) = head.rfind(char::is_whitespace) {
        let trimmed = head[..i].trim_end();
        if !trimmed.is_empty() { return trimmed; }
    }
    let start = text.len() - text.trim_start().len();
    match text[start..].find(char::is_whitespace) {
        Some(i) => &text[..start + i],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_untouched() {
        assert_eq!(truncate_at_boundary("Roll the dice.", 100), "Roll the dice.");
        assert_eq!(truncate_at_boundary("Roll", 4), "Roll");
    }

    #[test]
    fn prefers_sentence_boundary() {
        let text = "Roll the dice. Move your pawn forward by that many squares.";
        assert_eq!(truncate_at_boundary(text, 30), "Roll the dice.");
    }

    #[test]
    fn falls_back_to_word_boundary() {
        let text = "Roll the dice and move your pawn";
        assert_eq!(truncate_at_boundary(text, 12), "Roll the");
        assert_eq!(truncate_at_boundary(text, 8), "Roll the");
    }

    #[test]
    fn decimal_point_is_not_a_sentence_end() {
        let text = "Each turn lasts 2.5 minutes unless extended";
        assert_eq!(truncate_at_boundary(text, 20), "Each turn lasts 2.5");
    }

    #[test]
    fn overlong_single_word_kept_whole() {
        assert_eq!(truncate_at_boundary("Supercalifragilistic rules", 5), "Supercalifragilistic");
        assert_eq!(truncate_at_boundary("Supercalifragilistic", 5), "Supercalifragilistic");
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let text = "Würfel werfen. Danach zieht man";
        assert_eq!(truncate_at_boundary(text, 20), "Würfel werfen.");
    }

    #[test]
    fn block_format() {
        assert_eq!(format_block(0.87654, "Setup", "Place the board."), "[Relevance: 0.877]\n[Setup]\nPlace the board.\n");
    }
}
