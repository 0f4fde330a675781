//! Candidate filter: collection membership plus optional domain tags.

use std::collections::BTreeSet;

use localqa_core::types::Fragment;

/// Fragments of `collection` that satisfy every domain term. Input order is kept.
pub fn filter_candidates<'a>(fragments: &'a [Fragment], collection: &str, domain_filter: &BTreeSet<String>) -> Vec<&'a Fragment> {
    fragments
        .iter()
        .filter(|f| f.collection == collection)
        .filter(|f| domain_matches(f, domain_filter))
        .collect()
}

/// Every filter term must match at least one tag. An empty filter admits all.
pub fn domain_matches(fragment: &Fragment, domain_filter: &BTreeSet<String>) -> bool {
    domain_filter
        .iter()
        .filter(|term| !term.trim().is_empty())
        .all(|term| fragment.domain_tags.iter().any(|tag| terms_match(term, tag)))
}

/// Word-wise comparison tolerant of simple English plurals.
pub fn terms_match(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let aw: Vec<&str> = a.split_whitespace().collect();
    let bw: Vec<&str> = b.split_whitespace().collect();
    aw.len() == bw.len() && aw.iter().zip(&bw).all(|(x, y)| words_match(x, y))
}

fn words_match(a: &str, b: &str) -> bool {
    let fa = singular_forms(a);
    let fb = singular_forms(b);
    fa.iter().any(|x| fb.contains(x))
}

/// The word itself plus its plausible singulars (`-ies`, `-es`, `-s`).
fn singular_forms(word: &str) -> Vec<String> {
    let mut forms = vec![word.to_string()];
    if word.len() > 3 && word.ends_with("ies") {
        forms.push(format!("{}y", &word[..word.len() - 3]));
    }
    if word.len() > 3 && word.ends_with("es") {
        forms.push(word[..word.len() - 2].to_string());
    }
    if word.len() > 2 && word.ends_with('s') && !word.ends_with("ss") {
        forms.push(word[..word.len() - 1].to_string());
    }
    forms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plural_forms() {
        assert!(terms_match("card", "Cards"));
        assert!(terms_match("story", "stories"));
        assert!(terms_match("box", "boxes"));
        assert!(terms_match("board game", "board games"));
        assert!(terms_match("house", "houses"));
        assert!(!terms_match("glass", "glas"));
        assert!(!terms_match("card", "cardboard"));
        assert!(!terms_match("board", "board game"));
    }
}
