use localqa_core::config::RetrievalSettings;
use localqa_core::traits::Embedder;
use localqa_core::types::{Fragment, Query};
use localqa_embed::HashEmbedder;
use localqa_hybrid::scorer::{FUZZY_DISTANCE_1_BOOST, PHRASE_BOOST};
use localqa_hybrid::{assemble, HybridScorer, HybridSearchEngine, InMemoryFragmentStore};
use localqa_text::QueryNormalizer;

const DIM: usize = 64;

fn fragment(id: &str, category: &str, content: &str, tags: &[&str]) -> Fragment {
    let e = HashEmbedder::new(DIM);
    Fragment {
        id: id.to_string(),
        collection: "rules".to_string(),
        category: category.to_string(),
        content: content.to_string(),
        category_vector: e.embed(category).unwrap(),
        content_vector: e.embed(content).unwrap(),
        combined_vector: e.embed(&format!("{category}\n{content}")).unwrap(),
        domain_tags: tags.iter().map(|t| t.to_string()).collect(),
        source_file: "rules.txt".to_string(),
        chunk_index: 0,
    }
}

fn zero_fragment(id: &str, category: &str, content: &str) -> Fragment {
    Fragment {
        category_vector: vec![0.0; DIM],
        content_vector: vec![0.0; DIM],
        combined_vector: vec![0.0; DIM],
        ..fragment(id, category, content, &[])
    }
}

fn scorer() -> HybridScorer {
    let settings = RetrievalSettings::default();
    HybridScorer::new(QueryNormalizer::new(
        settings.language,
        &settings.extra_stop_words_for(settings.language),
        settings.important_phrases.iter(),
    ))
}

fn engine(fragments: Vec<Fragment>) -> HybridSearchEngine<InMemoryFragmentStore> {
    let settings = RetrievalSettings { collection: "rules".into(), ..RetrievalSettings::default() };
    HybridSearchEngine::new(InMemoryFragmentStore::new(fragments), Box::new(HashEmbedder::new(DIM)), settings)
}

fn block_count(context: &str) -> usize { context.matches("[Relevance: ").count() }

fn block_scores(context: &str) -> Vec<f32> {
    context
        .lines()
        .filter_map(|l| l.strip_prefix("[Relevance: ").and_then(|r| r.strip_suffix(']')))
        .map(|s| s.parse().unwrap())
        .collect()
}

#[test]
fn phrase_boost_lifts_matching_category() {
    let s = scorer();
    let q = s.prepare("how to win", HashEmbedder::new(DIM).embed("how to win").unwrap());
    let winning = fragment("w", "Winning Conditions", "Reach level 10 first to win the game.", &[]);
    let setup = fragment("s", "Setup", "Place the board in the middle of the table.", &[]);

    let sw = s.score_fragment(&q, &winning, 0);
    let ss = s.score_fragment(&q, &setup, 1);
    assert_eq!(sw.phrase_boost, PHRASE_BOOST);
    assert_eq!(ss.phrase_boost, 0.0);
    assert!(sw.final_score > ss.final_score, "{} vs {}", sw.final_score, ss.final_score);
}

#[test]
fn typo_gets_fuzzy_boost() {
    let s = scorer();
    let q = s.prepare("adaptr", vec![0.0; DIM]);
    let f = zero_fragment("a", "Adapter", "Use the travel adapter for the charger.");
    let scored = s.score_fragment(&q, &f, 0);
    assert_eq!(scored.fuzzy_boost, FUZZY_DISTANCE_1_BOOST);
    assert_eq!(scored.exact_boost, 0.0);
    assert!((scored.final_score - FUZZY_DISTANCE_1_BOOST).abs() < 1e-6);
}

#[test]
fn boosts_never_lower_the_vector_score() {
    let s = scorer();
    let e = HashEmbedder::new(DIM);
    let fragments = [
        fragment("1", "Winning Conditions", "Reach level 10.", &[]),
        fragment("2", "Setup", "Place the board.", &[]),
        fragment("3", "Card Sleeves", "Sleeves are optional.", &[]),
    ];
    for text in ["how to win", "setup the board", "sleves", "zzz"] {
        let q = s.prepare(text, e.embed(text).unwrap());
        for f in &fragments {
            let scored = s.score_fragment(&q, f, 0);
            assert!(scored.boost >= 0.0);
            assert!(scored.final_score >= scored.vector_score);
        }
    }
}

#[test]
fn scoring_is_deterministic() {
    let s = scorer();
    let q = s.prepare("how do i win", HashEmbedder::new(DIM).embed("how do i win").unwrap());
    let f = fragment("w", "Winning Conditions", "Reach level 10 first.", &[]);
    assert_eq!(s.score(&q, &f).to_bits(), s.score(&q, &f).to_bits());
}

#[test]
fn assemble_returns_none_above_every_score() {
    let s = scorer();
    let q = s.prepare("shuffle", vec![0.0; DIM]);
    let a = zero_fragment("a", "Setup", "Place the board.");
    let b = zero_fragment("b", "Scoring", "Count your points.");
    let scored = s.score_all(&q, &[&a, &b]);
    let query = Query::new("shuffle", "rules").with_min_relevance(0.9);
    assert!(assemble(&query, scored).is_none());
}

#[test]
fn ties_keep_candidate_order() {
    let s = scorer();
    let q = s.prepare("dice", vec![0.0; DIM]);
    let a = zero_fragment("a", "Dice", "First.");
    let b = zero_fragment("b", "Dice", "Second.");
    let query = Query::new("dice", "rules");
    let context = assemble(&query, s.score_all(&q, &[&a, &b])).expect("context");
    assert!(context.find("First.").unwrap() < context.find("Second.").unwrap());
}

#[tokio::test]
async fn search_prefers_phrase_match() {
    let engine = engine(vec![
        fragment("s", "Setup", "Place the board in the middle of the table.", &[]),
        fragment("w", "Winning Conditions", "Reach level 10 first to win the game.", &[]),
    ]);
    let query = engine.query("How to win?").with_min_relevance(0.0);
    let context = engine.search(&query).await.unwrap().expect("context");
    assert!(context.starts_with("[Relevance: "));
    let win = context.find("[Winning Conditions]").expect("winning block");
    if let Some(setup) = context.find("[Setup]") {
        assert!(win < setup);
    }
}

#[tokio::test]
async fn search_respects_top_k_and_threshold() {
    let fragments: Vec<Fragment> =
        (0..10).map(|i| fragment(&i.to_string(), &format!("Dice rule {i}"), "Roll two dice.", &[])).collect();
    let engine = engine(fragments);

    let query = engine.query("dice").with_top_k(3).with_min_relevance(0.2);
    let context = engine.search(&query).await.unwrap().expect("context");
    assert_eq!(block_count(&context), 3);
    let scores = block_scores(&context);
    assert!(scores.iter().all(|&s| s >= 0.2));
    assert!(scores.windows(2).all(|w| w[0] >= w[1]), "descending: {scores:?}");

    let hits = engine.hits(&query).await.unwrap();
    assert_eq!(hits.len(), 3);
}

#[tokio::test]
async fn search_is_deterministic() {
    let engine = engine(vec![
        fragment("a", "Winning Conditions", "Reach level 10.", &[]),
        fragment("b", "Setup", "Place the board.", &[]),
        fragment("c", "Turn Order", "Play clockwise.", &[]),
    ]);
    let query = engine.query("who goes first in turn order").with_min_relevance(0.0);
    let first = engine.search(&query).await.unwrap();
    let second = engine.search(&query).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn search_applies_domain_filter_and_collection() {
    let mut other = fragment("x", "Dice", "Roll a die.", &["expansion"]);
    other.collection = "faq".into();
    let engine = engine(vec![
        fragment("base", "Dice", "Roll two dice.", &["base game"]),
        fragment("exp", "Dice", "Roll three dice.", &["Expansions"]),
        other,
    ]);
    let query = engine.query("dice").with_min_relevance(0.0).with_domains(["expansion"]);
    let context = engine.search(&query).await.unwrap().expect("context");
    assert_eq!(block_count(&context), 1);
    assert!(context.contains("Roll three dice."));

    let none = engine.query("dice").with_domains(["promo"]);
    assert!(engine.search(&none).await.unwrap().is_none());
}

#[tokio::test]
async fn search_truncates_long_content() {
    let long = "Roll the dice. ".repeat(40);
    let engine = engine(vec![fragment("d", "Dice", &long, &[])]);
    let query = engine.query("dice").with_min_relevance(0.0).with_max_chars(Some(50));
    let context = engine.search(&query).await.unwrap().expect("context");
    let body = context.lines().nth(2).unwrap();
    assert!(body.chars().count() <= 50);
    assert!(body.ends_with('.'));
}

#[tokio::test]
async fn search_rejects_invalid_query_and_dimension_mismatch() {
    let engine = engine(vec![fragment("d", "Dice", "Roll.", &[])]);
    assert!(engine.search(&engine.query("dice").with_top_k(0)).await.is_err());

    let mut short = fragment("s", "Dice", "Roll.", &[]);
    short.category_vector.truncate(8);
    short.content_vector.truncate(8);
    short.combined_vector.truncate(8);
    let engine = self::engine(vec![short]);
    assert!(engine.search(&engine.query("dice")).await.is_err());
}

#[tokio::test]
async fn empty_collection_yields_none() {
    let engine = engine(Vec::new());
    let query = engine.query("anything");
    assert_eq!(engine.search(&query).await.unwrap(), None);
}
