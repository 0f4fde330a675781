use std::time::Instant;

use tracing::{debug, info};

use localqa_core::config::RetrievalSettings;
use localqa_core::error::{Error, Result};
use localqa_core::traits::{Embedder, FragmentStore};
use localqa_core::types::{Fragment, Query};
use localqa_text::QueryNormalizer;

use crate::assemble::{assemble, rank};
use crate::filter::filter_candidates;
use crate::scorer::HybridScorer;

/// One ranked fragment, detached from the loaded candidate set.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub fragment: Fragment,
    pub vector_score: f32,
    pub boost: f32,
    pub final_score: f32,
}

pub struct HybridSearchEngine<S: FragmentStore> {
    store: S,
    embedder: Box<dyn Embedder>,
    settings: RetrievalSettings,
}

impl<S: FragmentStore> HybridSearchEngine<S> {
    pub fn new(store: S, embedder: Box<dyn Embedder>, settings: RetrievalSettings) -> Self {
        Self { store, embedder, settings }
    }

    pub fn store(&self) -> &S { &self.store }

    pub fn settings(&self) -> &RetrievalSettings { &self.settings }

    /// A query carrying the configured defaults.
    pub fn query(&self, raw: impl Into<String>) -> Query {
        Query::new(raw, self.settings.collection.clone())
            .with_language(self.settings.language)
            .with_top_k(self.settings.top_k)
            .with_min_relevance(self.settings.min_relevance_score)
            .with_max_chars(self.settings.max_chars_per_fragment)
    }

    pub fn normalizer_for(&self, query: &Query) -> QueryNormalizer {
        let extras = self.settings.extra_stop_words_for(query.language);
        QueryNormalizer::new(query.language, &extras, self.settings.important_phrases.iter())
    }

    /// Ranked, budgeted context for `query`, or `None` when nothing clears the threshold.
    pub async fn search(&self, query: &Query) -> Result<Option<String>> {
        query.validate()?;
        let started = Instant::now();
        let fragments = self.store.load_fragments(&query.collection, &query.domain_filter).await?;
        let candidates = filter_candidates(&fragments, &query.collection, &query.domain_filter);
        let scorer = HybridScorer::new(self.normalizer_for(query));
        let prepared = scorer.prepare(&query.raw_text, self.embed_query(&query.raw_text)?);
        check_dims(&candidates, prepared.embedding.len())?;

        let scored = scorer.score_all(&prepared, &candidates);
        let context = assemble(query, scored);
        info!(
            collection = %query.collection,
            candidates = candidates.len(),
            found = context.is_some(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "search complete"
        );
        Ok(context)
    }

    /// Same ranking as [`search`](Self::search) without the formatting step.
    pub async fn hits(&self, query: &Query) -> Result<Vec<SearchHit>> {
        query.validate()?;
        let fragments = self.store.load_fragments(&query.collection, &query.domain_filter).await?;
        let candidates = filter_candidates(&fragments, &query.collection, &query.domain_filter);
        let scorer = HybridScorer::new(self.normalizer_for(query));
        let prepared = scorer.prepare(&query.raw_text, self.embed_query(&query.raw_text)?);
        check_dims(&candidates, prepared.embedding.len())?;

        let ranked = rank(query, scorer.score_all(&prepared, &candidates));
        for s in &ranked {
            debug!(
                id = %s.fragment.id,
                vector = s.vector_score,
                exact = s.exact_boost,
                fuzzy = s.fuzzy_boost,
                phrase = s.phrase_boost,
                score = s.final_score,
                "ranked"
            );
        }
        Ok(ranked
            .into_iter()
            .map(|s| SearchHit {
                fragment: s.fragment.clone(),
                vector_score: s.vector_score,
                boost: s.boost,
                final_score: s.final_score,
            })
            .collect())
    }

    fn embed_query(&self, raw: &str) -> Result<Vec<f32>> {
        let v = self.embedder.embed(raw).map_err(|e| Error::Operation(format!("embedding query: {e}")))?;
        if v.len() != self.embedder.dim() {
            return Err(Error::DimensionMismatch { expected: self.embedder.dim(), actual: v.len() });
        }
        Ok(v)
    }
}

fn check_dims(candidates: &[&Fragment], expected: usize) -> Result<()> {
    for f in candidates {
        match f.dim() {
            Some(d) if d == expected => {}
            Some(d) => return Err(Error::DimensionMismatch { expected, actual: d }),
            None => return Err(Error::Storage(format!("fragment '{}' has vectors of differing length", f.id))),
        }
    }
    Ok(())
}
