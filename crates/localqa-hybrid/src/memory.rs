use async_trait::async_trait;
use std::collections::BTreeSet;

use localqa_core::traits::FragmentStore;
use localqa_core::types::Fragment;

use crate::filter::filter_candidates;

/// Fragments held in memory, for tests and small embedded corpora.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFragmentStore {
    fragments: Vec<Fragment>,
}

impl InMemoryFragmentStore {
    pub fn new(fragments: Vec<Fragment>) -> Self { Self { fragments } }

    pub fn push(&mut self, fragment: Fragment) { self.fragments.push(fragment); }

    pub fn len(&self) -> usize { self.fragments.len() }

    pub fn is_empty(&self) -> bool { self.fragments.is_empty() }
}

#[async_trait]
impl FragmentStore for InMemoryFragmentStore {
    async fn load_fragments(&self, collection: &str, domain_filter: &BTreeSet<String>) -> localqa_core::Result<Vec<Fragment>> {
        Ok(filter_candidates(&self.fragments, collection, domain_filter).into_iter().cloned().collect())
    }
}
