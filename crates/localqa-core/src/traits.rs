use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::types::Fragment;

/// Opaque text-to-vector function supplied by an embedding backend.
///
/// Implementations must return L2-normalized vectors of `dim()` length.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))
    }
}

/// Read access to stored fragments.
///
/// `domain_filter` is a hint: stores may pre-filter by it, callers still run
/// the candidate filter over the result.
#[async_trait]
pub trait FragmentStore: Send + Sync {
    async fn load_fragments(&self, collection: &str, domain_filter: &BTreeSet<String>) -> crate::Result<Vec<Fragment>>;
}
