//! Bundled offline embedder.
//!
//! Real embedding models live outside this workspace; anything implementing
//! `localqa_core::traits::Embedder` can be plugged into search and import.
//! `HashEmbedder` is the deterministic token-hash fallback used for
//! development, tests and fully offline demos.

use anyhow::{anyhow, Result};
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use localqa_core::config::EmbeddingSettings;
use localqa_core::traits::Embedder;

pub struct HashEmbedder { dim: usize }

impl HashEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim } }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let token = token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            if token.is_empty() { continue; }
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = usize::try_from(h % self.dim as u64).unwrap_or(0);
            let val = f32::from((h >> 48) as u16) / f32::from(u16::MAX);
            v[idx] += val + (i % 3) as f32 * 0.01;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-6 { for x in &mut v { *x /= norm; } }
        v
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.dim == 0 {
            return Err(anyhow!("Hash embedder needs a positive dimension"));
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Pick the embedder named by `settings.provider`.
///
/// `APP_USE_FAKE_EMBEDDINGS=1` forces the hash embedder regardless of the
/// configured provider.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Box<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    if use_fake || settings.provider == "hash" {
        if settings.dim == 0 {
            return Err(anyhow!("embedding.dim must be positive"));
        }
        tracing::debug!(dim = settings.dim, "using hash embedder");
        return Ok(Box::new(HashEmbedder::new(settings.dim)));
    }
    Err(anyhow!("Unknown embedding provider '{}'", settings.provider))
}
