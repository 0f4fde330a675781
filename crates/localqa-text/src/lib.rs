//! localqa-text
//!
//! Query analysis for the hybrid ranker: tantivy-backed tokenization,
//! per-language stop-word removal with phrase preservation, and the edit
//! distance used by fuzzy matching.

pub mod distance;
pub mod normalize;
pub mod phrases;
pub mod tantivy_utils;

pub use distance::levenshtein;
pub use normalize::{AnalyzedQuery, QueryNormalizer};
pub use phrases::PhraseSet;
