//! localqa-hybrid
//!
//! Turns a query into a ranked, budgeted context string:
//! candidate filter -> hybrid scorer -> context assembler.

pub mod assemble;
pub mod engine;
pub mod filter;
pub mod memory;
pub mod scorer;

pub use assemble::{assemble, rank, truncate_at_boundary};
pub use engine::{HybridSearchEngine, SearchHit};
pub use filter::filter_candidates;
pub use memory::InMemoryFragmentStore;
pub use scorer::{HybridScorer, PreparedQuery};
