//! localqa-core
//!
//! Domain types, error taxonomy, collaborator traits and the configuration
//! loader shared by the retrieval and inference crates.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use types::{Fragment, Language, Query, ScoredFragment};
