//! localqa-vector
//!
//! LanceDB-backed fragment storage: the arrow schema, table helpers, the
//! `FragmentStore` implementation used by search, and JSON-lines import.

pub mod import;
pub mod schema;
pub mod store;
pub mod table;

pub use import::{read_jsonl, FragmentRecord};
pub use store::LanceFragmentStore;
