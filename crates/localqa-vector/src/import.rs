//! JSON-lines fragment import.
//!
//! One object per line. Vectors are optional; missing ones are computed with
//! the supplied embedder from the category, the content, and
//! `category + "\n" + content` respectively.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use localqa_core::traits::Embedder;
use localqa_core::types::Fragment;

#[derive(Debug, Clone, Deserialize)]
pub struct FragmentRecord {
    pub id: Option<String>,
    pub collection: Option<String>,
    pub category: String,
    pub content: String,
    pub category_vector: Option<Vec<f32>>,
    pub content_vector: Option<Vec<f32>>,
    pub combined_vector: Option<Vec<f32>>,
    #[serde(default)]
    pub domain_tags: BTreeSet<String>,
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub chunk_index: usize,
}

pub fn read_jsonl(path: &Path, default_collection: &str, embedder: &dyn Embedder) -> Result<Vec<Fragment>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut records = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() { continue; }
        let record: FragmentRecord = serde_json::from_str(line).with_context(|| format!("{}:{}", path.display(), line_no + 1))?;
        records.push((line_no, record));
    }
    records.into_iter().map(|(line_no, r)| into_fragment(r, line_no, default_collection, embedder)).collect()
}

fn into_fragment(r: FragmentRecord, line_no: usize, default_collection: &str, embedder: &dyn Embedder) -> Result<Fragment> {
    let id = r.id.unwrap_or_else(|| {
        if r.source_file.is_empty() { format!("line:{}", line_no + 1) } else { format!("{}:{}", r.source_file, r.chunk_index) }
    });
    let category_vector = match r.category_vector { Some(v) => v, None => embedder.embed(&r.category)? };
    let content_vector = match r.content_vector { Some(v) => v, None => embedder.embed(&r.content)? };
    let combined_vector = match r.combined_vector { Some(v) => v, None => embedder.embed(&format!("{}\n{}", r.category, r.content))? };
    Ok(Fragment {
        id,
        collection: r.collection.unwrap_or_else(|| default_collection.to_string()),
        category: r.category,
        content: r.content,
        category_vector,
        content_vector,
        combined_vector,
        domain_tags: r.domain_tags.into_iter().map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty()).collect(),
        source_file: r.source_file,
        chunk_index: r.chunk_index,
    })
}
