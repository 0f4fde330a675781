//! `FragmentStore` over a single LanceDB table.
//!
//! Fragments are written once by import and only read afterwards. Loading
//! pushes the collection predicate down to Lance; domain filtering stays
//! with the caller's candidate filter.

use anyhow::{anyhow, Result};
use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::Connection;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use localqa_core::error::Error;
use localqa_core::traits::FragmentStore;
use localqa_core::types::Fragment;

use crate::schema::{build_fragment_schema, TAG_SEPARATOR};
use crate::table::{ensure_table, open_db, sql_literal, table_exists};

pub struct LanceFragmentStore {
    db: Connection,
    table_name: String,
    dim: usize,
}

impl LanceFragmentStore {
    pub async fn open(uri: &str, table_name: &str, dim: usize) -> Result<Self> {
        if dim == 0 || i32::try_from(dim).is_err() {
            return Err(Error::InvalidConfig(format!("unsupported embedding dimension {dim}")).into());
        }
        let db = open_db(uri).await?;
        Ok(Self { db, table_name: table_name.to_string(), dim })
    }

    pub fn dim(&self) -> usize { self.dim }

    fn dim_i32(&self) -> i32 { i32::try_from(self.dim).unwrap_or(i32::MAX) }

    /// Append fragments, creating the table on first use.
    pub async fn add_fragments(&self, fragments: &[Fragment]) -> Result<usize> {
        if fragments.is_empty() { return Ok(0); }
        for f in fragments {
            match f.dim() {
                Some(d) if d == self.dim => {}
                Some(d) => return Err(Error::DimensionMismatch { expected: self.dim, actual: d }.into()),
                None => return Err(Error::InvalidQuery(format!("fragment '{}' has vectors of differing length", f.id)).into()),
            }
        }
        let schema = build_fragment_schema(self.dim_i32());
        ensure_table(&self.db, &self.table_name, schema.clone()).await?;
        let batch = self.fragments_to_record_batch(fragments)?;
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        self.db.open_table(&self.table_name).execute().await?.add(reader).execute().await?;
        info!(table = %self.table_name, count = fragments.len(), "fragments added");
        Ok(fragments.len())
    }

    pub async fn count(&self) -> Result<usize> {
        if !table_exists(&self.db, &self.table_name).await? { return Ok(0); }
        let table = self.db.open_table(&self.table_name).execute().await?;
        Ok(table.count_rows(None).await?)
    }

    /// All fragments of one collection, in storage order.
    pub async fn load_collection(&self, collection: &str) -> Result<Vec<Fragment>> {
        if !table_exists(&self.db, &self.table_name).await? { return Ok(Vec::new()); }
        let table = self.db.open_table(&self.table_name).execute().await?;
        let mut stream = table.query().only_if(format!("collection = {}", sql_literal(collection))).execute().await?;
        let mut out = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            out.extend(batch_to_fragments(&batch)?);
        }
        debug!(collection, loaded = out.len(), "fragments loaded");
        Ok(out)
    }

    fn fragments_to_record_batch(&self, fragments: &[Fragment]) -> Result<RecordBatch> {
        let to_list = |v: &Vec<f32>| Some(v.iter().map(|&x| Some(x)).collect::<Vec<Option<f32>>>());
        let ids: Vec<String> = fragments.iter().map(|f| f.id.clone()).collect();
        let collections: Vec<String> = fragments.iter().map(|f| f.collection.clone()).collect();
        let categories: Vec<String> = fragments.iter().map(|f| f.category.clone()).collect();
        let contents: Vec<String> = fragments.iter().map(|f| f.content.clone()).collect();
        let category_vectors: Vec<_> = fragments.iter().map(|f| to_list(&f.category_vector)).collect();
        let content_vectors: Vec<_> = fragments.iter().map(|f| to_list(&f.content_vector)).collect();
        let combined_vectors: Vec<_> = fragments.iter().map(|f| to_list(&f.combined_vector)).collect();
        let tags: Vec<String> = fragments
            .iter()
            .map(|f| f.domain_tags.iter().map(String::as_str).collect::<Vec<_>>().join(&TAG_SEPARATOR.to_string()))
            .collect();
        let sources: Vec<String> = fragments.iter().map(|f| f.source_file.clone()).collect();
        let chunk_indices: Vec<i32> = fragments.iter().map(|f| i32::try_from(f.chunk_index).unwrap_or(i32::MAX)).collect();
        let dim = self.dim_i32();
        let record_batch = RecordBatch::try_new(build_fragment_schema(dim), vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(collections)),
            Arc::new(StringArray::from(categories)),
            Arc::new(StringArray::from(contents)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(category_vectors.into_iter(), dim)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(content_vectors.into_iter(), dim)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(combined_vectors.into_iter(), dim)),
            Arc::new(StringArray::from(tags)),
            Arc::new(StringArray::from(sources)),
            Arc::new(Int32Array::from(chunk_indices)),
        ])?;
        Ok(record_batch)
    }
}

#[async_trait]
impl FragmentStore for LanceFragmentStore {
    async fn load_fragments(&self, collection: &str, _domain_filter: &BTreeSet<String>) -> localqa_core::Result<Vec<Fragment>> {
        self.load_collection(collection).await.map_err(|e| Error::Storage(e.to_string()))
    }
}

fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("{name} column missing"))
}

fn vector_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a FixedSizeListArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| anyhow!("{name} column missing"))
}

fn read_vector(col: &FixedSizeListArray, i: usize) -> Vec<f32> {
    if col.is_null(i) { return Vec::new(); }
    col.value(i).as_primitive::<Float32Type>().values().to_vec()
}

fn batch_to_fragments(batch: &RecordBatch) -> Result<Vec<Fragment>> {
    let ids = string_col(batch, "id")?;
    let collections = string_col(batch, "collection")?;
    let categories = string_col(batch, "category")?;
    let contents = string_col(batch, "content")?;
    let category_vectors = vector_col(batch, "category_vector")?;
    let content_vectors = vector_col(batch, "content_vector")?;
    let combined_vectors = vector_col(batch, "combined_vector")?;
    let tags = string_col(batch, "domain_tags")?;
    let sources = string_col(batch, "source_file")?;
    let chunk_indices = batch
        .column_by_name("chunk_index")
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| anyhow!("chunk_index column missing"))?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        out.push(Fragment {
            id: ids.value(i).to_string(),
            collection: collections.value(i).to_string(),
            category: categories.value(i).to_string(),
            content: contents.value(i).to_string(),
            category_vector: read_vector(category_vectors, i),
            content_vector: read_vector(content_vectors, i),
            combined_vector: read_vector(combined_vectors, i),
            domain_tags: tags.value(i).split(TAG_SEPARATOR).filter(|t| !t.is_empty()).map(str::to_string).collect(),
            source_file: sources.value(i).to_string(),
            chunk_index: usize::try_from(chunk_indices.value(i)).unwrap_or(0),
        });
    }
    Ok(out)
}
