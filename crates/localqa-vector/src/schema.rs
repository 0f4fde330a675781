use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// Separator for the flattened `domain_tags` column.
pub const TAG_SEPARATOR: char = '|';

fn vector_field(name: &str, dim: i32) -> Field {
	Field::new(name, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true)
}

pub fn build_fragment_schema(dim: i32) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("collection", DataType::Utf8, false),
		Field::new("category", DataType::Utf8, false),
		Field::new("content", DataType::Utf8, false),
		vector_field("category_vector", dim),
		vector_field("content_vector", dim),
		vector_field("combined_vector", dim),
		Field::new("domain_tags", DataType::Utf8, false),
		Field::new("source_file", DataType::Utf8, false),
		Field::new("chunk_index", DataType::Int32, false),
	]))
}
