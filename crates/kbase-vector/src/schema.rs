use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

/// One row per vector record. `seq` keeps insertion order for tie-breaking,
/// `metadata` holds the record's metadata map as JSON text.
pub fn build_records_schema(dim: usize) -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("id", DataType::Utf8, false),
		Field::new("seq", DataType::Int64, false),
		Field::new("content", DataType::Utf8, false),
		Field::new("metadata", DataType::Utf8, false),
		Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim as i32), true),
	]))
}

pub fn build_meta_schema() -> Arc<Schema> {
	Arc::new(Schema::new(vec![
		Field::new("key", DataType::Utf8, false),
		Field::new("value", DataType::Utf8, false),
		Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
	]))
}
