use async_trait::async_trait;

use crate::error::Result;
use crate::filter::MetadataFilter;
use crate::types::{IndexStats, ParsedDocument, SearchHit, VectorRecord};

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    /// Maximum input length in characters; longer inputs are truncated.
    fn max_len(&self) -> usize;
    /// Load whatever the embedder needs. Safe to call repeatedly.
    async fn initialize(&self) -> Result<()> { Ok(()) }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop().ok_or_else(|| crate::error::Error::upstream("embedder returned no vector"))
    }
}

/// A single collection's vector store.
///
/// Implementations serialise their own mutations: `insert` and `delete`
/// return only after the new state has been flushed to whatever backs it.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dim(&self) -> usize;
    /// Insert or overwrite records. All-or-nothing: a record with the wrong
    /// dimension rejects the whole batch.
    async fn insert(&self, records: Vec<VectorRecord>) -> Result<()>;
    /// Remove records; unknown ids are ignored. Returns how many were removed.
    async fn delete(&self, ids: &[String]) -> Result<usize>;
    async fn query(&self, vector: &[f32], k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<SearchHit>>;
    async fn get(&self, ids: &[String]) -> Result<Vec<VectorRecord>>;
    /// Every stored id, in insertion order.
    async fn ids(&self) -> Result<Vec<String>>;
    async fn stats(&self) -> Result<IndexStats>;
    /// Remove every record and any persisted state.
    async fn destroy(&self) -> Result<()>;
}

/// Durable key/value settings store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

/// Converts raw bytes of one file format into text.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, bytes: &[u8], file_name: &str) -> Result<ParsedDocument>;
}
