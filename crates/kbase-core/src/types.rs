//! Domain types shared by the chunker, the vector indices and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type DocumentId = String;
pub type ChunkId = String;
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// Where a document came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentSource {
    #[default]
    Manual,
    Webpage,
    Bookmark,
    Upload,
    Import,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Webpage => "webpage",
            Self::Bookmark => "bookmark",
            Self::Upload => "upload",
            Self::Import => "import",
        }
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for DocumentSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "webpage" => Ok(Self::Webpage),
            "bookmark" => Ok(Self::Bookmark),
            "upload" => Ok(Self::Upload),
            "import" => Ok(Self::Import),
            other => Err(Error::validation(format!("unknown document source '{other}'"))),
        }
    }
}

/// A document as held by the document store.
///
/// `content` is only retained for documents ingested during this process;
/// documents restored from persisted metadata carry an empty `content` and
/// their text lives in the chunk records of their collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: DocumentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub word_count: usize,
    #[serde(rename = "type", default = "default_doc_type")]
    pub doc_type: String,
    #[serde(default)]
    pub chunk_ids: Vec<ChunkId>,
    #[serde(default)]
    pub metadata: Meta,
}

fn default_doc_type() -> String { "text".to_string() }

impl Document {
    /// Collection that holds this document's chunks.
    pub fn index_collection(&self) -> String {
        match &self.session {
            Some(session) => session_collection_name(session),
            None => self.collection.clone().unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
        }
    }

    pub fn to_meta(&self) -> DocumentMeta {
        DocumentMeta {
            id: self.id.clone(),
            title: self.title.clone(),
            source: self.source,
            url: self.url.clone(),
            collection: self.collection.clone(),
            created_at: self.created_at,
            word_count: self.word_count,
            doc_type: self.doc_type.clone(),
            chunk_ids: self.chunk_ids.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Persisted, content-free view of a permanent document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMeta {
    pub id: DocumentId,
    pub title: String,
    #[serde(default)]
    pub source: DocumentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(alias = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub word_count: usize,
    #[serde(rename = "type", default = "default_doc_type")]
    pub doc_type: String,
    #[serde(default)]
    pub chunk_ids: Vec<ChunkId>,
    #[serde(default)]
    pub metadata: Meta,
}

impl From<DocumentMeta> for Document {
    fn from(meta: DocumentMeta) -> Self {
        Self {
            id: meta.id,
            title: meta.title,
            content: String::new(),
            source: meta.source,
            url: meta.url,
            collection: meta.collection,
            session: None,
            created_at: meta.created_at,
            word_count: meta.word_count,
            doc_type: meta.doc_type,
            chunk_ids: meta.chunk_ids,
            metadata: meta.metadata,
        }
    }
}

/// A bounded substring of a document, the unit that gets embedded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub content: String,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chunk {
    pub fn id_for(document_id: &str, index: usize) -> ChunkId { format!("{document_id}_chunk_{index}") }
}

/// One entry of a vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    #[serde(default)]
    pub metadata: Meta,
}

/// Ranked output of a single index query. Higher `score` is better.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub metadata: Meta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    pub count: usize,
    pub metadata: Meta,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Permanent,
    Session,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    pub name: String,
    pub kind: CollectionKind,
    pub metadata: Meta,
    pub count: usize,
}

/// A chunk that survived retrieval, as reported inside a [`SearchResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMatch {
    pub content: String,
    pub score: f32,
    pub chunk_index: usize,
}

/// Document-grouped retrieval output. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub document_id: DocumentId,
    pub title: String,
    pub source: String,
    pub timestamp: String,
    pub collection: String,
    pub chunks: Vec<ChunkMatch>,
    pub max_score: f32,
}

/// Output of a document parser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDocument {
    pub title: String,
    pub content: String,
    pub metadata: Meta,
    pub word_count: usize,
}

pub const DEFAULT_COLLECTION: &str = "personal";
pub const DEFAULT_COLLECTIONS: [&str; 5] = ["personal", "work", "research", "bookmarks", "browsing"];
pub const SESSION_PREFIX: &str = "session_";

pub fn session_collection_name(session_id: &str) -> String { format!("{SESSION_PREFIX}{session_id}") }

pub fn is_default_collection(name: &str) -> bool { DEFAULT_COLLECTIONS.contains(&name) }

pub fn count_words(text: &str) -> usize { text.split_whitespace().count() }
