//! The knowledge base facade: ingestion, search, lifecycle.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

use kbase_core::chunker::Chunker;
use kbase_core::config::KbConfig;
use kbase_core::error::{Error, Result};
use kbase_core::kv::{JsonFileStore, MemoryKvStore};
use kbase_core::parser::{list_supported_files, FileFormat, ParserSet};
use kbase_core::traits::{DocumentParser, Embedder, KeyValueStore};
use kbase_core::types::{
    count_words, session_collection_name, Chunk, CollectionInfo, Document, DocumentId, DocumentSource, Meta,
    SearchResult, VectorRecord, DEFAULT_COLLECTION, SESSION_PREFIX,
};
use kbase_embed::get_default_embedder;
use kbase_vector::{Collection, CollectionRegistry, IndexStorage};

use crate::completion::TextCompletion;
use crate::context::{assemble_context, ContextBlock, ContextMode};
use crate::docstore::DocumentStore;
use crate::events::{KbEvent, EVENT_CAPACITY};
use crate::retrieval::{as_upstream, RetrievalEngine, SearchOptions};
use crate::transfer::{reconstruct_content, ExportData, ImportItem, EXPORT_VERSION};

/// Caller-supplied document attributes. Unknown keys end up in the
/// document's open metadata map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DocumentSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(flatten)]
    pub extra: Meta,
}

impl AddOptions {
    pub fn collection(name: impl Into<String>) -> Self { Self { collection: Some(name.into()), ..Self::default() } }

    pub fn session(session_id: impl Into<String>) -> Self { Self { session: Some(session_id.into()), ..Self::default() } }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub count: usize,
    pub metadata: Meta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KbStats {
    pub total_documents: usize,
    pub collections: BTreeMap<String, CollectionStats>,
    pub session_documents: usize,
    pub active_sessions: usize,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub added: Vec<(PathBuf, DocumentId)>,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct KnowledgeBase {
    config: KbConfig,
    embedder: Arc<dyn Embedder>,
    registry: Arc<CollectionRegistry>,
    documents: DocumentStore,
    retrieval: RetrievalEngine,
    chunker: Chunker,
    parsers: ParserSet,
    events: broadcast::Sender<KbEvent>,
}

impl KnowledgeBase {
    pub fn new(
        config: KbConfig,
        embedder: Arc<dyn Embedder>,
        storage: IndexStorage,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(CollectionRegistry::new(config.embedding.dimension, storage));
        let settings = match serde_json::to_value(&config)? {
            Value::Object(map) => map,
            _ => Meta::new(),
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            embedder: embedder.clone(),
            retrieval: RetrievalEngine::new(registry.clone(), embedder),
            documents: DocumentStore::new(kv, settings),
            chunker: Chunker::new(config.chunking),
            parsers: ParserSet::new()?,
            registry,
            events,
            config,
        })
    }

    /// Everything wired from configuration: JSON settings file, the
    /// configured index backend, the default embedder.
    pub async fn from_config(config: KbConfig) -> Result<Self> {
        let storage = IndexStorage::from_config(&config.storage).await?;
        let kv = Arc::new(JsonFileStore::open(config.storage.settings_path()).await?);
        let embedder = get_default_embedder(&config.embedding);
        Self::new(config, embedder, storage, kv)
    }

    /// Nothing touches the disk.
    pub fn in_memory(config: KbConfig) -> Result<Self> {
        let embedder = get_default_embedder(&config.embedding);
        Self::new(config, embedder, IndexStorage::Ephemeral, Arc::new(MemoryKvStore::new()))
    }

    pub fn with_pdf_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parsers = self.parsers.with_pdf(parser);
        self
    }

    pub fn config(&self) -> &KbConfig { &self.config }

    pub fn parsers(&self) -> &ParserSet { &self.parsers }

    pub fn subscribe(&self) -> broadcast::Receiver<KbEvent> { self.events.subscribe() }

    fn emit(&self, event: KbEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Initialize the embedder, load collections (creating the defaults)
    /// and restore document metadata.
    pub async fn open(&self) -> Result<()> {
        self.embedder.initialize().await.map_err(as_upstream)?;
        self.registry.open().await?;
        let restored = self.documents.load().await?;
        tracing::info!(documents = restored, "knowledge base initialized");
        Ok(())
    }

    /// Flush metadata and discard every session.
    pub async fn close(&self) -> Result<()> {
        self.documents.clear_sessions().await;
        let dropped = self.registry.drop_sessions().await;
        self.documents.persist().await?;
        tracing::info!(sessions = dropped, "knowledge base closed");
        Ok(())
    }

    async fn target_collection(&self, options: &AddOptions) -> Result<Arc<Collection>> {
        match options.session.as_deref() {
            Some(session) => self.registry.get_or_create_session(session).await,
            None => {
                let name = options.collection.as_deref().unwrap_or(DEFAULT_COLLECTION);
                self.registry.get_or_create(name, Meta::new()).await
            }
        }
    }

    /// Chunk, embed and index `content`, then record the document.
    ///
    /// All chunks are embedded before anything is inserted and inserted in
    /// one index mutation. If recording the metadata fails the chunks are
    /// removed again, so a failed call leaves nothing behind.
    pub async fn add_document(&self, content: &str, options: AddOptions) -> Result<DocumentId> {
        let id = DocumentStore::generate_id();
        match self.ingest(&id, content, options).await {
            Ok(collection) => {
                self.emit(KbEvent::DocumentIndexed { document_id: id.clone(), collection });
                Ok(id)
            }
            Err(e) => {
                tracing::error!(document = %id, error = %e, "failed to add document");
                self.emit(KbEvent::DocumentFailed { document_id: id, reason: e.to_string() });
                Err(e)
            }
        }
    }

    async fn ingest(&self, id: &str, content: &str, options: AddOptions) -> Result<String> {
        if content.trim().is_empty() {
            return Err(Error::validation("document content is empty"));
        }
        let collection = self.target_collection(&options).await?;

        let chunks: Vec<Chunk> = self.chunker.chunk_document(id, content);
        self.emit(KbEvent::DocumentChunked { document_id: id.to_string(), chunks: chunks.len() });

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await.map_err(as_upstream)?;
        if vectors.len() != chunks.len() {
            return Err(Error::upstream(format!("embedder returned {} vectors for {} chunks", vectors.len(), chunks.len())));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.registry.dim()) {
            return Err(Error::upstream(format!(
                "embedder returned {} dimensions, expected {}",
                bad.len(),
                self.registry.dim()
            )));
        }
        self.emit(KbEvent::ChunksEmbedded { document_id: id.to_string(), chunks: chunks.len() });

        let created_at = Utc::now();
        let title = options.title.clone().unwrap_or_else(|| "Untitled Document".to_string());
        let source = options.source.unwrap_or_default();
        let doc_type = options.doc_type.clone().unwrap_or_else(|| "text".to_string());
        let timestamp = created_at.to_rfc3339();

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let mut metadata = Meta::new();
                metadata.insert("documentId".into(), json!(id));
                metadata.insert("chunkIndex".into(), json!(chunk.chunk_index));
                metadata.insert("title".into(), json!(title));
                metadata.insert("source".into(), json!(source.as_str()));
                metadata.insert("type".into(), json!(doc_type));
                metadata.insert("timestamp".into(), json!(timestamp));
                metadata.insert("startChar".into(), json!(chunk.start_offset));
                metadata.insert("endChar".into(), json!(chunk.end_offset));
                metadata.insert("collection".into(), json!(collection.name()));
                if let Some(url) = &options.url {
                    metadata.insert("url".into(), json!(url));
                }
                VectorRecord { id: chunk.id.clone(), vector, text: chunk.content.clone(), metadata }
            })
            .collect();
        let chunk_ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        collection.index().insert(records).await?;

        let document = Document {
            id: id.to_string(),
            title,
            content: content.to_string(),
            source,
            url: options.url,
            collection: Some(collection.name().to_string()),
            session: options.session,
            created_at,
            word_count: count_words(content),
            doc_type,
            chunk_ids: chunk_ids.clone(),
            metadata: options.extra,
        };
        if let Err(e) = self.documents.add(document).await {
            if let Err(rollback) = collection.index().delete(&chunk_ids).await {
                tracing::warn!(document = %id, error = %rollback, "failed to roll back chunks");
            }
            return Err(e);
        }
        tracing::info!(document = %id, collection = collection.name(), chunks = chunk_ids.len(), "added document");
        Ok(collection.name().to_string())
    }

    pub async fn add_web_page(&self, url: &str, html: &str, mut options: AddOptions) -> Result<DocumentId> {
        let parsed = self.parsers.parse_web_page(url, html)?;
        self.emit(KbEvent::DocumentParsed { title: parsed.title.clone(), format: "webpage".to_string() });
        options.title = Some(parsed.title);
        options.url = Some(url.to_string());
        options.source = Some(DocumentSource::Webpage);
        options.doc_type = Some("html".to_string());
        options.extra.insert("pageMetadata".into(), Value::Object(parsed.metadata));
        self.add_document(&parsed.content, options).await
    }

    pub async fn add_bookmark(&self, url: &str, title: &str, mut options: AddOptions) -> Result<DocumentId> {
        let notes = options.extra.get("notes").and_then(Value::as_str).unwrap_or_default().to_string();
        let content = format!("{title}\n{url}\n{notes}");
        options.title = Some(title.to_string());
        options.url = Some(url.to_string());
        options.source = Some(DocumentSource::Bookmark);
        options.collection = Some("bookmarks".to_string());
        options.doc_type = Some("bookmark".to_string());
        self.add_document(&content, options).await
    }

    /// Parse `bytes` as `file_type` (an extension such as `md` or `docx`)
    /// and ingest the result.
    pub async fn add_file(&self, bytes: &[u8], file_type: &str, file_name: &str, mut options: AddOptions) -> Result<DocumentId> {
        let format: FileFormat = file_type.parse()?;
        let parsed = self.parsers.parse(bytes, format, file_name)?;
        self.emit(KbEvent::DocumentParsed { title: parsed.title.clone(), format: format.to_string() });
        options.title.get_or_insert(parsed.title);
        options.source.get_or_insert(DocumentSource::Upload);
        options.doc_type.get_or_insert_with(|| format.to_string());
        options.extra.entry("fileName").or_insert_with(|| json!(file_name));
        for (key, value) in parsed.metadata {
            options.extra.entry(key).or_insert(value);
        }
        self.add_document(&parsed.content, options).await
    }

    /// Ingest every supported file under `root`, continuing past failures.
    pub async fn ingest_directory(&self, root: &Path, options: AddOptions) -> Result<IngestReport> {
        let files = list_supported_files(root);
        let mut report = IngestReport::default();
        for path in files {
            let outcome = self.ingest_path(&path, options.clone()).await;
            match outcome {
                Ok(id) => report.added.push((path, id)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping file");
                    report.failed.push((path, e.to_string()));
                }
            }
        }
        tracing::info!(added = report.added.len(), failed = report.failed.len(), root = %root.display(), "directory ingested");
        Ok(report)
    }

    pub async fn ingest_path(&self, path: &Path, options: AddOptions) -> Result<DocumentId> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_string();
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let bytes = tokio::fs::read(path).await?;
        self.add_file(&bytes, &ext, &name, options).await
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        self.retrieval.search(query, options).await
    }

    pub fn default_search_options(&self) -> SearchOptions { SearchOptions::from_config(&self.config.search) }

    pub async fn search_context(&self, query: &str, options: &SearchOptions, mode: ContextMode) -> Result<ContextBlock> {
        let results = self.search(query, options).await?;
        Ok(assemble_context(&results, mode))
    }

    /// Search, assemble context and hand both to the completion
    /// collaborator.
    pub async fn ask(
        &self,
        query: &str,
        options: &SearchOptions,
        mode: ContextMode,
        completion: &dyn TextCompletion,
    ) -> Result<String> {
        let context = self.search_context(query, options, mode).await?;
        tracing::debug!(mode = %mode, sources = context.sources.len(), "asking completion");
        completion.complete(query, &context).await.map_err(as_upstream)
    }

    pub async fn get_document(&self, id: &str) -> Option<Document> { self.documents.get(id).await }

    pub async fn list_documents(&self, collection: Option<&str>) -> Vec<Document> { self.documents.list(collection).await }

    pub async fn session_documents(&self, session_id: &str) -> Vec<Document> {
        self.documents.session_documents(session_id).await
    }

    /// Remove a document and its chunks. Returns `false` when the id is
    /// unknown, so deleting twice is harmless.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let Some(document) = self.documents.get(id).await else {
            tracing::debug!(document = id, "delete of unknown document ignored");
            return Ok(false);
        };
        let name = document.index_collection();
        match self.registry.get(&name).await {
            Ok(collection) => {
                let mut chunk_ids = document.chunk_ids.clone();
                if chunk_ids.is_empty() {
                    let prefix = format!("{id}_chunk_");
                    chunk_ids = collection.index().ids().await?.into_iter().filter(|c| c.starts_with(&prefix)).collect();
                }
                let removed = collection.index().delete(&chunk_ids).await?;
                tracing::debug!(document = id, removed, "removed chunks");
            }
            Err(e) if e.is_not_found() => tracing::debug!(collection = %name, "collection already gone"),
            Err(e) => return Err(e),
        }
        match self.documents.delete(id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        }
        tracing::info!(document = id, "deleted document");
        self.emit(KbEvent::DocumentDeleted { document_id: id.to_string() });
        Ok(true)
    }

    pub async fn create_collection(&self, name: &str, metadata: Meta) -> Result<CollectionInfo> {
        self.registry.create_collection(name, metadata).await?.info().await
    }

    pub async fn list_collections(&self) -> Result<Vec<CollectionInfo>> { self.registry.list().await }

    /// Delete a user collection together with the documents it holds.
    /// Returns how many documents went with it.
    pub async fn delete_collection(&self, name: &str) -> Result<usize> {
        if let Some(session) = name.strip_prefix(SESSION_PREFIX) {
            return self.clear_session(session).await;
        }
        self.registry.delete(name).await?;
        let removed = self.documents.remove_collection(name).await?;
        for doc in &removed {
            self.emit(KbEvent::DocumentDeleted { document_id: doc.id.clone() });
        }
        Ok(removed.len())
    }

    /// Drop a session's documents and its collection.
    pub async fn clear_session(&self, session_id: &str) -> Result<usize> {
        let removed = self.documents.remove_session(session_id).await;
        match self.registry.delete(&session_collection_name(session_id)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        tracing::info!(session = session_id, documents = removed.len(), "cleared session");
        self.emit(KbEvent::SessionCleared { session_id: session_id.to_string(), documents: removed.len() });
        Ok(removed.len())
    }

    pub async fn get_stats(&self) -> Result<KbStats> {
        let (total_documents, session_documents, active_sessions) = self.documents.counts().await;
        let collections = self
            .registry
            .list()
            .await?
            .into_iter()
            .map(|c| (c.name, CollectionStats { count: c.count, metadata: c.metadata }))
            .collect();
        Ok(KbStats { total_documents, collections, session_documents, active_sessions })
    }

    /// Permanent documents, optionally of one collection. Content that was
    /// not retained is rebuilt from the indexed chunks.
    pub async fn export_documents(&self, collection: Option<&str>) -> Result<ExportData> {
        let mut documents = self.documents.list(collection).await;
        for doc in documents.iter_mut().filter(|d| d.content.is_empty() && !d.chunk_ids.is_empty()) {
            match self.registry.get(&doc.index_collection()).await {
                Ok(c) => doc.content = reconstruct_content(c.index().get(&doc.chunk_ids).await?),
                Err(e) if e.is_not_found() => {
                    tracing::warn!(document = %doc.id, "collection missing, exporting without content");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ExportData { version: EXPORT_VERSION.to_string(), export_date: Utc::now(), documents })
    }

    /// Re-ingest an exported payload. Items that fail are logged and
    /// skipped; the ids of the imported documents are returned.
    pub async fn import_documents(&self, data: &Value) -> Result<Vec<DocumentId>> {
        let Some(items) = data.get("documents").and_then(Value::as_array) else {
            return Err(Error::validation("Invalid import data format"));
        };
        let exported_at = data.get("exportDate").cloned().unwrap_or(Value::Null);
        let total = items.len();
        let mut imported = Vec::with_capacity(total);
        for (i, raw) in items.iter().enumerate() {
            let outcome = match serde_json::from_value::<ImportItem>(raw.clone()) {
                Ok(item) => {
                    let title = item.title.clone().unwrap_or_default();
                    let options = AddOptions {
                        title: item.title,
                        source: Some(item.source.and_then(|s| s.parse().ok()).unwrap_or(DocumentSource::Import)),
                        url: item.url,
                        collection: item.collection,
                        session: None,
                        doc_type: item.doc_type,
                        extra: Meta::new(),
                    }
                    .with("importedFrom", exported_at.clone());
                    self.add_document(&item.content, options).await.map_err(|e| (title, e))
                }
                Err(e) => Err((String::new(), Error::validation(format!("malformed document entry: {e}")))),
            };
            match outcome {
                Ok(id) => imported.push(id),
                Err((title, e)) => tracing::error!(title = %title, error = %e, "failed to import document"),
            }
            self.emit(KbEvent::ImportProgress { done: i + 1, total });
        }
        tracing::info!(imported = imported.len(), total, "import finished");
        Ok(imported)
    }
}
