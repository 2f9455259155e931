//! Multi-collection search.
//!
//! The query is embedded once and fanned out to every target collection
//! concurrently. Hits are merged, threshold-filtered, re-ranked globally,
//! truncated and finally grouped by parent document.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

use kbase_core::config::SearchConfig;
use kbase_core::error::{Error, Result};
use kbase_core::filter::MetadataFilter;
use kbase_core::traits::Embedder;
use kbase_core::types::{session_collection_name, ChunkMatch, SearchHit, SearchResult, DEFAULT_COLLECTION};
use kbase_vector::CollectionRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub collections: Vec<String>,
    pub include_session: bool,
    pub session_id: Option<String>,
    pub limit: usize,
    pub score_threshold: f32,
    /// Applied inside each index before ranking.
    pub filter: Option<MetadataFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self { Self::from_config(&SearchConfig::default()) }
}

impl SearchOptions {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            collections: vec![DEFAULT_COLLECTION.to_string()],
            include_session: false,
            session_id: None,
            limit: config.default_limit,
            score_threshold: config.score_threshold,
            filter: None,
        }
    }

    pub fn collections<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.include_session = true;
        self.session_id = Some(session_id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// The explicit collections, plus the session collection when asked for.
    pub fn target_collections(&self) -> Vec<String> {
        let mut targets = self.collections.clone();
        if self.include_session {
            if let Some(session) = self.session_id.as_deref().filter(|s| !s.is_empty()) {
                targets.push(session_collection_name(session));
            }
        }
        targets
    }
}

pub struct RetrievalEngine {
    registry: Arc<CollectionRegistry>,
    embedder: Arc<dyn Embedder>,
}

impl RetrievalEngine {
    pub fn new(registry: Arc<CollectionRegistry>, embedder: Arc<dyn Embedder>) -> Self { Self { registry, embedder } }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let targets = options.target_collections();
        if targets.is_empty() || options.limit == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await.map_err(as_upstream)?;
        if vector.len() != self.registry.dim() {
            return Err(Error::upstream(format!(
                "embedder returned {} dimensions, expected {}",
                vector.len(),
                self.registry.dim()
            )));
        }

        let filter = options.filter.as_ref();
        let per_collection = join_all(targets.iter().map(|name| {
            let vector = &vector;
            async move { (name, self.registry.query(name, vector, options.limit, filter).await) }
        }))
        .await;

        let mut merged = Vec::new();
        for (name, outcome) in per_collection {
            match outcome {
                Ok(hits) => merged.extend(hits.into_iter().map(|h| (name.clone(), h))),
                Err(e) if e.is_not_found() => tracing::debug!(collection = %name, "collection not found, skipping"),
                Err(e) => tracing::warn!(collection = %name, error = %e, "collection query failed, skipping"),
            }
        }

        let results = rank_and_group(merged, options.score_threshold, options.limit);
        tracing::info!(query_len = query.len(), documents = results.len(), "search finished");
        Ok(results)
    }
}

pub(crate) fn as_upstream(e: Error) -> Error {
    match e {
        Error::Upstream(_) => e,
        other => Error::upstream(other),
    }
}

/// Drop hits under `threshold`, rank the rest globally (stable), keep
/// `limit` and group them by document.
pub fn rank_and_group(hits: Vec<(String, SearchHit)>, threshold: f32, limit: usize) -> Vec<SearchResult> {
    let mut tagged: Vec<(String, SearchHit)> = hits.into_iter().filter(|(_, h)| h.score >= threshold).collect();
    tagged.sort_by(|a, b| b.1.score.partial_cmp(&a.1.score).unwrap_or(std::cmp::Ordering::Equal));
    tagged.truncate(limit);
    group_by_document(tagged)
}

/// Group ranked chunk hits by their `documentId` metadata. Chunks keep
/// their rank order; groups are sorted by their best score.
pub fn group_by_document(ranked: Vec<(String, SearchHit)>) -> Vec<SearchResult> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, SearchResult> = HashMap::new();
    for (collection, hit) in ranked {
        let meta_str = |key: &str| hit.metadata.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let document_id = meta_str("documentId").unwrap_or_else(|| hit.id.clone());
        let group = groups.entry(document_id.clone()).or_insert_with(|| {
            order.push(document_id.clone());
            SearchResult {
                document_id: document_id.clone(),
                title: meta_str("title").unwrap_or_default(),
                source: meta_str("source").unwrap_or_default(),
                timestamp: meta_str("timestamp").unwrap_or_default(),
                collection,
                chunks: Vec::new(),
                max_score: f32::MIN,
            }
        });
        let chunk_index = hit.metadata.get("chunkIndex").and_then(serde_json::Value::as_u64).unwrap_or(0) as usize;
        group.max_score = group.max_score.max(hit.score);
        group.chunks.push(ChunkMatch { content: hit.text, score: hit.score, chunk_index });
    }
    let mut results: Vec<SearchResult> = order.into_iter().filter_map(|id| groups.remove(&id)).collect();
    results.sort_by(|a, b| b.max_score.partial_cmp(&a.max_score).unwrap_or(std::cmp::Ordering::Equal));
    results
}
