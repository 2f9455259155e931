//! Document metadata, kept apart from the vector payload.
//!
//! Permanent documents are written to the key/value store under
//! [`SETTINGS_KEY`] after every mutation, without their raw content.
//! Session documents live only in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use kbase_core::error::{Error, Result};
use kbase_core::traits::KeyValueStore;
use kbase_core::types::{Document, DocumentId, DocumentMeta, Meta, DEFAULT_COLLECTION};

pub const SETTINGS_KEY: &str = "knowledge_base";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CollectionDocuments {
    #[serde(default)]
    pub documents: Vec<DocumentMeta>,
}

/// The persisted knowledge-base settings object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedKnowledgeBase {
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionDocuments>,
    #[serde(default)]
    pub sessions: Vec<String>,
    #[serde(default)]
    pub settings: Meta,
}

fn enabled_default() -> bool { true }

struct Session {
    created_at: DateTime<Utc>,
    documents: Vec<Document>,
}

#[derive(Default)]
struct State {
    enabled: bool,
    documents: HashMap<DocumentId, Document>,
    sessions: HashMap<String, Session>,
}

pub struct DocumentStore {
    kv: Arc<dyn KeyValueStore>,
    settings: Meta,
    state: RwLock<State>,
}

impl DocumentStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, settings: Meta) -> Self {
        Self { kv, settings, state: RwLock::new(State { enabled: true, ..State::default() }) }
    }

    /// 128 random bits, hex encoded.
    pub fn generate_id() -> DocumentId { hex::encode(rand::random::<[u8; 16]>()) }

    /// Load permanent document metadata. Returns how many documents were
    /// restored; a missing or unreadable settings object starts empty.
    pub async fn load(&self) -> Result<usize> {
        let persisted = match self.kv.get(SETTINGS_KEY).await? {
            Some(value) => match serde_json::from_value::<PersistedKnowledgeBase>(value) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "stored knowledge base metadata is malformed, starting empty");
                    return Ok(0);
                }
            },
            None => {
                tracing::debug!("no existing knowledge base metadata");
                return Ok(0);
            }
        };
        let mut state = self.state.write().await;
        state.enabled = persisted.enabled;
        for (name, group) in persisted.collections {
            for meta in group.documents {
                let mut doc = Document::from(meta);
                doc.collection.get_or_insert_with(|| name.clone());
                state.documents.insert(doc.id.clone(), doc);
            }
        }
        Ok(state.documents.len())
    }

    fn snapshot(&self, state: &State) -> PersistedKnowledgeBase {
        let mut collections: BTreeMap<String, CollectionDocuments> = BTreeMap::new();
        let mut docs: Vec<&Document> = state.documents.values().collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        for doc in docs {
            let name = doc.collection.clone().unwrap_or_else(|| DEFAULT_COLLECTION.to_string());
            collections.entry(name).or_default().documents.push(doc.to_meta());
        }
        let mut sessions: Vec<String> = state.sessions.keys().cloned().collect();
        sessions.sort();
        PersistedKnowledgeBase { enabled: state.enabled, collections, sessions, settings: self.settings.clone() }
    }

    async fn save(&self, state: &State) -> Result<()> {
        self.kv.set(SETTINGS_KEY, serde_json::to_value(self.snapshot(state))?).await
    }

    /// Write the current metadata to the key/value store.
    pub async fn persist(&self) -> Result<()> {
        let state = self.state.read().await;
        self.save(&state).await
    }

    /// Store a document, assigning a fresh id when it has none. Permanent
    /// documents are persisted before this returns; if that fails the
    /// document is not kept.
    pub async fn add(&self, mut document: Document) -> Result<DocumentId> {
        if document.id.is_empty() {
            document.id = Self::generate_id();
        }
        let id = document.id.clone();
        let mut state = self.state.write().await;
        match document.session.clone() {
            Some(session) => {
                state
                    .sessions
                    .entry(session)
                    .or_insert_with(|| Session { created_at: Utc::now(), documents: Vec::new() })
                    .documents
                    .push(document);
            }
            None => {
                state.documents.insert(id.clone(), document);
                if let Err(e) = self.save(&state).await {
                    state.documents.remove(&id);
                    return Err(e);
                }
            }
        }
        Ok(id)
    }

    /// Permanent documents first, then every active session.
    pub async fn get(&self, id: &str) -> Option<Document> {
        let state = self.state.read().await;
        if let Some(doc) = state.documents.get(id) {
            return Some(doc.clone());
        }
        state.sessions.values().flat_map(|s| s.documents.iter()).find(|d| d.id == id).cloned()
    }

    pub async fn delete(&self, id: &str) -> Result<Document> {
        let mut state = self.state.write().await;
        if let Some(doc) = state.documents.remove(id) {
            if let Err(e) = self.save(&state).await {
                state.documents.insert(id.to_string(), doc);
                return Err(e);
            }
            return Ok(doc);
        }
        let found = state
            .sessions
            .iter()
            .find_map(|(sid, s)| s.documents.iter().position(|d| d.id == id).map(|p| (sid.clone(), p)));
        let Some((session_id, pos)) = found else {
            return Err(Error::not_found(format!("Document {id} not found")));
        };
        let mut emptied = false;
        let mut removed = None;
        if let Some(session) = state.sessions.get_mut(&session_id) {
            removed = Some(session.documents.remove(pos));
            emptied = session.documents.is_empty();
        }
        if emptied {
            state.sessions.remove(&session_id);
        }
        removed.ok_or_else(|| Error::not_found(format!("Document {id} not found")))
    }

    /// Permanent documents, optionally restricted to one collection,
    /// oldest first.
    pub async fn list(&self, collection: Option<&str>) -> Vec<Document> {
        let state = self.state.read().await;
        let mut docs: Vec<Document> = state
            .documents
            .values()
            .filter(|d| collection.map_or(true, |c| d.index_collection() == c))
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        docs
    }

    pub async fn session_documents(&self, session_id: &str) -> Vec<Document> {
        self.state.read().await.sessions.get(session_id).map(|s| s.documents.clone()).unwrap_or_default()
    }

    /// Active session ids with their creation time.
    pub async fn sessions(&self) -> Vec<(String, DateTime<Utc>)> {
        let state = self.state.read().await;
        let mut out: Vec<_> = state.sessions.iter().map(|(id, s)| (id.clone(), s.created_at)).collect();
        out.sort();
        out
    }

    pub async fn remove_session(&self, session_id: &str) -> Vec<Document> {
        self.state.write().await.sessions.remove(session_id).map(|s| s.documents).unwrap_or_default()
    }

    pub async fn clear_sessions(&self) -> usize {
        let mut state = self.state.write().await;
        let n = state.sessions.len();
        state.sessions.clear();
        n
    }

    /// Drop every permanent document held in `collection`.
    pub async fn remove_collection(&self, collection: &str) -> Result<Vec<Document>> {
        let mut state = self.state.write().await;
        let ids: Vec<DocumentId> =
            state.documents.values().filter(|d| d.index_collection() == collection).map(|d| d.id.clone()).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let removed: Vec<Document> = ids.iter().filter_map(|id| state.documents.remove(id)).collect();
        if let Err(e) = self.save(&state).await {
            for doc in removed {
                state.documents.insert(doc.id.clone(), doc);
            }
            return Err(e);
        }
        Ok(removed)
    }

    /// `(permanent documents, session documents, active sessions)`
    pub async fn counts(&self) -> (usize, usize, usize) {
        let state = self.state.read().await;
        let session_docs = state.sessions.values().map(|s| s.documents.len()).sum();
        (state.documents.len(), session_docs, state.sessions.len())
    }
}
