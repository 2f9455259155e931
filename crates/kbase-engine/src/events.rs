use serde::Serialize;

/// Progress and lifecycle notifications, delivered in emission order to
/// every receiver obtained from `KnowledgeBase::subscribe`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum KbEvent {
    DocumentParsed { title: String, format: String },
    DocumentChunked { document_id: String, chunks: usize },
    ChunksEmbedded { document_id: String, chunks: usize },
    DocumentIndexed { document_id: String, collection: String },
    DocumentFailed { document_id: String, reason: String },
    DocumentDeleted { document_id: String },
    ImportProgress { done: usize, total: usize },
    SessionCleared { session_id: String, documents: usize },
}

pub(crate) const EVENT_CAPACITY: usize = 256;
