//! Knowledge base engine: document bookkeeping, multi-collection retrieval,
//! context assembly and the [`KnowledgeBase`] facade tying them together.

pub mod completion;
pub mod context;
pub mod docstore;
pub mod events;
pub mod manager;
pub mod retrieval;
pub mod transfer;

pub use completion::TextCompletion;
pub use context::{assemble_context, ContextBlock, ContextMode, ContextSource, NO_KNOWLEDGE};
pub use docstore::DocumentStore;
pub use events::KbEvent;
pub use manager::{AddOptions, CollectionStats, IngestReport, KbStats, KnowledgeBase};
pub use retrieval::{group_by_document, rank_and_group, RetrievalEngine, SearchOptions};
pub use transfer::{ExportData, EXPORT_VERSION};
