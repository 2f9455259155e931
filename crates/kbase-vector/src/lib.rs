//! Vector index backends and the collection registry.
//!
//! Two [`VectorIndex`](kbase_core::traits::VectorIndex) implementations:
//! [`MemoryIndex`] (brute-force cosine, optional JSON snapshot per
//! collection) and [`LanceIndex`] (one LanceDB table per collection).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use kbase_core::types::{Meta, SearchHit};

pub mod lance;
pub mod memory;
pub mod registry;
pub mod schema;
pub mod table;

pub use lance::LanceIndex;
pub use memory::MemoryIndex;
pub use registry::{Collection, CollectionRegistry, IndexStorage};

/// Collection-level facts persisted next to the records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionHeader {
    #[serde(default)]
    pub metadata: Meta,
    pub created_at: DateTime<Utc>,
    pub dimension: usize,
}

impl CollectionHeader {
    pub fn new(dimension: usize, metadata: Meta) -> Self { Self { metadata, created_at: Utc::now(), dimension } }
}

/// Sort by score descending, keeping input order among equal scores, and
/// keep the best `k`.
pub fn rank_hits(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    hits.truncate(k);
    hits
}
