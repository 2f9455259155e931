//! Brute-force in-memory index with optional JSON snapshots.
//!
//! Every mutation builds the next state, flushes it to the snapshot file
//! (when one is configured) and only then publishes it, all under a writer
//! mutex. Readers see either the previous or the next state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use kbase_core::error::{Error, Result};
use kbase_core::filter::MetadataFilter;
use kbase_core::kv::write_atomic;
use kbase_core::traits::VectorIndex;
use kbase_core::types::{IndexStats, SearchHit, VectorRecord};
use kbase_embed::cosine_similarity;

use crate::{rank_hits, CollectionHeader};

#[derive(Debug, Clone, Default)]
struct State {
    records: Vec<VectorRecord>,
    positions: HashMap<String, usize>,
}

impl State {
    fn from_records(records: Vec<VectorRecord>) -> Self {
        let mut state = Self::default();
        for record in records {
            state.upsert(record);
        }
        state
    }

    fn upsert(&mut self, record: VectorRecord) {
        match self.positions.get(&record.id) {
            Some(&pos) => self.records[pos] = record,
            None => {
                self.positions.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    fn reindex(&mut self) {
        self.positions = self.records.iter().enumerate().map(|(i, r)| (r.id.clone(), i)).collect();
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    name: String,
    #[serde(flatten)]
    header: CollectionHeader,
    records: Vec<VectorRecord>,
}

pub struct MemoryIndex {
    name: String,
    header: CollectionHeader,
    snapshot_path: Option<PathBuf>,
    state: RwLock<State>,
    writer: Mutex<()>,
}

impl MemoryIndex {
    /// An index that lives only as long as the process.
    pub fn new(name: impl Into<String>, header: CollectionHeader) -> Self {
        Self { name: name.into(), header, snapshot_path: None, state: RwLock::new(State::default()), writer: Mutex::new(()) }
    }

    /// An index flushed to `path` after every mutation. Writes an initial
    /// empty snapshot so the collection survives a restart.
    pub async fn create_persistent(name: impl Into<String>, header: CollectionHeader, path: PathBuf) -> Result<Self> {
        let mut index = Self::new(name, header);
        index.snapshot_path = Some(path);
        index.flush(&State::default()).await?;
        Ok(index)
    }

    /// Load a snapshot previously written by a persistent index.
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        let state = State::from_records(snapshot.records);
        tracing::debug!(collection = %snapshot.name, records = state.records.len(), "loaded snapshot");
        Ok(Self {
            name: snapshot.name,
            header: snapshot.header,
            snapshot_path: Some(path.to_path_buf()),
            state: RwLock::new(state),
            writer: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn header(&self) -> &CollectionHeader { &self.header }

    async fn flush(&self, state: &State) -> Result<()> {
        let Some(path) = &self.snapshot_path else { return Ok(()) };
        let snapshot = Snapshot { name: self.name.clone(), header: self.header.clone(), records: state.records.clone() };
        write_atomic(path, &serde_json::to_vec(&snapshot)?).await
    }

    fn check_dim(&self, len: usize, what: &str) -> Result<()> {
        if len != self.header.dimension {
            return Err(Error::validation(format!(
                "{what} has dimension {len}, collection '{}' expects {}",
                self.name, self.header.dimension
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn dim(&self) -> usize { self.header.dimension }

    async fn insert(&self, records: Vec<VectorRecord>) -> Result<()> {
        for record in &records {
            self.check_dim(record.vector.len(), &format!("vector '{}'", record.id))?;
        }
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.writer.lock().await;
        let mut next = self.state.read().await.clone();
        let added = records.len();
        for record in records {
            next.upsert(record);
        }
        self.flush(&next).await?;
        *self.state.write().await = next;
        tracing::debug!(collection = %self.name, added, "inserted records");
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let _guard = self.writer.lock().await;
        let mut next = self.state.read().await.clone();
        let before = next.records.len();
        next.records.retain(|r| !ids.contains(&r.id));
        let removed = before - next.records.len();
        if removed == 0 {
            return Ok(0);
        }
        next.reindex();
        self.flush(&next).await?;
        *self.state.write().await = next;
        tracing::debug!(collection = %self.name, removed, "deleted records");
        Ok(removed)
    }

    async fn query(&self, vector: &[f32], k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<SearchHit>> {
        self.check_dim(vector.len(), "query vector")?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        let hits = state
            .records
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.metadata)))
            .map(|r| SearchHit {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.vector),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<VectorRecord>> {
        let state = self.state.read().await;
        Ok(ids.iter().filter_map(|id| state.positions.get(id).map(|&p| state.records[p].clone())).collect())
    }

    async fn ids(&self) -> Result<Vec<String>> {
        Ok(self.state.read().await.records.iter().map(|r| r.id.clone()).collect())
    }

    async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats { count: self.state.read().await.records.len(), metadata: self.header.metadata.clone() })
    }

    async fn destroy(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        *self.state.write().await = State::default();
        if let Some(path) = &self.snapshot_path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
