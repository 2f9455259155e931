//! Named collections, each owning one vector index.

use lancedb::Connection;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use kbase_core::config::{IndexBackend, StorageConfig};
use kbase_core::error::{Error, Result};
use kbase_core::filter::MetadataFilter;
use kbase_core::traits::VectorIndex;
use kbase_core::types::{
    is_default_collection, session_collection_name, CollectionInfo, CollectionKind, Meta, SearchHit,
    DEFAULT_COLLECTIONS, SESSION_PREFIX,
};

use crate::table::{delete_meta, list_meta, open_db, set_meta};
use crate::{CollectionHeader, LanceIndex, MemoryIndex};

const COLLECTIONS_TABLE: &str = "_collections";

/// Where permanent collections keep their records. Session collections are
/// always in-memory and never persisted, whatever the storage.
pub enum IndexStorage {
    /// Nothing survives the process.
    Ephemeral,
    /// One JSON snapshot per collection under this directory.
    Snapshots(PathBuf),
    /// One LanceDB table per collection plus a `_collections` meta table.
    Lance(Connection),
}

impl IndexStorage {
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            IndexBackend::Memory => Ok(Self::Snapshots(config.vectors_dir())),
            IndexBackend::LanceDb => {
                let dir = config.lancedb_dir();
                tokio::fs::create_dir_all(&dir).await?;
                Ok(Self::Lance(open_db(&dir.to_string_lossy()).await?))
            }
        }
    }

    fn lance_table(name: &str) -> String { format!("collection_{name}") }

    async fn build(&self, name: &str, header: CollectionHeader) -> Result<Arc<dyn VectorIndex>> {
        let index: Arc<dyn VectorIndex> = match self {
            Self::Ephemeral => Arc::new(MemoryIndex::new(name, header)),
            Self::Snapshots(dir) => {
                Arc::new(MemoryIndex::create_persistent(name, header, dir.join(format!("{name}.json"))).await?)
            }
            Self::Lance(conn) => {
                set_meta(conn, COLLECTIONS_TABLE, name, &serde_json::to_string(&header)?).await?;
                Arc::new(LanceIndex::open(conn.clone(), &Self::lance_table(name), header).await?)
            }
        };
        Ok(index)
    }

    async fn load_all(&self, dim: usize) -> Result<Vec<(String, CollectionHeader, Arc<dyn VectorIndex>)>> {
        let mut loaded: Vec<(String, CollectionHeader, Arc<dyn VectorIndex>)> = Vec::new();
        match self {
            Self::Ephemeral => {}
            Self::Snapshots(dir) => {
                let mut entries = match tokio::fs::read_dir(dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(loaded),
                    Err(e) => return Err(e.into()),
                };
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    match MemoryIndex::load(&path).await {
                        Ok(index) => {
                            let (name, header) = (index.name().to_string(), index.header().clone());
                            loaded.push((name, header, Arc::new(index) as Arc<dyn VectorIndex>));
                        }
                        Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable snapshot"),
                    }
                }
            }
            Self::Lance(conn) => {
                for (name, value) in list_meta(conn, COLLECTIONS_TABLE).await? {
                    let header: CollectionHeader = match serde_json::from_str(&value) {
                        Ok(h) => h,
                        Err(e) => {
                            tracing::warn!(collection = %name, error = %e, "skipping collection with bad header");
                            continue;
                        }
                    };
                    let index = LanceIndex::open(conn.clone(), &Self::lance_table(&name), header.clone()).await?;
                    loaded.push((name, header, Arc::new(index) as Arc<dyn VectorIndex>));
                }
            }
        }
        loaded.retain(|(name, header, _)| {
            let ok = header.dimension == dim;
            if !ok {
                tracing::warn!(collection = %name, stored = header.dimension, expected = dim, "skipping collection with other dimension");
            }
            ok
        });
        Ok(loaded)
    }

    async fn forget(&self, name: &str) -> Result<()> {
        if let Self::Lance(conn) = self {
            delete_meta(conn, COLLECTIONS_TABLE, name).await?;
        }
        Ok(())
    }
}

pub struct Collection {
    name: String,
    kind: CollectionKind,
    header: CollectionHeader,
    index: Arc<dyn VectorIndex>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl Collection {
    pub fn name(&self) -> &str { &self.name }
    pub fn kind(&self) -> CollectionKind { self.kind }
    pub fn metadata(&self) -> &Meta { &self.header.metadata }
    pub fn header(&self) -> &CollectionHeader { &self.header }
    pub fn index(&self) -> &Arc<dyn VectorIndex> { &self.index }

    pub async fn info(&self) -> Result<CollectionInfo> {
        let stats = self.index.stats().await?;
        Ok(CollectionInfo { name: self.name.clone(), kind: self.kind, metadata: self.header.metadata.clone(), count: stats.count })
    }
}

/// Collection names become file and table names.
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(Error::validation(format!(
            "invalid collection name '{name}': use letters, digits, '_' or '-'"
        )));
    }
    Ok(())
}

pub struct CollectionRegistry {
    dim: usize,
    storage: IndexStorage,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl CollectionRegistry {
    pub fn new(dim: usize, storage: IndexStorage) -> Self {
        Self { dim, storage, collections: RwLock::new(HashMap::new()) }
    }

    pub fn dim(&self) -> usize { self.dim }

    /// Load persisted collections, then make sure every default exists.
    pub async fn open(&self) -> Result<()> {
        let loaded = self.storage.load_all(self.dim).await?;
        {
            let mut collections = self.collections.write().await;
            for (name, header, index) in loaded {
                tracing::debug!(collection = %name, "restored collection");
                collections.insert(
                    name.clone(),
                    Arc::new(Collection { name, kind: CollectionKind::Permanent, header, index }),
                );
            }
        }
        for name in DEFAULT_COLLECTIONS {
            let mut metadata = Meta::new();
            metadata.insert("description".into(), json!(format!("Default {name} collection")));
            self.get_or_create(name, metadata).await?;
        }
        Ok(())
    }

    async fn build(&self, name: &str, kind: CollectionKind, metadata: Meta) -> Result<Arc<Collection>> {
        let header = CollectionHeader::new(self.dim, metadata);
        let index = match kind {
            CollectionKind::Session => Arc::new(MemoryIndex::new(name, header.clone())) as Arc<dyn VectorIndex>,
            CollectionKind::Permanent => self.storage.build(name, header.clone()).await?,
        };
        Ok(Arc::new(Collection { name: name.to_string(), kind, header, index }))
    }

    /// Create a new permanent collection. Duplicates, default names and the
    /// session prefix are rejected.
    pub async fn create_collection(&self, name: &str, metadata: Meta) -> Result<Arc<Collection>> {
        validate_collection_name(name)?;
        if is_default_collection(name) {
            return Err(Error::validation(format!("Collection '{name}' already exists as a default collection")));
        }
        if name.starts_with(SESSION_PREFIX) {
            return Err(Error::validation(format!("Collection names starting with '{SESSION_PREFIX}' are reserved")));
        }
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(Error::validation(format!("Collection '{name}' already exists")));
        }
        let collection = self.build(name, CollectionKind::Permanent, metadata).await?;
        collections.insert(name.to_string(), collection.clone());
        tracing::info!(collection = name, "created collection");
        Ok(collection)
    }

    /// Idempotent variant used by ingestion. Names carrying the session
    /// prefix get an in-memory session collection.
    pub async fn get_or_create(&self, name: &str, metadata: Meta) -> Result<Arc<Collection>> {
        if let Some(existing) = self.collections.read().await.get(name) {
            return Ok(existing.clone());
        }
        let kind = if name.starts_with(SESSION_PREFIX) { CollectionKind::Session } else { CollectionKind::Permanent };
        // Only permanent names become file and table names.
        if kind == CollectionKind::Permanent {
            validate_collection_name(name)?;
        }
        let mut collections = self.collections.write().await;
        if let Some(existing) = collections.get(name) {
            return Ok(existing.clone());
        }
        let collection = self.build(name, kind, metadata).await?;
        collections.insert(name.to_string(), collection.clone());
        tracing::info!(collection = name, kind = ?kind, "created collection");
        Ok(collection)
    }

    pub async fn get_or_create_session(&self, session_id: &str) -> Result<Arc<Collection>> {
        let mut metadata = Meta::new();
        metadata.insert("session".into(), json!(session_id));
        self.get_or_create(&session_collection_name(session_id), metadata).await
    }

    pub async fn get(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("collection '{name}'")))
    }

    pub async fn contains(&self, name: &str) -> bool { self.collections.read().await.contains_key(name) }

    /// Query one collection. Unknown names are `NotFound`; an empty
    /// collection yields no hits.
    pub async fn query(
        &self,
        name: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let collection = self.get(name).await?;
        collection.index().query(vector, k, filter).await
    }

    /// Every collection with its record count, sorted by name.
    pub async fn list(&self) -> Result<Vec<CollectionInfo>> {
        let collections: Vec<Arc<Collection>> = self.collections.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(collections.len());
        for collection in collections {
            infos.push(collection.info().await?);
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    /// Remove a collection and its persisted state. Default collections
    /// cannot be deleted.
    pub async fn delete(&self, name: &str) -> Result<()> {
        if is_default_collection(name) {
            return Err(Error::validation(format!("Default collection '{name}' cannot be deleted")));
        }
        let mut collections = self.collections.write().await;
        let collection = collections.remove(name).ok_or_else(|| Error::not_found(format!("collection '{name}'")))?;
        if let Err(e) = collection.index().destroy().await {
            collections.insert(name.to_string(), collection);
            return Err(e);
        }
        if collection.kind() == CollectionKind::Permanent {
            self.storage.forget(name).await?;
        }
        tracing::info!(collection = name, "deleted collection");
        Ok(())
    }

    /// Drop every session collection (their data is never persisted).
    pub async fn drop_sessions(&self) -> usize {
        let mut collections = self.collections.write().await;
        let before = collections.len();
        collections.retain(|_, c| c.kind() != CollectionKind::Session);
        before - collections.len()
    }
}
