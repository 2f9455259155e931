//! Key/value settings stores.
//!
//! `JsonFileStore` keeps every key in one JSON object on disk and rewrites the
//! file (temp file + rename) on each `set`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::traits::KeyValueStore;

pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => match serde_json::from_slice::<Value>(&bytes)? {
                Value::Object(map) => map,
                _ => {
                    tracing::warn!(path = %path.display(), "settings file is not a JSON object, starting empty");
                    Map::new()
                }
            },
            Ok(_) => Map::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, state: Mutex::new(state) })
    }

    pub fn path(&self) -> &Path { &self.path }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.state.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut state = self.state.lock().await;
        let previous = state.insert(key.to_string(), value);
        let bytes = serde_json::to_vec_pretty(&*state)?;
        if let Err(e) = write_atomic(&self.path, &bytes).await {
            // Keep memory and disk in agreement.
            match previous {
                Some(v) => state.insert(key.to_string(), v),
                None => state.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

/// Write `bytes` to `path` via a sibling temp file and rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[derive(Default)]
pub struct MemoryKvStore {
    state: Mutex<Map<String, Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.state.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.state.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}
