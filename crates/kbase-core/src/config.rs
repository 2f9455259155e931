use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::chunker::ChunkingConfig;
use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(KbConfig::default())).merge(Toml::file("kbase.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("kbase.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("kbase.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("kbase.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("KBASE_").split("__"));

        let config = Self { figment };
        config.settings()?;
        Ok(config)
    }

    /// Wrap an explicit figment (tests, embedding callers).
    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Typed, validated view of the whole configuration.
    pub fn settings(&self) -> anyhow::Result<KbConfig> {
        let settings: KbConfig = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KbConfig {
    pub storage: StorageConfig,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
}

impl KbConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::validation("chunking.chunk_size must be > 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::validation("chunking.chunk_overlap must be smaller than chunking.chunk_size"));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::validation("embedding.dimension must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.search.score_threshold) {
            return Err(Error::validation("search.score_threshold must be within [0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Memory,
    #[serde(alias = "lance")]
    LanceDb,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub backend: IndexBackend,
    pub settings_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: "~/.kbase".to_string(), backend: IndexBackend::Memory, settings_file: "settings.json".to_string() }
    }
}

impl StorageConfig {
    pub fn data_dir(&self) -> PathBuf { expand_path(&self.data_dir) }
    pub fn settings_path(&self) -> PathBuf { resolve_with_base(&self.data_dir(), &self.settings_file) }
    pub fn vectors_dir(&self) -> PathBuf { self.data_dir().join("vectors") }
    pub fn lancedb_dir(&self) -> PathBuf { self.data_dir().join("lancedb") }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dimension: usize,
    pub max_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self { Self { dimension: 384, max_tokens: 256 } }
}

impl EmbeddingConfig {
    /// Roughly four characters per token.
    pub fn max_chars(&self) -> usize { self.max_tokens * 4 }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    pub score_threshold: f32,
}

impl Default for SearchConfig {
    fn default() -> Self { Self { default_limit: 10, score_threshold: 0.3 } }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
