use async_trait::async_trait;
use serde::Serialize;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use twox_hash::XxHash64;

use kbase_core::config::EmbeddingConfig;
use kbase_core::error::Result;
use kbase_core::traits::Embedder;

pub mod pool;
pub mod tokenize;

pub use pool::{cosine_similarity, l2_normalize};
pub use tokenize::{tokenize, truncate_input};

const BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub dimension: usize,
    pub max_tokens: usize,
    pub initialized: bool,
}

/// Deterministic bag-of-words embedder.
///
/// Every token is hashed (xxHash64, seed 0) into one of `dim` buckets; the
/// bucket counts are L2-normalised. Texts sharing stemmed words end up with
/// positive cosine similarity, which is all retrieval needs to be testable
/// without model weights.
pub struct HashingEmbedder {
    dim: usize,
    max_tokens: usize,
    initialized: AtomicBool,
}

impl HashingEmbedder {
    pub fn new(dim: usize, max_tokens: usize) -> Self {
        Self { dim: dim.max(1), max_tokens, initialized: AtomicBool::new(false) }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self { Self::new(config.dimension, config.max_tokens) }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "hashing-bow".to_string(),
            dimension: self.dim,
            max_tokens: self.max_tokens,
            initialized: self.initialized.load(Ordering::Acquire),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let text = truncate_input(text, self.max_len());
        let mut v = vec![0f32; self.dim];
        for token in tokenize(&text) {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let idx = (hasher.finish() % self.dim as u64) as usize;
            v[idx] += 1.0;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dim(&self) -> usize { self.dim }

    fn max_len(&self) -> usize { self.max_tokens * 4 }

    async fn initialize(&self) -> Result<()> {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            tracing::info!(dim = self.dim, max_tokens = self.max_tokens, "hashing embedder ready");
        }
        Ok(())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.initialize().await?;
        let mut out = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(BATCH_SIZE).enumerate() {
            out.extend(batch.iter().map(|t| self.embed_one(t)));
            tracing::debug!(batch = i + 1, done = out.len(), total = texts.len(), "embedded batch");
        }
        Ok(out)
    }
}

pub fn get_default_embedder(config: &EmbeddingConfig) -> Arc<dyn Embedder> {
    Arc::new(HashingEmbedder::from_config(config))
}
