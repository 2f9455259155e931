//! Core types, traits and helpers for the knowledge base workspace.
//!
//! Everything here is backend-agnostic: the vector backends live in
//! `kbase-vector`, embedders in `kbase-embed`, orchestration in `kbase-engine`.

pub mod chunker;
pub mod config;
pub mod error;
pub mod filter;
pub mod kv;
pub mod parser;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
