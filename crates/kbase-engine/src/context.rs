//! Turns search results into a text block for a downstream completion.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use kbase_core::error::Error;
use kbase_core::types::SearchResult;

/// How retrieved knowledge should be weighed against everything else.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    /// Supplementary material.
    #[default]
    Augment,
    /// Primary source material, preferred over general knowledge.
    Priority,
    /// The only material the answer may be based on.
    Only,
}

impl ContextMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Augment => "augment",
            Self::Priority => "priority",
            Self::Only => "only",
        }
    }
}

impl fmt::Display for ContextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ContextMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "augment" => Ok(Self::Augment),
            "priority" => Ok(Self::Priority),
            "only" => Ok(Self::Only),
            other => Err(Error::validation(format!("unknown context mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextSource {
    pub document_id: String,
    pub title: String,
    pub max_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextBlock {
    pub mode: ContextMode,
    pub text: String,
    pub sources: Vec<ContextSource>,
}

pub const NO_KNOWLEDGE: &str = "No relevant information was found in the knowledge base.";

impl ContextBlock {
    pub fn is_empty(&self) -> bool { self.sources.is_empty() }

    /// Instruction the downstream consumer must follow for this mode.
    pub fn system_directive(&self) -> Option<&'static str> {
        match self.mode {
            ContextMode::Augment => None,
            ContextMode::Priority => Some("Prioritize the provided knowledge base information in your response."),
            ContextMode::Only => {
                Some("Base your response only on the provided knowledge base information. Do not use outside knowledge.")
            }
        }
    }

    pub fn compose_prompt(&self, query: &str) -> String {
        if self.text.is_empty() {
            return query.to_string();
        }
        match self.mode {
            ContextMode::Augment => format!("{query}\n{}", self.text),
            ContextMode::Priority | ContextMode::Only => format!("{}\n\nUser query: {query}", self.text),
        }
    }
}

pub fn assemble_context(results: &[SearchResult], mode: ContextMode) -> ContextBlock {
    if results.is_empty() {
        let text = if mode == ContextMode::Only { NO_KNOWLEDGE.to_string() } else { String::new() };
        return ContextBlock { mode, text, sources: Vec::new() };
    }

    let header = match mode {
        ContextMode::Augment => "Supplementary information from the knowledge base:",
        ContextMode::Priority => "Primary source material from the knowledge base (prefer it over general knowledge):",
        ContextMode::Only => "Knowledge base material (answer using only this):",
    };
    let mut text = String::from(header);
    let mut sources = Vec::with_capacity(results.len());
    for (i, result) in results.iter().enumerate() {
        let title = if result.title.is_empty() { "Untitled Document" } else { result.title.as_str() };
        text.push_str(&format!("\n\n[{}] {} (score {:.2})", i + 1, title, result.max_score));
        for chunk in &result.chunks {
            text.push('\n');
            text.push_str(chunk.content.trim());
        }
        sources.push(ContextSource {
            document_id: result.document_id.clone(),
            title: title.to_string(),
            max_score: result.max_score,
        });
    }
    ContextBlock { mode, text, sources }
}
