//! Overlapping, boundary-aware text chunking.
//!
//! Windows are measured in characters. Before cutting a window the chunker
//! looks backward through the last 20% of it for a `.` (cut after it), then
//! for a space (cut at it), and only then cuts at the raw window edge.

use serde::{Deserialize, Serialize};

use crate::types::Chunk;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 1000, chunk_overlap: 200 }
    }
}

/// A trimmed window of the source text. Offsets are character positions,
/// `end_offset` exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextSpan> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    if n == 0 {
        return Vec::new();
    }
    if chunk_size == 0 || n <= chunk_size {
        return trimmed_span(&chars, 0, n).into_iter().collect();
    }

    let mut spans = Vec::new();
    let mut start = 0usize;
    while start < n {
        let window_end = start + chunk_size;
        let cut = if window_end < n { find_cut(&chars, start, window_end, chunk_size) } else { n };
        if let Some(span) = trimmed_span(&chars, start, cut) {
            spans.push(span);
        }
        if cut >= n {
            break;
        }
        let next = cut.saturating_sub(overlap);
        // Always advance; keep as much of the overlap as still fits.
        start = next.max(start + 1);
    }
    spans
}

fn find_cut(chars: &[char], start: usize, window_end: usize, chunk_size: usize) -> usize {
    let threshold = start + chunk_size * 4 / 5;
    if let Some(p) = (threshold + 1..window_end).rev().find(|&i| chars[i] == '.') {
        return p + 1;
    }
    if let Some(p) = (threshold + 1..=window_end).rev().find(|&i| chars[i] == ' ') {
        return p;
    }
    window_end
}

fn trimmed_span(chars: &[char], start: usize, end: usize) -> Option<TextSpan> {
    let slice = &chars[start..end];
    let lead = slice.iter().take_while(|c| c.is_whitespace()).count();
    if lead == slice.len() {
        return None;
    }
    let trail = slice.iter().rev().take_while(|c| c.is_whitespace()).count();
    let (s, e) = (start + lead, end - trail);
    Some(TextSpan { content: chars[s..e].iter().collect(), start_offset: s, end_offset: e })
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self { Self { config } }

    pub fn config(&self) -> &ChunkingConfig { &self.config }

    /// Chunk a document's content, assigning `<document_id>_chunk_<n>` ids.
    pub fn chunk_document(&self, document_id: &str, content: &str) -> Vec<Chunk> {
        chunk_text(content, self.config.chunk_size, self.config.chunk_overlap)
            .into_iter()
            .enumerate()
            .map(|(index, span)| Chunk {
                id: Chunk::id_for(document_id, index),
                document_id: document_id.to_string(),
                content: span.content,
                chunk_index: index,
                start_offset: span.start_offset,
                end_offset: span.end_offset,
            })
            .collect()
    }
}
