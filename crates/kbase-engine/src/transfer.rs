//! Export/import payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kbase_core::types::{Document, VectorRecord};

pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub documents: Vec<Document>,
}

/// One entry of an import payload. Only `content` is required to ingest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImportItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default, rename = "type")]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Rebuild a document's text from its chunk records using their recorded
/// character offsets. Overlapping prefixes are skipped; gaps (whitespace
/// trimmed at chunk edges) become a single space.
pub(crate) fn reconstruct_content(mut records: Vec<VectorRecord>) -> String {
    let offset = |r: &VectorRecord, key: &str| r.metadata.get(key).and_then(serde_json::Value::as_u64).map(|v| v as usize);
    records.sort_by_key(|r| offset(r, "chunkIndex").unwrap_or(0));

    let mut out = String::new();
    let mut covered: Option<usize> = None;
    for record in &records {
        let (Some(start), Some(end)) = (offset(record, "startChar"), offset(record, "endChar")) else {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&record.text);
            continue;
        };
        match covered {
            None => out.push_str(&record.text),
            Some(c) if start >= c => {
                if start > c {
                    out.push(' ');
                }
                out.push_str(&record.text);
            }
            Some(c) if end > c => out.extend(record.text.chars().skip(c - start)),
            Some(_) => {}
        }
        covered = Some(covered.map_or(end, |c| c.max(end)));
    }
    out
}
