use std::fs;
use tempfile::TempDir;

use kbase_core::chunker::{chunk_text, Chunker, ChunkingConfig};
use kbase_core::config::{Config, IndexBackend, KbConfig};
use kbase_core::filter::MetadataFilter;
use kbase_core::kv::{JsonFileStore, MemoryKvStore};
use kbase_core::parser::{list_supported_files, FileFormat, ParserSet};
use kbase_core::traits::KeyValueStore;
use kbase_core::types::{Document, DocumentSource, Meta};
use serde_json::json;

/// Stitch spans back together by skipping the part each span shares with
/// what has already been emitted.
fn reconstruct(text: &str, spans: &[kbase_core::chunker::TextSpan]) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::new();
    let mut covered = 0usize;
    for span in spans {
        let from = covered.max(span.start_offset);
        if from > covered {
            out.extend(&chars[covered..from]);
        }
        if span.end_offset > from {
            out.extend(&chars[from..span.end_offset]);
            covered = span.end_offset;
        }
    }
    out.extend(&chars[covered..]);
    out
}

#[test]
fn short_text_is_a_single_chunk() {
    let spans = chunk_text("Short text", 100, 20);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].content, "Short text");
    assert_eq!((spans[0].start_offset, spans[0].end_offset), (0, 10));
}

#[test]
fn whitespace_only_text_yields_nothing() {
    assert!(chunk_text("   \n\t  ", 100, 20).is_empty());
    assert!(chunk_text("", 100, 20).is_empty());
}

#[test]
fn chunk_ends_at_sentence_boundary_in_last_fifth() {
    // Window of 50: the '.' at index 44 lies inside the last 20% (> 40).
    let first = "a".repeat(44);
    let text = format!("{first}. then a long continuation without any stops at all here");
    let spans = chunk_text(&text, 50, 10);
    assert_eq!(spans[0].content, format!("{first}."));
    assert_eq!(spans[0].end_offset, 45);
    assert_eq!(spans[1].start_offset, 35, "next window starts overlap chars before the cut");
}

#[test]
fn falls_back_to_word_boundary_then_raw_cut() {
    let text = format!("{} {}", "b".repeat(45), "c".repeat(40));
    let spans = chunk_text(&text, 50, 5);
    assert_eq!(spans[0].content, "b".repeat(45), "cut at the space");

    let solid = "d".repeat(120);
    let spans = chunk_text(&solid, 50, 5);
    assert_eq!(spans[0].content.chars().count(), 50, "no boundary: raw cut");
    assert_eq!(spans[1].start_offset, 45);
}

#[test]
fn chunks_cover_the_original_text() {
    let text = "The quick brown fox jumps over the lazy dog. ".repeat(40)
        + "Pack my box with five dozen liquor jugs. Sphinx of black quartz, judge my vow.";
    for (size, overlap) in [(100, 20), (64, 8), (250, 50), (37, 1)] {
        let spans = chunk_text(&text, size, overlap);
        assert!(spans.len() > 1);
        let rebuilt = reconstruct(&text, &spans);
        assert_eq!(rebuilt.trim_end(), text.trim_end(), "size={size} overlap={overlap}");
        for span in &spans {
            assert!(span.content.chars().count() <= size);
            assert!(!span.content.trim().is_empty());
        }
    }
}

#[test]
fn consecutive_chunks_overlap_even_with_large_overlap() {
    let config = KbConfig {
        chunking: ChunkingConfig { chunk_size: 100, chunk_overlap: 90 },
        ..KbConfig::default()
    };
    config.validate().unwrap();

    let text = ".. rho. ".repeat(60);
    let spans = chunk_text(&text, 100, 90);
    assert!(spans.len() > 1);
    for w in spans.windows(2) {
        assert!(w[0].end_offset > w[1].start_offset, "{:?} then {:?}", (w[0].start_offset, w[0].end_offset), (w[1].start_offset, w[1].end_offset));
        assert!(w[1].start_offset > w[0].start_offset);
    }
    assert_eq!(reconstruct(&text, &spans).trim_end(), text.trim_end());
}

#[test]
fn chunking_is_deterministic_and_assigns_ids() {
    let chunker = Chunker::new(ChunkingConfig { chunk_size: 40, chunk_overlap: 10 });
    let text = "One sentence here. Another sentence there. And a third one to finish.";
    let a = chunker.chunk_document("doc1", text);
    let b = chunker.chunk_document("doc1", text);
    assert_eq!(a, b);
    assert_eq!(a[0].id, "doc1_chunk_0");
    assert_eq!(a[1].id, "doc1_chunk_1");
    assert!(a.iter().all(|c| c.document_id == "doc1"));
}

#[test]
fn multibyte_text_is_chunked_by_characters() {
    let text = "héllo wörld ".repeat(20);
    let spans = chunk_text(&text, 30, 5);
    assert!(spans.iter().all(|s| s.content.chars().count() <= 30));
    assert_eq!(reconstruct(&text, &spans).trim_end(), text.trim_end());
}

#[test]
fn metadata_filter_exact_and_set_membership() {
    let mut meta = Meta::new();
    meta.insert("source".into(), json!("webpage"));
    meta.insert("chunkIndex".into(), json!(2));

    assert!(MetadataFilter::new().equals("source", "webpage").matches(&meta));
    assert!(!MetadataFilter::new().equals("source", "manual").matches(&meta));
    assert!(MetadataFilter::new().any_of("chunkIndex", [1, 2, 3]).matches(&meta));
    assert!(!MetadataFilter::new().equals("missing", "x").matches(&meta));

    let mut raw = Meta::new();
    raw.insert("source".into(), json!(["bookmark", "webpage"]));
    raw.insert("ignored".into(), serde_json::Value::Null);
    assert!(MetadataFilter::from_map(&raw).matches(&meta));
}

#[test]
fn parses_markdown_html_and_json() {
    let parsers = ParserSet::new().expect("parsers");

    let md = b"# Field Notes\n\nSome text.\n\n## Details\n\n```\ncode\n```\n";
    let parsed = parsers.parse(md, FileFormat::Markdown, "notes.md").expect("md");
    assert_eq!(parsed.title, "Field Notes");
    assert_eq!(parsed.metadata["hasCode"], json!(true));
    assert_eq!(parsed.metadata["headings"].as_array().map(Vec::len), Some(2));

    let html = br##"<html><head><title>Camp &amp; Fire</title><script>var x = 1;</script></head>
        <body><nav>menu</nav><main><h1>Heading</h1><p>Build a <b>small</b> fire.</p><a href="/more">More</a><a href="#top">Top</a></main></body></html>"##;
    let parsed = parsers.parse(html, FileFormat::Html, "page.html").expect("html");
    assert_eq!(parsed.title, "Camp & Fire");
    assert!(parsed.content.contains("Build a small fire."));
    assert!(!parsed.content.contains("var x"));
    assert!(!parsed.content.contains("menu"), "only the <main> region is kept");
    assert_eq!(parsed.metadata["links"].as_array().map(Vec::len), Some(1));

    let parsed = parsers.parse(br#"{"b":1,"a":[1,2]}"#, FileFormat::Json, "data.json").expect("json");
    assert!(parsed.content.contains("\"a\""));
    assert_eq!(parsed.metadata["type"], json!("object"));
}

#[test]
fn web_page_metadata_and_fallback_title() {
    let parsers = ParserSet::new().expect("parsers");
    let html = r#"<html><head><meta name="description" content="A page"><meta name="author" content="Ann"></head><body><p>Hello there</p></body></html>"#;
    let parsed = parsers.parse_web_page("https://example.org", html).expect("page");
    assert_eq!(parsed.title, "Untitled Page");
    assert_eq!(parsed.metadata["description"], json!("A page"));
    assert_eq!(parsed.metadata["author"], json!("Ann"));
    assert_eq!(parsed.content, "Hello there");
}

#[test]
fn unsupported_formats_are_reported_verbatim() {
    let parsers = ParserSet::new().expect("parsers");
    let err = parsers.parse_as(b"x", "xlsx", "sheet.xlsx").unwrap_err();
    assert!(matches!(err, kbase_core::Error::UnsupportedFormat(ref t) if t == "xlsx"));
    let err = parsers.parse(b"%PDF", FileFormat::Pdf, "a.pdf").unwrap_err();
    assert!(matches!(err, kbase_core::Error::UnsupportedFormat(_)));
    assert!(!parsers.supported_formats().contains(&FileFormat::Pdf));
    let err = parsers.parse(b"not a zip", FileFormat::Docx, "a.docx").unwrap_err();
    assert!(matches!(err, kbase_core::Error::Upstream(_)));
}

#[test]
fn lists_supported_files_recursively() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("sub")).unwrap();
    fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
    fs::write(tmp.path().join("sub/b.md"), "# b").unwrap();
    fs::write(tmp.path().join("c.bin"), [0u8, 1]).unwrap();
    let files = list_supported_files(tmp.path());
    assert_eq!(files.len(), 2);
}

#[tokio::test]
async fn json_file_store_persists_across_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested/settings.json");
    {
        let store = JsonFileStore::open(&path).await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        store.set("k", json!({"enabled": true})).await.unwrap();
    }
    let store = JsonFileStore::open(&path).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), Some(json!({"enabled": true})));

    let mem = MemoryKvStore::new();
    mem.set("x", json!(1)).await.unwrap();
    assert_eq!(mem.get("x").await.unwrap(), Some(json!(1)));
}

#[test]
fn config_defaults_and_validation() {
    let config = Config::from_figment(figment::Figment::from(figment::providers::Serialized::defaults(KbConfig::default())));
    let settings = config.settings().unwrap();
    assert_eq!(settings.chunking.chunk_size, 1000);
    assert_eq!(settings.chunking.chunk_overlap, 200);
    assert_eq!(settings.embedding.dimension, 384);
    assert_eq!(settings.storage.backend, IndexBackend::Memory);
    assert_eq!(config.get::<usize>("search.default_limit").unwrap(), 10);

    let mut bad = KbConfig::default();
    bad.chunking.chunk_overlap = bad.chunking.chunk_size;
    assert!(bad.validate().unwrap_err().is_validation());
}

#[test]
fn document_serializes_with_camel_case_and_restores_from_meta() {
    let doc = Document {
        id: "abc".into(),
        title: "T".into(),
        content: "body".into(),
        source: DocumentSource::Bookmark,
        url: Some("https://x".into()),
        collection: Some("bookmarks".into()),
        session: None,
        created_at: chrono::Utc::now(),
        word_count: 1,
        doc_type: "bookmark".into(),
        chunk_ids: vec!["abc_chunk_0".into()],
        metadata: Meta::new(),
    };
    let value = serde_json::to_value(&doc).unwrap();
    assert_eq!(value["wordCount"], json!(1));
    assert_eq!(value["type"], json!("bookmark"));
    assert_eq!(value["source"], json!("bookmark"));

    let restored: Document = doc.to_meta().into();
    assert_eq!(restored.content, "");
    assert_eq!(restored.chunk_ids, doc.chunk_ids);
    assert_eq!(restored.index_collection(), "bookmarks");
}
