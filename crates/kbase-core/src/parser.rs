//! Document parsers, dispatched by [`FileFormat`].
//!
//! Text, Markdown, HTML, DOCX and JSON are handled in-process. PDF has no
//! built-in backend; plug one in with [`ParserSet::with_pdf`].

use pulldown_cmark::{Event, HeadingLevel, Parser as MarkdownEvents, Tag, TagEnd};
use regex::Regex;
use serde_json::{json, Value};
use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::traits::DocumentParser;
use crate::types::{count_words, Meta, ParsedDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    Pdf,
    Text,
    Markdown,
    Html,
    Docx,
    Json,
}

impl FileFormat {
    pub const ALL: [FileFormat; 6] = [Self::Pdf, Self::Text, Self::Markdown, Self::Html, Self::Docx, Self::Json];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            "docx" => Some(Self::Docx),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|e| e.to_str()).and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "txt",
            Self::Markdown => "md",
            Self::Html => "html",
            Self::Docx => "docx",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for FileFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_extension(s).ok_or_else(|| Error::UnsupportedFormat(s.to_string()))
    }
}

pub struct ParserSet {
    text: TextParser,
    markdown: MarkdownParser,
    html: HtmlParser,
    docx: DocxParser,
    json: JsonParser,
    pdf: Option<Arc<dyn DocumentParser>>,
}

impl ParserSet {
    pub fn new() -> Result<Self> {
        Ok(Self {
            text: TextParser,
            markdown: MarkdownParser,
            html: HtmlParser::new()?,
            docx: DocxParser::new()?,
            json: JsonParser,
            pdf: None,
        })
    }

    pub fn with_pdf(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.pdf = Some(parser);
        self
    }

    pub fn is_supported(&self, format: FileFormat) -> bool {
        match format {
            FileFormat::Pdf => self.pdf.is_some(),
            FileFormat::Text | FileFormat::Markdown | FileFormat::Html | FileFormat::Docx | FileFormat::Json => true,
        }
    }

    pub fn supported_formats(&self) -> Vec<FileFormat> {
        FileFormat::ALL.into_iter().filter(|f| self.is_supported(*f)).collect()
    }

    pub fn parse(&self, bytes: &[u8], format: FileFormat, file_name: &str) -> Result<ParsedDocument> {
        let parsed = match format {
            FileFormat::Text => self.text.parse(bytes, file_name),
            FileFormat::Markdown => self.markdown.parse(bytes, file_name),
            FileFormat::Html => self.html.parse(bytes, file_name),
            FileFormat::Docx => self.docx.parse(bytes, file_name),
            FileFormat::Json => self.json.parse(bytes, file_name),
            FileFormat::Pdf => match &self.pdf {
                Some(parser) => parser.parse(bytes, file_name),
                None => Err(Error::UnsupportedFormat("pdf (no PDF parser configured)".to_string())),
            },
        }?;
        tracing::debug!(file = file_name, format = %format, words = parsed.word_count, "parsed document");
        Ok(parsed)
    }

    /// Parse by extension-like type name (`"md"`, `"htm"`, ...).
    pub fn parse_as(&self, bytes: &[u8], file_type: &str, file_name: &str) -> Result<ParsedDocument> {
        let format: FileFormat = file_type.parse()?;
        self.parse(bytes, format, file_name)
    }

    pub fn parse_web_page(&self, url: &str, html: &str) -> Result<ParsedDocument> {
        self.html.parse_page(url, html)
    }
}

fn meta_from(value: Value) -> Meta {
    match value {
        Value::Object(map) => map,
        _ => Meta::new(),
    }
}

pub struct TextParser;

impl DocumentParser for TextParser {
    fn parse(&self, bytes: &[u8], file_name: &str) -> Result<ParsedDocument> {
        let content = String::from_utf8_lossy(bytes).into_owned();
        Ok(ParsedDocument {
            title: file_name.to_string(),
            word_count: count_words(&content),
            metadata: meta_from(json!({ "encoding": "utf-8", "size": bytes.len() })),
            content,
        })
    }
}

pub struct MarkdownParser;

fn heading_depth(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

impl DocumentParser for MarkdownParser {
    fn parse(&self, bytes: &[u8], file_name: &str) -> Result<ParsedDocument> {
        let content = String::from_utf8_lossy(bytes).into_owned();
        let mut headings = Vec::new();
        let mut current: Option<(u8, String)> = None;
        let mut has_code = false;
        for event in MarkdownEvents::new(&content) {
            match event {
                Event::Start(Tag::Heading { level, .. }) => current = Some((heading_depth(level), String::new())),
                Event::End(TagEnd::Heading(_)) => {
                    if let Some((level, text)) = current.take() {
                        headings.push(json!({ "level": level, "text": text.trim() }));
                    }
                }
                Event::Start(Tag::CodeBlock(_)) => has_code = true,
                Event::Text(t) | Event::Code(t) => {
                    if let Some((_, text)) = current.as_mut() {
                        text.push_str(&t);
                    }
                }
                _ => {}
            }
        }
        let title = headings
            .iter()
            .find(|h| h["level"] == 1)
            .and_then(|h| h["text"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| file_name.to_string());
        Ok(ParsedDocument {
            title,
            word_count: count_words(&content),
            metadata: meta_from(json!({ "format": "markdown", "hasCode": has_code, "headings": headings })),
            content,
        })
    }
}

pub struct HtmlParser {
    noise: Regex,
    title: Regex,
    h1: Regex,
    main: Regex,
    article: Regex,
    body: Regex,
    block: Regex,
    tag: Regex,
    link: Regex,
    img: Regex,
    meta: Regex,
    attr_name: Regex,
    attr_content: Regex,
    spaces: Regex,
    blank_lines: Regex,
}

impl HtmlParser {
    pub fn new() -> Result<Self> {
        let re = |pattern: &str| Regex::new(pattern).map_err(|e| Error::validation(format!("bad pattern {pattern}: {e}")));
        Ok(Self {
            noise: re(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<!--.*?-->")?,
            title: re(r"(?is)<title[^>]*>(.*?)</title\s*>")?,
            h1: re(r"(?is)<h1[^>]*>(.*?)</h1\s*>")?,
            main: re(r"(?is)<main\b[^>]*>(.*?)</main\s*>")?,
            article: re(r"(?is)<article\b[^>]*>(.*?)</article\s*>")?,
            body: re(r"(?is)<body\b[^>]*>(.*?)</body\s*>")?,
            block: re(r"(?i)</?(p|div|br|li|ul|ol|h[1-6]|tr|table|section|header|footer|blockquote|pre)\b[^>]*>")?,
            tag: re(r"(?s)<[^>]+>")?,
            link: re(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a\s*>"#)?,
            img: re(r"(?i)<img\b")?,
            meta: re(r"(?is)<meta\s[^>]*>")?,
            attr_name: re(r#"(?i)name\s*=\s*["']([^"']+)["']"#)?,
            attr_content: re(r#"(?is)content\s*=\s*["']([^"']*)["']"#)?,
            spaces: re(r"[ \t\u{a0}]+")?,
            blank_lines: re(r"\n{3,}")?,
        })
    }

    fn inline_text(&self, fragment: &str) -> String {
        decode_entities(&self.tag.replace_all(fragment, "")).split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn to_text(&self, fragment: &str) -> String {
        let with_breaks = self.block.replace_all(fragment, "\n");
        let stripped = decode_entities(&self.tag.replace_all(&with_breaks, ""));
        let lines: Vec<String> = stripped.lines().map(|l| self.spaces.replace_all(l, " ").trim().to_string()).collect();
        self.blank_lines.replace_all(lines.join("\n").trim(), "\n\n").into_owned()
    }

    fn capture(&self, re: &Regex, html: &str) -> Option<String> {
        re.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
    }

    fn meta_content(&self, html: &str, name: &str) -> String {
        self.meta
            .find_iter(html)
            .map(|m| m.as_str())
            .find(|tag| self.capture(&self.attr_name, tag).is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .and_then(|tag| self.capture(&self.attr_content, tag))
            .map(|c| decode_entities(&c))
            .unwrap_or_default()
    }

    fn links(&self, html: &str) -> Vec<Value> {
        self.link
            .captures_iter(html)
            .filter_map(|c| {
                let href = c.get(1)?.as_str();
                if href.starts_with('#') {
                    return None;
                }
                Some(json!({ "text": self.inline_text(c.get(2).map_or("", |m| m.as_str())), "href": href }))
            })
            .collect()
    }

    fn extract(&self, raw: &str) -> (Option<String>, String, String) {
        let html = self.noise.replace_all(raw, "");
        let title = self
            .capture(&self.title, &html)
            .or_else(|| self.capture(&self.h1, &html))
            .map(|t| self.inline_text(&t))
            .filter(|t| !t.is_empty());
        let region = self
            .capture(&self.main, &html)
            .or_else(|| self.capture(&self.article, &html))
            .or_else(|| self.capture(&self.body, &html))
            .unwrap_or_else(|| html.to_string());
        (title, self.to_text(&region), html.into_owned())
    }

    pub fn parse_page(&self, url: &str, raw: &str) -> Result<ParsedDocument> {
        let (title, content, html) = self.extract(raw);
        let metadata = json!({
            "description": self.meta_content(&html, "description"),
            "author": self.meta_content(&html, "author"),
            "format": "webpage",
            "url": url,
            "hasImages": self.img.is_match(&html),
            "links": self.links(&html),
        });
        Ok(ParsedDocument {
            title: title.unwrap_or_else(|| "Untitled Page".to_string()),
            word_count: count_words(&content),
            metadata: meta_from(metadata),
            content,
        })
    }
}

impl DocumentParser for HtmlParser {
    fn parse(&self, bytes: &[u8], file_name: &str) -> Result<ParsedDocument> {
        let raw = String::from_utf8_lossy(bytes);
        let (title, content, html) = self.extract(&raw);
        let metadata = json!({ "format": "html", "hasImages": self.img.is_match(&html), "links": self.links(&html) });
        Ok(ParsedDocument {
            title: title.unwrap_or_else(|| file_name.to_string()),
            word_count: count_words(&content),
            metadata: meta_from(metadata),
            content,
        })
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub struct DocxParser {
    paragraph_end: Regex,
    tab: Regex,
    tag: Regex,
}

impl DocxParser {
    pub fn new() -> Result<Self> {
        let re = |pattern: &str| Regex::new(pattern).map_err(|e| Error::validation(format!("bad pattern {pattern}: {e}")));
        Ok(Self { paragraph_end: re(r"</w:p>")?, tab: re(r"<w:tab\s*/>")?, tag: re(r"(?s)<[^>]+>")? })
    }
}

impl DocumentParser for DocxParser {
    fn parse(&self, bytes: &[u8], file_name: &str) -> Result<ParsedDocument> {
        let fail = |e: &dyn fmt::Display| Error::upstream(format!("Failed to parse DOCX: {e}"));
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| fail(&e))?;
        let mut xml = String::new();
        archive.by_name("word/document.xml").map_err(|e| fail(&e))?.read_to_string(&mut xml).map_err(|e| fail(&e))?;
        let xml = self.paragraph_end.replace_all(&xml, "\n");
        let xml = self.tab.replace_all(&xml, "\t");
        let content = decode_entities(&self.tag.replace_all(&xml, "")).trim().to_string();
        Ok(ParsedDocument {
            title: file_name.to_string(),
            word_count: count_words(&content),
            metadata: meta_from(json!({ "format": "docx" })),
            content,
        })
    }
}

pub struct JsonParser;

impl DocumentParser for JsonParser {
    fn parse(&self, bytes: &[u8], file_name: &str) -> Result<ParsedDocument> {
        let data: Value =
            serde_json::from_slice(bytes).map_err(|e| Error::upstream(format!("Failed to parse JSON: {e}")))?;
        let content = serde_json::to_string_pretty(&data)?;
        let keys: Vec<String> = match &data {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };
        let kind = if data.is_array() { "array" } else { "object" };
        Ok(ParsedDocument {
            title: file_name.to_string(),
            word_count: count_words(&content),
            metadata: meta_from(json!({ "format": "json", "keys": keys, "type": kind })),
            content,
        })
    }
}

/// Every file under `root` whose extension maps to a [`FileFormat`], sorted.
pub fn list_supported_files(root: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| FileFormat::from_path(p).is_some())
        .collect();
    files.sort();
    files
}
