use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use kbase_core::config::{Config, IndexBackend, KbConfig};
use kbase_core::filter::MetadataFilter;
use kbase_core::parser::list_supported_files;
use kbase_core::types::{Meta, SearchResult};
use kbase_engine::{AddOptions, ContextMode, KbEvent, KnowledgeBase, SearchOptions};

#[derive(Parser)]
#[command(name = "kbase", version, about = "Local knowledge base: ingest documents, search them, build context")]
struct Cli {
    /// Overrides `storage.data_dir`.
    #[arg(long, global = true, env = "KBASE_DATA_DIR")]
    data_dir: Option<String>,
    /// Overrides `storage.backend` (memory | lancedb).
    #[arg(long, global = true)]
    backend: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone)]
struct Target {
    #[arg(short, long)]
    collection: Option<String>,
    #[arg(short, long)]
    session: Option<String>,
    #[arg(short, long)]
    title: Option<String>,
}

impl Target {
    fn options(&self) -> AddOptions {
        AddOptions {
            title: self.title.clone(),
            collection: self.collection.clone(),
            session: self.session.clone(),
            ..AddOptions::default()
        }
    }
}

#[derive(Args)]
struct Query {
    query: String,
    /// Collection to search; repeatable. Defaults to `personal`.
    #[arg(short, long = "collection")]
    collections: Vec<String>,
    #[arg(short, long)]
    session: Option<String>,
    #[arg(short, long)]
    limit: Option<usize>,
    #[arg(long)]
    threshold: Option<f32>,
    /// `key=value` metadata condition; repeatable.
    #[arg(short, long = "filter")]
    filters: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Add text given inline.
    Add {
        text: String,
        #[command(flatten)]
        target: Target,
    },
    /// Parse and add a single file.
    AddFile {
        path: PathBuf,
        #[command(flatten)]
        target: Target,
    },
    /// Add a saved HTML page under its URL.
    AddUrl {
        url: String,
        html_file: PathBuf,
        #[command(flatten)]
        target: Target,
    },
    Bookmark {
        url: String,
        title: String,
        #[arg(short, long)]
        notes: Option<String>,
    },
    /// Add every supported file under a directory.
    IngestDir {
        dir: PathBuf,
        #[command(flatten)]
        target: Target,
    },
    Search(Query),
    /// Print the context block a completion would receive.
    Context {
        #[command(flatten)]
        query: Query,
        #[arg(short, long, default_value = "augment")]
        mode: ContextMode,
    },
    Stats,
    Collections,
    CreateCollection {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete a document by id, or a whole collection with `--collection`.
    Delete {
        id: String,
        #[arg(long)]
        collection: bool,
    },
    Export {
        #[arg(short, long)]
        collection: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    Import {
        file: PathBuf,
    },
}

fn load_settings(cli: &Cli) -> anyhow::Result<KbConfig> {
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let mut settings = config.settings()?;
    if let Some(dir) = &cli.data_dir {
        settings.storage.data_dir = dir.clone();
    }
    if let Some(backend) = &cli.backend {
        settings.storage.backend = match backend.to_ascii_lowercase().as_str() {
            "memory" => IndexBackend::Memory,
            "lancedb" | "lance" => IndexBackend::LanceDb,
            other => anyhow::bail!("unknown backend '{}'", other),
        };
    }
    Ok(settings)
}

fn search_options(kb: &KnowledgeBase, q: &Query) -> anyhow::Result<SearchOptions> {
    let mut options = kb.default_search_options();
    if !q.collections.is_empty() {
        options = options.collections(q.collections.iter().cloned());
    }
    if let Some(session) = &q.session {
        options = options.session(session.clone());
    }
    if let Some(limit) = q.limit {
        options = options.limit(limit);
    }
    if let Some(threshold) = q.threshold {
        options = options.score_threshold(threshold);
    }
    if !q.filters.is_empty() {
        let mut filter = MetadataFilter::new();
        for raw in &q.filters {
            let (key, value) = raw.split_once('=').with_context(|| format!("filter '{}' is not key=value", raw))?;
            let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
            filter = filter.equals(key, value);
        }
        options = options.filter(filter);
    }
    Ok(options)
}

fn print_results(query: &str, results: &[SearchResult]) {
    println!("\n🔍 Found {} documents for: \"{}\"", results.len(), query);
    for (i, result) in results.iter().enumerate() {
        println!(
            "\n  {}. score={:.4}  id={}  collection={}  title={}",
            i + 1,
            result.max_score,
            result.document_id,
            result.collection,
            result.title
        );
        for chunk in &result.chunks {
            let snippet: String = chunk.content.chars().take(160).collect();
            println!("     📝 [{}] {:.4} {}", chunk.chunk_index, chunk.score, snippet.replace('\n', " "));
        }
    }
}

fn bar(len: u64) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")?.progress_chars("=> "));
    Ok(pb)
}

async fn run(cli: Cli, kb: &KnowledgeBase) -> anyhow::Result<()> {
    match cli.command {
        Command::Add { text, target } => {
            let id = kb.add_document(&text, target.options()).await?;
            println!("✅ Added document {}", id);
        }
        Command::AddFile { path, target } => {
            let id = kb.ingest_path(&path, target.options()).await?;
            println!("✅ Added {} as {}", path.display(), id);
        }
        Command::AddUrl { url, html_file, target } => {
            let html = tokio::fs::read_to_string(&html_file).await?;
            let id = kb.add_web_page(&url, &html, target.options()).await?;
            println!("✅ Added web page {} as {}", url, id);
        }
        Command::Bookmark { url, title, notes } => {
            let mut options = AddOptions::default();
            if let Some(notes) = notes {
                options = options.with("notes", notes);
            }
            let id = kb.add_bookmark(&url, &title, options).await?;
            println!("🔖 Bookmarked {} as {}", url, id);
        }
        Command::IngestDir { dir, target } => {
            let files = list_supported_files(&dir);
            println!("Ingesting {} files from {}", files.len(), dir.display());
            let pb = bar(files.len() as u64)?;
            let (mut added, mut failed) = (0usize, 0usize);
            for path in files {
                pb.set_message(path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());
                match kb.ingest_path(&path, target.options()).await {
                    Ok(_) => added += 1,
                    Err(e) => {
                        failed += 1;
                        pb.println(format!("⚠️  {}: {}", path.display(), e));
                    }
                }
                pb.inc(1);
            }
            pb.finish_and_clear();
            println!("✅ Ingest complete: {} added, {} failed", added, failed);
        }
        Command::Search(q) => {
            let options = search_options(kb, &q)?;
            let results = kb.search(&q.query, &options).await?;
            print_results(&q.query, &results);
        }
        Command::Context { query, mode } => {
            let options = search_options(kb, &query)?;
            let block = kb.search_context(&query.query, &options, mode).await?;
            if let Some(directive) = block.system_directive() {
                println!("🧭 {}\n", directive);
            }
            println!("{}", block.compose_prompt(&query.query));
        }
        Command::Stats => {
            let stats = kb.get_stats().await?;
            println!("📊 Knowledge base");
            println!("  documents: {}", stats.total_documents);
            println!("  session documents: {} in {} sessions", stats.session_documents, stats.active_sessions);
            for (name, c) in &stats.collections {
                println!("  {}: {} chunks", name, c.count);
            }
        }
        Command::Collections => {
            for info in kb.list_collections().await? {
                let description = info.metadata.get("description").and_then(Value::as_str).unwrap_or_default();
                println!("  {} ({} chunks) {}", info.name, info.count, description);
            }
        }
        Command::CreateCollection { name, description } => {
            let mut metadata = Meta::new();
            if let Some(d) = description {
                metadata.insert("description".into(), Value::String(d));
            }
            let info = kb.create_collection(&name, metadata).await?;
            println!("✅ Created collection {}", info.name);
        }
        Command::Delete { id, collection: true } => {
            let removed = kb.delete_collection(&id).await?;
            println!("🗑️  Deleted collection {} ({} documents)", id, removed);
        }
        Command::Delete { id, collection: false } => {
            if kb.delete_document(&id).await? {
                println!("🗑️  Deleted document {}", id);
            } else {
                println!("⚠️  No document {}", id);
            }
        }
        Command::Export { collection, output } => {
            let data = kb.export_documents(collection.as_deref()).await?;
            let json = serde_json::to_string_pretty(&data)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json).await?;
                    println!("✅ Exported {} documents to {}", data.documents.len(), path.display());
                }
                None => println!("{}", json),
            }
        }
        Command::Import { file } => {
            let raw = tokio::fs::read_to_string(&file).await?;
            let payload: Value = serde_json::from_str(&raw).with_context(|| format!("{} is not JSON", file.display()))?;
            let total = payload.get("documents").and_then(Value::as_array).map_or(0, Vec::len);
            let pb = bar(total as u64)?;
            let mut events = kb.subscribe();
            let progress = pb.clone();
            let listener = tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(KbEvent::ImportProgress { done, total }) => {
                            progress.set_position(done as u64);
                            if done == total {
                                break;
                            }
                        }
                        Ok(_) | Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    }
                }
            });
            let imported = kb.import_documents(&payload).await;
            listener.abort();
            pb.finish_and_clear();
            println!("✅ Imported {} of {} documents", imported?.len(), total);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    tracing::debug!(data_dir = %settings.storage.data_dir().display(), "using data directory");
    let kb = KnowledgeBase::from_config(settings).await?;
    kb.open().await?;
    let outcome = run(cli, &kb).await;
    kb.close().await?;
    outcome
}
