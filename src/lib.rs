pub mod config;
pub mod engine;
pub mod model;
pub mod search;
pub mod storage;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use config::EngineConfig;
use engine::IndexEngine;
use model::types::{Document, SearchHit};
use search::embedder::{Embedder, HashEmbedder, OllamaEmbedder};
use storage::sqlite::DocumentStore;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "docdex",
    version,
    about = "Hybrid retrieval engine for a document management system"
)]
pub struct Cli {
    /// Override data dir (documents db + vector snapshot)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Use the deterministic hash embedder instead of the Ollama endpoint
    #[arg(long, default_value_t = false)]
    pub hash_embedder: bool,

    /// Emit JSON instead of human-readable output
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SearchMode {
    Semantic,
    Keyword,
    Hybrid,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Insert a text file as a document and index it incrementally
    Add {
        /// Path to a UTF-8 text file holding the extracted document text
        file: PathBuf,

        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,

        /// Free-form tags
        #[arg(long)]
        tag: Vec<String>,

        /// Short summary
        #[arg(long, default_value = "")]
        summary: String,
    },
    /// Search the corpus
    Search {
        query: String,

        #[arg(long, value_enum, default_value_t = SearchMode::Hybrid)]
        mode: SearchMode,

        /// Semantic candidate cap
        #[arg(long, default_value_t = 5)]
        semantic_limit: usize,

        /// Keyword candidate cap
        #[arg(long, default_value_t = 10)]
        keyword_limit: usize,
    },
    /// Rebuild the vector index from the document store
    Index,
    /// Delete a document and its index entries (vector slots stay until rebuild)
    Delete { id: i64 },
    /// Show index counters and the needs-rebuild flag
    Status,
    /// Empty the vector index, snapshot, and derived chunks
    Clear,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

    let store = Arc::new(DocumentStore::open(&data_dir.join("documents.db"))?);
    let embedder: Arc<dyn Embedder> = if cli.hash_embedder {
        Arc::new(HashEmbedder::new(config.embedding_dimension_fallback))
    } else {
        Arc::new(OllamaEmbedder::new(
            &config.ollama_url,
            &config.ollama_model,
            Duration::from_secs(config.embed_timeout_secs),
        )?)
    };
    let engine = IndexEngine::open(store.clone(), embedder, config, &data_dir)?;

    match cli.command {
        Commands::Add {
            file,
            name,
            tag,
            summary,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("read {}", file.display()))?;
            let name = name.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "untitled".to_string())
            });
            let mut doc = Document::new(name, text);
            doc.tags = tag;
            doc.summary = summary;
            let id = store.insert_document(&doc)?;
            let report = engine.add_incremental(id)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "id": id, "indexed": report.indexed, "skipped": report.skipped })
                );
            } else {
                println!(
                    "added document {id} ({} indexed, {} skipped)",
                    report.indexed, report.skipped
                );
            }
        }
        Commands::Search {
            query,
            mode,
            semantic_limit,
            keyword_limit,
        } => {
            let hits = match mode {
                SearchMode::Semantic => engine.semantic_search(&query, semantic_limit)?,
                SearchMode::Keyword => engine.keyword_search(&query, keyword_limit)?,
                SearchMode::Hybrid => {
                    engine.hybrid_search(&query, semantic_limit, keyword_limit)?
                }
            };
            print_hits(&hits, cli.json)?;
        }
        Commands::Index => {
            let report = engine.rebuild()?;
            if cli.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "index rebuilt: {} indexed, {} skipped",
                    report.indexed, report.skipped
                );
            }
        }
        Commands::Delete { id } => {
            let report = engine.delete_logical(id)?;
            if cli.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "deleted document {id}: {} index entries removed; {} stale slot(s), run `docdex index` to reclaim",
                    report.removed_entities, report.stale_slots
                );
            }
        }
        Commands::Status => {
            let status = engine.status()?;
            if cli.json {
                println!("{}", serde_json::to_string(&status)?);
            } else {
                println!("documents:       {}", status.documents);
                println!("vectors:         {}", status.vector_count);
                println!("mapped entities: {}", status.mapped_entities);
                println!("stale slots:     {}", status.stale_slots);
                println!("dimension:       {}", status.dimension);
                println!("needs rebuild:   {}", status.needs_rebuild);
            }
        }
        Commands::Clear => {
            engine.clear()?;
            println!("index cleared");
        }
    }
    Ok(())
}

fn print_hits(hits: &[SearchHit], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("no results");
        return Ok(());
    }
    for (rank, hit) in hits.iter().enumerate() {
        let mut line = format!("{:2}. {}", rank + 1, hit.document.name);
        if let Some(score) = hit.score {
            line.push_str(&format!("  score={score:.2}"));
        } else if let Some(distance) = hit.distance {
            line.push_str(&format!("  distance={distance:.4}"));
        }
        println!("{line}");
        if let Some(chunk) = &hit.matched_chunk {
            let preview: String = chunk.chars().take(120).collect();
            println!("      {preview}");
        }
    }
    Ok(())
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "docdex", "docdex")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".docdex"))
}
