//! # Handbook RAG CLI (`hbk`)
//!
//! Index a handbook once, then pull only the relevant sections into a
//! prompt.
//!
//! ## Usage
//!
//! ```bash
//! hbk --config ./config/hbk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hbk index <file>` | Chunk, embed, and persist a document |
//! | `hbk query <id> "<query>"` | Show the most relevant chunks |
//! | `hbk context <id> "<query>"` | Print retrieved chunks as one prompt block |
//! | `hbk savings <file> "<query>"` | Compare full-document and retrieved token counts |
//! | `hbk status <id>` | Show persisted index metadata |
//! | `hbk clear <id>` | Delete the persisted index |
//!
//! Logs go to stderr and honour `RUST_LOG` (default `info`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use handbook_rag::async_adapter::AsyncRetriever;
use handbook_rag::config::{self, Config};
use handbook_rag::progress::ProgressMode;
use handbook_rag::retriever::{join_context, IndexOutcome, IndexReport};
use handbook_rag::tokens::TokenSavings;

const DEFAULT_CONFIG: &str = "./config/hbk.toml";

/// Handbook RAG: local chunking, indexing, and retrieval for handbooks.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the default file does not exist, built-in defaults are used
/// (keyword-only search, cache in `./vector_cache`).
#[derive(Parser)]
#[command(
    name = "hbk",
    about = "Handbook RAG: index a handbook once, retrieve only what a prompt needs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Indexing progress on stderr: `off`, `human`, or `json`.
    /// Defaults to `human` on a terminal and `off` otherwise.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a Markdown or plain-text document.
    ///
    /// Reuses the persisted index when the content and chunking parameters
    /// are unchanged.
    Index {
        file: PathBuf,

        /// Textbook id. Defaults to the file stem, lowercased, spaces as `_`.
        #[arg(long)]
        id: Option<String>,

        /// Rebuild even if an up-to-date index exists.
        #[arg(long)]
        force: bool,
    },

    /// Show the chunks most relevant to a query.
    Query {
        id: String,
        query: String,

        #[arg(long)]
        top_k: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print retrieved chunks joined by blank lines, ready for a prompt.
    Context {
        id: String,
        query: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Index a file and compare its token count with the retrieved context.
    Savings {
        file: PathBuf,
        query: String,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Show persisted metadata for a textbook.
    Status { id: String },

    /// Delete the persisted index for a textbook.
    Clear { id: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        tracing::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    config::load_config(path)
}

/// `My Handbook.md` → `my_handbook`.
fn default_textbook_id(file: &Path) -> String {
    file.file_stem()
        .map(|s| s.to_string_lossy().to_lowercase().replace(' ', "_"))
        .unwrap_or_else(|| "textbook".to_string())
}

fn read_document(file: &Path) -> Result<String> {
    std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read document: {}", file.display()))
}

fn print_index_report(report: &IndexReport) {
    let how = match report.outcome {
        IndexOutcome::Loaded => "reused existing index",
        IndexOutcome::Built => "built new index",
    };
    println!(
        "{}: {} ({} chunks, {} vectors)",
        report.textbook_id, how, report.chunk_count, report.vector_count
    );
    if !report.failed_batches.is_empty() {
        println!(
            "warning: {} embedding batch(es) failed; those chunks are keyword-only",
            report.failed_batches.len()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let progress = match cli.progress.as_deref() {
        Some(mode) => ProgressMode::parse(mode)?,
        None => ProgressMode::default_for_tty(),
    }
    .reporter();

    let cfg = load_config(&cli.config)?;
    let default_top_k = cfg.retrieval.top_k;
    let retriever = AsyncRetriever::open(cfg).await?;

    match cli.command {
        Commands::Index { file, id, force } => {
            let content = read_document(&file)?;
            let id = id.unwrap_or_else(|| default_textbook_id(&file));
            let report = retriever.index(content, id, force, progress).await?;
            print_index_report(&report);
        }
        Commands::Query {
            id,
            query,
            top_k,
            json,
        } => {
            let results = retriever
                .query(id, query, top_k.unwrap_or(default_top_k))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for (rank, r) in results.iter().enumerate() {
                    let mut path = r.metadata.context.clone();
                    path.push(r.metadata.heading.clone());
                    println!("{}. [{:.3}] {}", rank + 1, r.score, path.join(" > "));
                    println!("{}", r.content);
                    println!();
                }
            }
        }
        Commands::Context { id, query, top_k } => {
            let results = retriever
                .query(id, query, top_k.unwrap_or(default_top_k))
                .await?;
            println!("{}", join_context(&results));
        }
        Commands::Savings {
            file,
            query,
            top_k,
            json,
        } => {
            let content = read_document(&file)?;
            let id = default_textbook_id(&file);
            retriever
                .index(content.clone(), id.clone(), false, progress)
                .await?;
            let results = retriever
                .query(id, query, top_k.unwrap_or(default_top_k))
                .await?;
            let savings = TokenSavings::compare(&content, &join_context(&results));
            if json {
                println!("{}", serde_json::to_string_pretty(&savings)?);
            } else {
                println!("{}", savings.render());
            }
        }
        Commands::Status { id } => {
            let status = retriever.status(id).await?;
            match &status.meta {
                Some(meta) => {
                    println!("textbook:   {}", status.textbook_id);
                    println!("created:    {}", meta.created_at.to_rfc3339());
                    println!("chunks:     {}", meta.chunk_count);
                    println!("vectors:    {}", meta.vector_count);
                    println!(
                        "model:      {}",
                        meta.embedding_model.as_deref().unwrap_or("(keyword only)")
                    );
                    println!("chunk size: {} (overlap {})", meta.chunk_size, meta.chunk_overlap);
                    println!("hash:       {}", meta.content_hash);
                }
                None => println!("No index for '{}'.", status.textbook_id),
            }
        }
        Commands::Clear { id } => {
            if retriever.clear(id.clone()).await? {
                println!("Cleared index for '{}'.", id);
            } else {
                println!("No index for '{}'.", id);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_textbook_id() {
        assert_eq!(
            default_textbook_id(Path::new("docs/Student Handbook.md")),
            "student_handbook"
        );
        assert_eq!(default_textbook_id(Path::new("notes.txt")), "notes");
    }
}
