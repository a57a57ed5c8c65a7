//! # docqa CLI
//!
//! The `docqa` binary drives the question-answering pipeline: index a
//! document directory, add files, ask questions, inspect the index, and
//! run the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init [--force]` | Build the index from `[documents].dir`, or load the persisted one |
//! | `docqa ingest <files>...` | Add files to the existing index |
//! | `docqa ask "<question>"` | Answer a question with citations |
//! | `docqa documents` | List indexed documents |
//! | `docqa remove <source>` | Drop one document from the index |
//! | `docqa health` | Print the pipeline health report |
//! | `docqa serve` | Start the HTTP API on `[server].bind` |
//!
//! Environment variables are read from a `.env` file when present, which
//! is the usual place for `GROQ_API_KEY` / `OPENAI_API_KEY`. Logs go to
//! stderr and are filtered with `RUST_LOG` (default `info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use docqa::config::{load_config, Config};
use docqa::pipeline::{AskRequest, IngestStatus, Pipeline, UploadedFile};
use docqa::server;
use docqa_core::models::Answer;

const DEFAULT_CONFIG: &str = "./config/docqa.toml";

/// docqa: grounded question answering over your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML file. Without
/// it, `./config/docqa.toml` is used when present and built-in defaults
/// otherwise. See `config/docqa.example.toml`.
#[derive(Parser)]
#[command(name = "docqa", version, about = "Grounded question answering over your own documents")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or load the vector index.
    ///
    /// Loads the persisted index when it exists and matches the configured
    /// embedding model; otherwise scans `[documents].dir` and builds it.
    Init {
        /// Ignore any persisted index and rebuild from the documents.
        #[arg(long)]
        force: bool,
    },

    /// Add PDF or text files to the index.
    ///
    /// Files whose name is already indexed are skipped. Each file is also
    /// copied into `[documents].dir`.
    Ingest {
        /// Files to add.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Ask a question about the indexed documents.
    Ask {
        question: String,

        /// Overall deadline in seconds (default `[generation].timeout_secs`).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List indexed documents.
    Documents,

    /// Remove a document from the index (the file itself is kept).
    Remove {
        /// Source identity as shown by `docqa documents`.
        source: String,
    },

    /// Print the pipeline health report.
    Health,

    /// Start the HTTP API.
    Serve,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    // Providers hold blocking HTTP clients, which must not be dropped from
    // inside the runtime: keep the last reference out here.
    let pipeline = Arc::new(Pipeline::from_config(cfg)?);
    let result = runtime.block_on(run(cli.command, cli.json, pipeline.clone()));
    drop(runtime);
    drop(pipeline);
    result
}

fn resolve_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => load_config(path),
        None if Path::new(DEFAULT_CONFIG).exists() => load_config(Path::new(DEFAULT_CONFIG)),
        None => {
            tracing::debug!("no config file, using defaults");
            Ok(Config::default())
        }
    }
}

async fn run(command: Commands, json: bool, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    match command {
        Commands::Init { force } => {
            let report = pipeline.initialize(force).await?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "Index {:?}: {} documents, {} chunks.",
                    report.status, report.document_count, report.chunk_count
                );
                for name in &report.skipped {
                    println!("  skipped (unsupported): {}", name);
                }
                for failure in &report.failures {
                    println!("  failed: {} [{}] {}", failure.source, failure.code, failure.message);
                }
                if !report.persisted {
                    println!("Warning: the index could not be saved and will be lost on exit.");
                }
            }
        }
        Commands::Ingest { files } => {
            let uploads = files
                .iter()
                .map(|path| read_upload(path))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let report = pipeline.ingest(uploads).await?;
            if json {
                print_json(&report)?;
            } else {
                println!("{}", report.message);
                for failure in &report.failures {
                    println!("  failed: {} [{}] {}", failure.source, failure.code, failure.message);
                }
            }
            if report.status == IngestStatus::Failed {
                anyhow::bail!("no file could be ingested");
            }
        }
        Commands::Ask { question, timeout } => {
            pipeline.resume().await?;
            let request = AskRequest {
                timeout: timeout.map(Duration::from_secs),
                ..AskRequest::new(question)
            };
            let answer = pipeline.ask(request).await?;
            if json {
                print_json(&answer)?;
            } else {
                print_answer(&answer);
            }
        }
        Commands::Documents => {
            pipeline.resume().await?;
            let documents = pipeline.documents();
            if json {
                print_json(&documents)?;
            } else if documents.is_empty() {
                println!("No documents indexed. Run `docqa init` first.");
            } else {
                for doc in &documents {
                    println!(
                        "{}  {}  {} chunks  {}",
                        doc.source,
                        doc.format.as_str(),
                        doc.chunk_count,
                        doc.ingested_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        Commands::Remove { source } => {
            pipeline.resume().await?;
            let report = pipeline.remove_document(&source).await?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "Removed {} chunks of {}; {} chunks remain.",
                    report.removed_chunks, report.source, report.remaining_chunks
                );
            }
        }
        Commands::Health => {
            if let Err(e) = pipeline.resume().await {
                tracing::warn!(error = %e, "persisted index could not be loaded");
            }
            print_json(&pipeline.health())?;
        }
        Commands::Serve => {
            server::run_server(pipeline).await?;
        }
    }

    Ok(())
}

fn read_upload(path: &Path) -> anyhow::Result<UploadedFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Not a file path: {}", path.display()))?
        .to_string();
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(UploadedFile { name, bytes })
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text.trim());
    if answer.sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (n, citation) in answer.sources.iter().enumerate() {
        match citation.page {
            Some(page) => println!("  [{}] {} (page {})", n + 1, citation.source, page),
            None => println!("  [{}] {}", n + 1, citation.source),
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
