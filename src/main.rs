//! # Lectern CLI (`lectern`)
//!
//! The `lectern` binary is the primary interface for Lectern. It provides
//! commands for database initialization, document ingestion, one-shot
//! queries, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! lectern --config ./config/lectern.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lectern init` | Create the SQLite database and tables |
//! | `lectern ingest [dir]` | Index course documents from a folder |
//! | `lectern query "<question>"` | Ask a question from the command line |
//! | `lectern courses` | List indexed courses |
//! | `lectern serve` | Start the JSON HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! lectern init --config ./config/lectern.toml
//!
//! # Index a folder of course documents
//! lectern ingest ./docs --config ./config/lectern.toml
//!
//! # Re-index from scratch
//! lectern ingest ./docs --clear --config ./config/lectern.toml
//!
//! # Ask a one-shot question (requires ANTHROPIC_API_KEY)
//! lectern query "What does lesson 1 of the MCP course cover?"
//!
//! # Start the HTTP server
//! lectern serve --config ./config/lectern.toml
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use lectern::config::{self, Config};
use lectern::db;
use lectern::embedding::create_embedder;
use lectern::rag::{self, RagSystem};
use lectern::server;
use lectern::store::VectorStore;

/// Lectern CLI — retrieval-augmented question answering over course
/// materials.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lectern.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lectern",
    about = "Lectern — retrieval-augmented question answering over course materials",
    version,
    long_about = "Lectern ingests course documents (structured text, PDF, DOCX), indexes them \
    into a SQLite-backed vector store, and answers questions by letting an LLM drive a semantic \
    search tool over the indexed content."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lectern.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and both collections (courses,
    /// chunks). Idempotent — running it multiple times is safe.
    Init,

    /// Index course documents from a folder.
    ///
    /// Reads every `.txt`, `.pdf`, and `.docx` file in the folder
    /// (non-recursive), parses the course structure, chunks and embeds the
    /// content, and stores everything in SQLite. Courses that are already
    /// indexed are skipped.
    Ingest {
        /// Folder of course documents. Defaults to `[ingestion].docs_dir`
        /// from the config.
        dir: Option<PathBuf>,

        /// Drop all indexed data first and rebuild from scratch.
        #[arg(long)]
        clear: bool,
    },

    /// Ask a one-shot question from the command line.
    ///
    /// Runs the full retrieval loop and prints the answer with its sources.
    /// Requires `ANTHROPIC_API_KEY`.
    Query {
        /// The question to answer.
        question: String,

        /// Continue an existing session instead of starting a new one.
        #[arg(long)]
        session: Option<String>,
    },

    /// List indexed courses.
    Courses,

    /// Start the JSON HTTP API.
    ///
    /// Binds to `[server].bind`. If `[ingestion].docs_dir` is set, that
    /// folder is indexed on startup before the server accepts requests.
    /// Requires `ANTHROPIC_API_KEY`.
    Serve,
}

/// Open the vector store without constructing the generation side, for
/// commands that never call the model.
async fn open_store(config: &Config) -> Result<VectorStore> {
    let pool = db::connect(&config.db.path).await?;
    let embedder = create_embedder(&config.embedding)?;
    VectorStore::open(
        pool,
        embedder,
        config.retrieval.max_results,
        config.retrieval.min_confidence,
    )
    .await
}

fn print_report(report: &rag::IngestReport) {
    println!(
        "Indexed {} courses ({} chunks); {} already present, {} failed.",
        report.courses_added, report.chunks_added, report.skipped, report.failed
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            open_store(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { dir, clear } => {
            let dir = dir
                .or_else(|| cfg.ingestion.docs_dir.clone())
                .ok_or_else(|| {
                    anyhow::anyhow!("No folder given and [ingestion].docs_dir is not set")
                })?;
            let store = open_store(&cfg).await?;
            let report = rag::ingest_folder(
                &store,
                &dir,
                cfg.chunking.chunk_size,
                cfg.chunking.chunk_overlap,
                clear,
            )
            .await?;
            print_report(&report);
        }
        Commands::Query { question, session } => {
            let rag = RagSystem::from_config(&cfg).await?;
            let outcome = rag.query(&question, session.as_deref()).await?;
            println!("{}", outcome.answer);
            if !outcome.sources.is_empty() {
                println!("\nSources:");
                for source in &outcome.sources {
                    match &source.link {
                        Some(link) => println!("  {} — {}", source.label, link),
                        None => println!("  {}", source.label),
                    }
                }
            }
        }
        Commands::Courses => {
            let store = open_store(&cfg).await?;
            let analytics = rag::analytics(&store).await?;
            println!("{} courses indexed:", analytics.total_courses);
            for title in &analytics.course_titles {
                println!("  {}", title);
            }
        }
        Commands::Serve => {
            let rag = Arc::new(RagSystem::from_config(&cfg).await?);
            if let Some(docs_dir) = &cfg.ingestion.docs_dir {
                if docs_dir.is_dir() {
                    let report = rag.ingest_folder(docs_dir, false).await?;
                    print_report(&report);
                }
            }
            server::run_server(rag, &cfg.server.bind).await?;
        }
    }

    Ok(())
}
