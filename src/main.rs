//! # fortune CLI
//!
//! ```bash
//! fortune --config ./config/fortune.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fortune init` | Create the SQLite database and both collections |
//! | `fortune ingest [--rebuild]` | Index every document under `ingest.root` |
//! | `fortune query "<question>" [--json]` | Print the cited context for a question |
//!
//! Logs go to stderr and are filtered by `RUST_LOG`.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fortune_rag::config;
use fortune_rag::db;
use fortune_rag::embedding::create_embedder;
use fortune_rag::engine::RagContext;
use fortune_rag::ingest;
use fortune_rag::migrate;
use fortune_rag::sqlite_store::{OpenMode, SqliteIndex};

const DEFAULT_LOG_FILTER: &str = "warn,fortune_rag=info,fortune_rag_core=warn";

/// Hierarchical retrieval over a local fortune-telling library.
#[derive(Parser)]
#[command(
    name = "fortune",
    about = "Hierarchical RAG retrieval over a local fortune-telling library",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/fortune.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and both collections.
    ///
    /// Idempotent; running it again is safe.
    Init,

    /// Ingest every matching file under `ingest.root`.
    ///
    /// Unchanged documents are skipped; changed documents replace their
    /// previous records.
    Ingest {
        /// Clear both collections and re-embed everything, adopting the
        /// currently configured embedding model.
        #[arg(long)]
        rebuild: bool,
    },

    /// Retrieve the compressed, cited context for a question.
    Query {
        question: String,

        /// Print the full outcome (context and trace) as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&cfg).await?,
        Commands::Ingest { rebuild } => {
            ingest::run_ingest(&cfg, rebuild).await?;
        }
        Commands::Query { question, json } => run_query(&cfg, &question, json).await?,
    }

    Ok(())
}

async fn run_init(cfg: &config::Config) -> Result<()> {
    if !cfg.embedding.is_enabled() {
        bail!("Embedding provider is disabled; set [embedding] provider in the config before init");
    }
    let embedder = create_embedder(&cfg.embedding)?;
    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;
    SqliteIndex::open(
        &pool,
        &cfg.storage,
        embedder,
        cfg.embedding.batch_size,
        OpenMode::Create,
    )
    .await?;
    pool.close().await;

    println!("Database initialized successfully.");
    println!("  path: {}", cfg.storage.db_path().display());
    println!("  summary collection: {}", cfg.storage.summary_collection);
    println!("  passage collection: {}", cfg.storage.passage_collection);
    Ok(())
}

async fn run_query(cfg: &config::Config, question: &str, json: bool) -> Result<()> {
    let ctx = RagContext::open(cfg).await?;
    let outcome = ctx.retrieve(question).await?;
    ctx.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    if outcome.context.is_empty() {
        println!("No relevant passages found.");
        return Ok(());
    }

    println!("{}", outcome.context.text);
    println!();
    println!("Citations:");
    for citation in outcome.context.citations() {
        println!("  {}", citation);
    }
    for degradation in &outcome.trace.degradations {
        eprintln!("note: {} degraded: {}", degradation.stage, degradation.reason);
    }
    Ok(())
}
