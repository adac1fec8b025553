//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow: scan → extract → chunk → embed → store.
//! Re-running is duplicate-safe: the `documents` ledger remembers a SHA-256
//! of every ingested text and the chunking settings it was split with.
//! Unchanged documents are skipped and changed ones have their old records
//! removed from both collections first. Ledger sources that are no longer
//! on disk, or no longer have text, are pruned at the end of a run.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::{info, warn};

use fortune_rag_core::chunk::{chunk_document, ChunkingParams};
use fortune_rag_core::embedding::Embedder;
use fortune_rag_core::models::{RawDocument, Record};
use fortune_rag_core::store::DualIndex;

use crate::config::Config;
use crate::connector_fs::{read_document, scan_filesystem};
use crate::db;
use crate::embedding::create_embedder;
use crate::migrate;
use crate::sqlite_store::{OpenMode, SqliteIndex};

/// Counters reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub files_found: usize,
    pub files_ingested: usize,
    pub files_unchanged: usize,
    /// Files without extractable text.
    pub files_skipped: usize,
    /// Previously ingested sources that are gone or now empty.
    pub files_removed: usize,
    pub summaries_written: usize,
    pub passages_written: usize,
}

/// Outcome for a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Ingested { summaries: usize, passages: usize },
    Unchanged,
}

pub async fn run_ingest(config: &Config, rebuild: bool) -> Result<IngestStats> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled; set [embedding] provider in the config to ingest");
    }

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let embedder = create_embedder(&config.embedding)?;
    let stats = ingest_all(&pool, config, embedder, rebuild).await?;

    println!("ingest {}", config.ingest.root.display());
    println!("  files found: {}", stats.files_found);
    println!("  files ingested: {}", stats.files_ingested);
    println!("  files unchanged: {}", stats.files_unchanged);
    println!("  files skipped: {}", stats.files_skipped);
    println!("  files removed: {}", stats.files_removed);
    println!("  summary entries: {}", stats.summaries_written);
    println!("  passage entries: {}", stats.passages_written);
    println!("ok");

    pool.close().await;
    Ok(stats)
}

/// Ingest every file under `ingest.root` into the configured collections.
pub async fn ingest_all(
    pool: &SqlitePool,
    config: &Config,
    embedder: Arc<dyn Embedder>,
    rebuild: bool,
) -> Result<IngestStats> {
    let mode = if rebuild {
        OpenMode::Rebuild
    } else {
        OpenMode::Create
    };
    let index = SqliteIndex::open(
        pool,
        &config.storage,
        embedder,
        config.embedding.batch_size,
        mode,
    )
    .await?
    .dual();

    if rebuild {
        index.clear().await?;
        sqlx::query("DELETE FROM documents").execute(pool).await?;
        info!("cleared both collections for rebuild");
    }

    let files = scan_filesystem(&config.ingest)?;
    let params = config.chunking.params();
    let mut stats = IngestStats {
        files_found: files.len(),
        ..IngestStats::default()
    };

    let mut present: HashSet<String> = HashSet::new();
    for file in &files {
        let Some(doc) = read_document(file)? else {
            stats.files_skipped += 1;
            continue;
        };

        let status = ingest_document(pool, &index, &doc, &params)
            .await
            .with_context(|| format!("Failed to ingest {}", doc.source))?;
        present.insert(doc.source.clone());
        match status {
            DocumentStatus::Ingested {
                summaries,
                passages,
            } => {
                stats.files_ingested += 1;
                stats.summaries_written += summaries;
                stats.passages_written += passages;
            }
            DocumentStatus::Unchanged => stats.files_unchanged += 1,
        }
    }

    let ledger: Vec<String> = sqlx::query_scalar("SELECT source FROM documents ORDER BY source")
        .fetch_all(pool)
        .await?;
    for source in ledger.iter().filter(|s| !present.contains(*s)) {
        remove_document(pool, &index, source)
            .await
            .with_context(|| format!("Failed to remove {}", source))?;
        stats.files_removed += 1;
    }

    info!(
        found = stats.files_found,
        ingested = stats.files_ingested,
        unchanged = stats.files_unchanged,
        skipped = stats.files_skipped,
        removed = stats.files_removed,
        summaries = stats.summaries_written,
        passages = stats.passages_written,
        "ingestion finished"
    );
    Ok(stats)
}

/// Chunk one document and replace its records in both collections.
pub async fn ingest_document(
    pool: &SqlitePool,
    index: &DualIndex,
    doc: &RawDocument,
    params: &ChunkingParams,
) -> Result<DocumentStatus> {
    let hash = content_hash(&doc.text, params);

    let existing: Option<String> =
        sqlx::query_scalar("SELECT content_hash FROM documents WHERE source = ?")
            .bind(&doc.source)
            .fetch_optional(pool)
            .await?;
    if existing.as_deref() == Some(hash.as_str()) {
        return Ok(DocumentStatus::Unchanged);
    }

    let chunks = chunk_document(doc, params);
    if chunks.is_empty() {
        warn!(stage = "chunk", source = %doc.source, "document produced no chunks");
    }

    let removed = index.delete_source(&doc.source).await?;
    if removed > 0 {
        info!(source = %doc.source, removed, "replacing changed document");
    }

    let summaries: Vec<Record> = chunks.summaries.iter().map(|s| s.to_record()).collect();
    let passages: Vec<Record> = chunks.children.iter().map(|c| c.to_record()).collect();
    let summaries_written = index.summary.upsert(&summaries).await?;
    let passages_written = index.passage.upsert(&passages).await?;

    sqlx::query(
        r#"
        INSERT INTO documents (source, content_hash, parents, children, ingested_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET
            content_hash = excluded.content_hash,
            parents = excluded.parents,
            children = excluded.children,
            ingested_at = excluded.ingested_at
        "#,
    )
    .bind(&doc.source)
    .bind(&hash)
    .bind(chunks.parents.len() as i64)
    .bind(passages_written as i64)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;

    Ok(DocumentStatus::Ingested {
        summaries: summaries_written,
        passages: passages_written,
    })
}

/// Drop a source's records from both collections and forget it.
pub async fn remove_document(pool: &SqlitePool, index: &DualIndex, source: &str) -> Result<()> {
    let removed = index.delete_source(source).await?;
    sqlx::query("DELETE FROM documents WHERE source = ?")
        .bind(source)
        .execute(pool)
        .await?;
    info!(source, removed, "removed document no longer in the library");
    Ok(())
}

/// SHA-256 over the text and the chunking settings, so a config change
/// re-chunks documents whose text did not change.
fn content_hash(text: &str, params: &ChunkingParams) -> String {
    let mut hasher = Sha256::new();
    for n in [
        params.parent.size,
        params.parent.overlap,
        params.child.size,
        params.child.overlap,
        params.summary_chars,
    ] {
        hasher.update((n as u64).to_le_bytes());
    }
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
