//! Schema migrations.
//!
//! All statements are idempotent (`IF NOT EXISTS`, or an existence check
//! for the FTS5 table), so `fortune init` can run any number of times.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Named collections and the embedding model that populated them
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedded records of every collection
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            source TEXT NOT NULL,
            parent_id TEXT NOT NULL,
            child_idx INTEGER,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (collection, id),
            FOREIGN KEY (collection) REFERENCES collections(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ingestion ledger for duplicate-safe re-ingestion
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            source TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            parents INTEGER NOT NULL,
            children INTEGER NOT NULL,
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_source ON records(collection, source)")
        .execute(pool)
        .await?;

    // Full-text index over record text for the lexical signal. The trigram
    // tokenizer matches CJK text, which has no word boundaries.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'records_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE records_fts USING fts5(
                collection UNINDEXED,
                id UNINDEXED,
                source UNINDEXED,
                text,
                tokenize = 'trigram'
            )
            "#,
        )
        .execute(pool)
        .await?;

        // Databases ingested before the index existed
        sqlx::query(
            r#"
            INSERT INTO records_fts (collection, id, source, text)
            SELECT collection, id, source, text FROM records
            "#,
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}
