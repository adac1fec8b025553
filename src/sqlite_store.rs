//! SQLite-backed [`VectorCollection`] and [`RankedRetriever`].
//!
//! Every collection shares the `records` table, partitioned by the
//! `collection` column. Vectors are stored as little-endian f32 BLOBs and
//! searched by brute-force cosine similarity, which is plenty for a
//! single-user knowledge base of a few thousand passages.
//!
//! Record text is mirrored into the `records_fts` FTS5 table in the same
//! transaction as every write, and keyword search ranks matches by BM25.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use fortune_rag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use fortune_rag_core::error::RetrievalError;
use fortune_rag_core::lexical::RankedRetriever;
use fortune_rag_core::models::{Record, RecordMetadata, RetrievalCandidate};
use fortune_rag_core::store::{DualIndex, VectorCollection};

use crate::config::StorageConfig;

/// How [`SqliteCollection::open`] treats the collection row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// The collection must already exist (query path).
    Existing,
    /// Create the collection if missing (init, ingest).
    Create,
    /// Create if missing and adopt the current embedding model, even if the
    /// collection was built with another one. Callers clear it afterwards.
    Rebuild,
}

/// One named collection in the SQLite database.
pub struct SqliteCollection {
    pool: SqlitePool,
    name: String,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl SqliteCollection {
    pub async fn open(
        pool: SqlitePool,
        name: &str,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        mode: OpenMode,
    ) -> Result<Self> {
        let row = sqlx::query("SELECT model, dims FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&pool)
            .await?;

        let model = embedder.model_name().to_string();
        let dims = embedder.dims() as i64;

        match (row, mode) {
            (None, OpenMode::Existing) => {
                return Err(RetrievalError::MissingCollection(name.to_string()).into());
            }
            (None, _) => {
                sqlx::query(
                    "INSERT INTO collections (name, model, dims, created_at) VALUES (?, ?, ?, ?)",
                )
                .bind(name)
                .bind(&model)
                .bind(dims)
                .bind(chrono::Utc::now().timestamp())
                .execute(&pool)
                .await?;
            }
            (Some(_), OpenMode::Rebuild) => {
                sqlx::query("UPDATE collections SET model = ?, dims = ? WHERE name = ?")
                    .bind(&model)
                    .bind(dims)
                    .bind(name)
                    .execute(&pool)
                    .await?;
            }
            (Some(row), _) => {
                let stored_model: String = row.get("model");
                let stored_dims: i64 = row.get("dims");
                if stored_model != model || stored_dims != dims {
                    bail!(
                        "Collection '{}' was built with {} ({} dims) but the configured embedder is {} ({} dims); run `fortune ingest --rebuild`",
                        name,
                        stored_model,
                        stored_dims,
                        model,
                        dims
                    );
                }
            }
        }

        Ok(Self {
            pool,
            name: name.to_string(),
            embedder,
            batch_size: batch_size.max(1),
        })
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Record {
    let child_idx: Option<i64> = row.get("child_idx");
    Record {
        id: row.get("id"),
        text: row.get("text"),
        metadata: RecordMetadata {
            source: row.get("source"),
            parent_id: row.get("parent_id"),
            child_idx: child_idx.map(|i| i as u32),
        },
    }
}

#[async_trait]
impl VectorCollection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(records.len());
        for batch in records.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
            let embedded = self.embedder.embed_batch(&texts).await?;
            if embedded.len() != batch.len() {
                bail!(
                    "{} returned {} vectors for {} texts",
                    self.embedder.model_name(),
                    embedded.len(),
                    batch.len()
                );
            }
            vectors.extend(embedded);
        }

        let mut tx = self.pool.begin().await?;
        for (record, vector) in records.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO records (collection, id, source, parent_id, child_idx, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    source = excluded.source,
                    parent_id = excluded.parent_id,
                    child_idx = excluded.child_idx,
                    text = excluded.text,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&self.name)
            .bind(&record.id)
            .bind(&record.metadata.source)
            .bind(&record.metadata.parent_id)
            .bind(record.metadata.child_idx.map(|i| i as i64))
            .bind(&record.text)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM records_fts WHERE collection = ? AND id = ?")
                .bind(&self.name)
                .bind(&record.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO records_fts (collection, id, source, text) VALUES (?, ?, ?, ?)",
            )
            .bind(&self.name)
            .bind(&record.id)
            .bind(&record.metadata.source)
            .bind(&record.text)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(records.len())
    }

    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(query).await?;

        let rows = sqlx::query(
            r#"
            SELECT id, source, parent_id, child_idx, text, embedding
            FROM records
            WHERE collection = ?
            "#,
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<RetrievalCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                RetrievalCandidate {
                    record: row_to_record(row),
                    score: cosine_similarity(&query_vec, &blob_to_vec(&blob)),
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        candidates.truncate(k);

        Ok(candidates)
    }

    async fn delete_source(&self, source: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM records WHERE collection = ? AND source = ?")
            .bind(&self.name)
            .bind(source)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM records_fts WHERE collection = ? AND source = ?")
            .bind(&self.name)
            .bind(source)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(&self.name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM records_fts WHERE collection = ?")
            .bind(&self.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[async_trait]
impl RankedRetriever for SqliteCollection {
    /// Keyword search over this collection, best BM25 rank first.
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Record>> {
        let Some(expr) = fts_query(query) else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT r.id, r.source, r.parent_id, r.child_idx, r.text
            FROM records_fts
            JOIN records r ON r.collection = records_fts.collection AND r.id = records_fts.id
            WHERE records_fts MATCH ? AND records_fts.collection = ?
            ORDER BY records_fts.rank, r.id
            LIMIT ?
            "#,
        )
        .bind(&expr)
        .bind(&self.name)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_record).collect())
    }
}

/// FTS5 query for free text: every trigram of every alphanumeric run, as
/// quoted phrases joined by `OR`. Runs shorter than three characters cannot
/// be matched by the trigram tokenizer and are dropped. `None` when nothing
/// is left.
fn fts_query(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for run in text.split(|c: char| !c.is_alphanumeric()) {
        let chars: Vec<char> = run.chars().collect();
        for window in chars.windows(3) {
            let term = format!("\"{}\"", window.iter().collect::<String>());
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
    }
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// The summary and passage collections named in `[storage]`.
pub struct SqliteIndex {
    pub summary: Arc<SqliteCollection>,
    pub passage: Arc<SqliteCollection>,
}

impl SqliteIndex {
    pub async fn open(
        pool: &SqlitePool,
        storage: &StorageConfig,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        mode: OpenMode,
    ) -> Result<Self> {
        let summary = SqliteCollection::open(
            pool.clone(),
            &storage.summary_collection,
            Arc::clone(&embedder),
            batch_size,
            mode,
        )
        .await?;
        let passage = SqliteCollection::open(
            pool.clone(),
            &storage.passage_collection,
            embedder,
            batch_size,
            mode,
        )
        .await?;
        Ok(Self {
            summary: Arc::new(summary),
            passage: Arc::new(passage),
        })
    }

    pub fn dual(&self) -> DualIndex {
        DualIndex::new(self.summary.clone(), self.passage.clone())
    }
}
