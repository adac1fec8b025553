//! In-memory [`VectorCollection`] for tests and embedded use.
//!
//! Records and their vectors live in a `Vec` behind `std::sync::RwLock`.
//! Search is brute-force cosine similarity. Embedding happens before the
//! lock is taken, so no guard is held across an await point.

use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::{cosine_similarity, Embedder};
use crate::models::{Record, RetrievalCandidate};

use super::VectorCollection;

struct StoredRecord {
    record: Record,
    vector: Vec<f32>,
}

/// A named collection held entirely in memory.
pub struct InMemoryCollection {
    name: String,
    embedder: Arc<dyn Embedder>,
    records: RwLock<Vec<StoredRecord>>,
}

impl InMemoryCollection {
    pub fn new(name: impl Into<String>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            name: name.into(),
            embedder,
            records: RwLock::new(Vec::new()),
        }
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory collection lock poisoned")
}

#[async_trait]
impl VectorCollection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != records.len() {
            return Err(anyhow!(
                "embedder returned {} vectors for {} records",
                vectors.len(),
                records.len()
            ));
        }

        let mut stored = self.records.write().map_err(poisoned)?;
        for (record, vector) in records.iter().zip(vectors) {
            stored.retain(|s| s.record.id != record.id);
            stored.push(StoredRecord {
                record: record.clone(),
                vector,
            });
        }
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

        let stored = self.records.read().map_err(poisoned)?;
        let mut scored: Vec<RetrievalCandidate> = stored
            .iter()
            .map(|s| RetrievalCandidate {
                record: s.record.clone(),
                score: cosine_similarity(&query_vec, &s.vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete_source(&self, source: &str) -> Result<usize> {
        let mut stored = self.records.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|s| s.record.metadata.source != source);
        Ok(before - stored.len())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().map_err(poisoned)?.clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().map_err(poisoned)?.len())
    }
}
