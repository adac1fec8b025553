//! Storage abstraction for the dual index.
//!
//! A [`VectorCollection`] is one named, embedded set of [`Record`]s. The
//! retrieval pipeline reads two of them through a [`DualIndex`]: the
//! *summary* collection (one digest per parent chunk) and the *passage*
//! collection (every child chunk).
//!
//! Implementations must be `Send + Sync` to work with async runtimes. The
//! SQLite-backed collection lives in the app crate; [`memory`] provides an
//! in-memory one for tests.

pub mod memory;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Record, RetrievalCandidate};

/// Default name of the summary collection.
pub const DEFAULT_SUMMARY_COLLECTION: &str = "fortune_summary";
/// Default name of the passage collection.
pub const DEFAULT_PASSAGE_COLLECTION: &str = "fortune";

/// A named collection of embedded records.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorCollection::upsert) | Insert or replace records by id |
/// | [`similarity_search_with_score`](VectorCollection::similarity_search_with_score) | Top-k records with scores |
/// | [`similarity_search`](VectorCollection::similarity_search) | Top-k records |
/// | [`delete_source`](VectorCollection::delete_source) | Remove every record of one document |
/// | [`clear`](VectorCollection::clear) | Remove every record |
/// | [`count`](VectorCollection::count) | Number of stored records |
#[async_trait]
pub trait VectorCollection: Send + Sync {
    /// Collection name within the storage root.
    fn name(&self) -> &str;

    /// Embed and store records, replacing any record with the same id.
    ///
    /// Returns the number of records written.
    async fn upsert(&self, records: &[Record]) -> Result<usize>;

    /// Return up to `k` records ordered by decreasing relevance to `query`.
    /// Higher scores are more relevant.
    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalCandidate>>;

    /// Like [`similarity_search_with_score`](Self::similarity_search_with_score)
    /// without the scores.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Record>> {
        Ok(self
            .similarity_search_with_score(query, k)
            .await?
            .into_iter()
            .map(|c| c.record)
            .collect())
    }

    /// Delete every record whose metadata `source` equals `source`.
    ///
    /// Returns the number of records removed.
    async fn delete_source(&self, source: &str) -> Result<usize>;

    /// Delete every record.
    async fn clear(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}

/// The summary and passage collections, opened together.
#[derive(Clone)]
pub struct DualIndex {
    pub summary: Arc<dyn VectorCollection>,
    pub passage: Arc<dyn VectorCollection>,
}

impl DualIndex {
    pub fn new(summary: Arc<dyn VectorCollection>, passage: Arc<dyn VectorCollection>) -> Self {
        Self { summary, passage }
    }

    /// Remove one document from both collections.
    pub async fn delete_source(&self, source: &str) -> Result<usize> {
        let removed = self.summary.delete_source(source).await?;
        Ok(removed + self.passage.delete_source(source).await?)
    }

    pub async fn clear(&self) -> Result<()> {
        self.summary.clear().await?;
        self.passage.clear().await
    }
}

impl std::fmt::Debug for DualIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualIndex")
            .field("summary", &self.summary.name())
            .field("passage", &self.passage.name())
            .finish()
    }
}
