//! Lexical (keyword) signal over the passage collection.
//!
//! The core crate only defines the seam. The application backs it with a
//! full-text index next to the vector store, so lexical hits come from the
//! same records the dense stage searches.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Record;

/// A retriever that returns records in rank order for a query.
#[async_trait]
pub trait RankedRetriever: Send + Sync {
    /// Up to `k` records, most relevant first.
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Record>>;
}
