//! Per-request deadline enforcement.
//!
//! A query gets one [`Instant`] deadline when it starts. Every capability the
//! retrieval engine touches is wrapped so its calls race that deadline; an
//! expired deadline surfaces as an ordinary error, which the engine already
//! treats as a degraded stage.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::{timeout_at, Instant};

use fortune_rag_core::expand::TextGenerator;
use fortune_rag_core::lexical::RankedRetriever;
use fortune_rag_core::models::{Record, RetrievalCandidate};
use fortune_rag_core::rerank::CrossEncoder;
use fortune_rag_core::store::VectorCollection;

async fn within<T>(
    deadline: Instant,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout_at(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("{} exceeded the request deadline", what)),
    }
}

pub struct DeadlineCollection {
    inner: Arc<dyn VectorCollection>,
    deadline: Instant,
}

impl DeadlineCollection {
    pub fn wrap(inner: Arc<dyn VectorCollection>, deadline: Instant) -> Arc<dyn VectorCollection> {
        Arc::new(Self { inner, deadline })
    }
}

#[async_trait]
impl VectorCollection for DeadlineCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn upsert(&self, records: &[Record]) -> Result<usize> {
        within(self.deadline, "upsert", self.inner.upsert(records)).await
    }

    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        within(
            self.deadline,
            "similarity search",
            self.inner.similarity_search_with_score(query, k),
        )
        .await
    }

    async fn delete_source(&self, source: &str) -> Result<usize> {
        within(self.deadline, "delete", self.inner.delete_source(source)).await
    }

    async fn clear(&self) -> Result<()> {
        within(self.deadline, "clear", self.inner.clear()).await
    }

    async fn count(&self) -> Result<usize> {
        within(self.deadline, "count", self.inner.count()).await
    }
}

pub struct DeadlineRetriever {
    inner: Arc<dyn RankedRetriever>,
    deadline: Instant,
}

impl DeadlineRetriever {
    pub fn wrap(inner: Arc<dyn RankedRetriever>, deadline: Instant) -> Arc<dyn RankedRetriever> {
        Arc::new(Self { inner, deadline })
    }
}

#[async_trait]
impl RankedRetriever for DeadlineRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Record>> {
        within(self.deadline, "lexical search", self.inner.retrieve(query, k)).await
    }
}

pub struct DeadlineCrossEncoder {
    inner: Arc<dyn CrossEncoder>,
    deadline: Instant,
}

impl DeadlineCrossEncoder {
    pub fn wrap(inner: Arc<dyn CrossEncoder>, deadline: Instant) -> Arc<dyn CrossEncoder> {
        Arc::new(Self { inner, deadline })
    }
}

#[async_trait]
impl CrossEncoder for DeadlineCrossEncoder {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        within(self.deadline, "rerank", self.inner.score(query, texts)).await
    }
}

pub struct DeadlineGenerator {
    inner: Arc<dyn TextGenerator>,
    deadline: Instant,
}

impl DeadlineGenerator {
    pub fn wrap(inner: Arc<dyn TextGenerator>, deadline: Instant) -> Arc<dyn TextGenerator> {
        Arc::new(Self { inner, deadline })
    }
}

#[async_trait]
impl TextGenerator for DeadlineGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        within(self.deadline, "generation", self.inner.generate(prompt)).await
    }
}
