//! Query-time context.
//!
//! [`RagContext`] is built once per process from a [`Config`]: it opens the
//! database and both collections, and constructs the optional reranker and
//! generator. The lexical signal is the passage collection's own full-text
//! index. Each call to
//! [`RagContext::retrieve`] assembles a short-lived [`RetrievalEngine`] whose
//! capabilities all share one request deadline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use tokio::time::Instant;
use tracing::debug;

use fortune_rag_core::expand::{LlmQueryExpander, TextGenerator};
use fortune_rag_core::lexical::RankedRetriever;
use fortune_rag_core::pipeline::{EngineParams, RetrievalEngine, RetrievalOutcome};
use fortune_rag_core::rerank::CrossEncoder;
use fortune_rag_core::store::DualIndex;

use crate::config::Config;
use crate::db;
use crate::deadline::{
    DeadlineCollection, DeadlineCrossEncoder, DeadlineGenerator, DeadlineRetriever,
};
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::migrate;
use crate::rerank::create_cross_encoder;
use crate::sqlite_store::{OpenMode, SqliteIndex};

pub struct RagContext {
    pool: SqlitePool,
    index: DualIndex,
    lexical: Option<Arc<dyn RankedRetriever>>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    generator: Option<Arc<dyn TextGenerator>>,
    params: EngineParams,
    max_queries: usize,
    timeout: Duration,
}

impl RagContext {
    /// Open everything a query needs. Fails when the collections have not
    /// been created or were built with a different embedding model.
    pub async fn open(config: &Config) -> Result<Self> {
        if !config.embedding.is_enabled() {
            bail!("Embedding provider is disabled; set [embedding] provider in the config to query");
        }
        let embedder = create_embedder(&config.embedding)?;
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Self::with_pool(pool, config, embedder).await
    }

    /// Like [`RagContext::open`] on an already connected pool.
    pub async fn with_pool(
        pool: SqlitePool,
        config: &Config,
        embedder: Arc<dyn fortune_rag_core::embedding::Embedder>,
    ) -> Result<Self> {
        let params = config.retrieval.engine_params();
        params.validate()?;

        let sqlite = SqliteIndex::open(
            &pool,
            &config.storage,
            embedder,
            config.embedding.batch_size,
            OpenMode::Existing,
        )
        .await?;

        let lexical: Option<Arc<dyn RankedRetriever>> = if config.retrieval.lexical {
            debug!(collection = %config.storage.passage_collection, "lexical search enabled");
            Some(Arc::clone(&sqlite.passage) as Arc<dyn RankedRetriever>)
        } else {
            None
        };

        let generator = if config.retrieval.expand_queries {
            create_generator(&config.generation)?
        } else {
            None
        };

        Ok(Self {
            index: sqlite.dual(),
            pool,
            lexical,
            cross_encoder: create_cross_encoder(&config.rerank)?,
            generator,
            params,
            max_queries: config.retrieval.max_queries,
            timeout: Duration::from_secs(config.retrieval.request_timeout_secs),
        })
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    /// Build the compressed, cited context for one question.
    pub async fn retrieve(&self, question: &str) -> Result<RetrievalOutcome> {
        let deadline = Instant::now() + self.timeout;

        let index = DualIndex::new(
            DeadlineCollection::wrap(self.index.summary.clone(), deadline),
            DeadlineCollection::wrap(self.index.passage.clone(), deadline),
        );
        let mut engine = RetrievalEngine::new(index, self.params)?;

        if let Some(generator) = &self.generator {
            let generator = DeadlineGenerator::wrap(Arc::clone(generator), deadline);
            engine = engine.with_expander(Arc::new(LlmQueryExpander::new(
                generator,
                self.max_queries,
            )));
        }
        if let Some(lexical) = &self.lexical {
            engine = engine.with_lexical(DeadlineRetriever::wrap(Arc::clone(lexical), deadline));
        }
        if let Some(encoder) = &self.cross_encoder {
            let encoder = DeadlineCrossEncoder::wrap(Arc::clone(encoder), deadline);
            engine = engine.with_cross_encoder(encoder);
        }

        Ok(engine.retrieve(question).await)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
