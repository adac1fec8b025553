//! The query path, end to end.
//!
//! [`RetrievalEngine::retrieve`] runs:
//!
//! 1. query expansion and two-stage retrieval ([`crate::retrieve`]),
//! 2. an optional lexical signal over the same candidate parents,
//! 3. reciprocal rank fusion and the top-K cut ([`crate::fusion`]),
//! 4. cross-encoder rerank with fallback ([`crate::rerank`]),
//! 5. budgeted compression ([`crate::compress`]).
//!
//! Only configuration errors are returned as `Err`, and only from
//! construction. Every runtime failure degrades its stage and is recorded
//! in the [`RetrievalTrace`].

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::compress::{compress, BudgetMode, DEFAULT_BUDGET_CHARS};
use crate::error::{Result, RetrievalError};
use crate::expand::QueryExpander;
use crate::fallback::Degradation;
use crate::fusion::{reciprocal_rank_fusion, top_k, FusionParams};
use crate::lexical::RankedRetriever;
use crate::models::{CompressedContext, Record};
use crate::rerank::{rerank_or_fallback, CrossEncoder, DEFAULT_TOP_N};
use crate::retrieve::{RetrievalParams, TwoStageRetriever};
use crate::store::DualIndex;

/// All tunables of the query path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineParams {
    pub retrieval: RetrievalParams,
    pub fusion: FusionParams,
    pub rerank_top_n: usize,
    pub budget_chars: usize,
    pub budget_mode: BudgetMode,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            retrieval: RetrievalParams::default(),
            fusion: FusionParams::default(),
            rerank_top_n: DEFAULT_TOP_N,
            budget_chars: DEFAULT_BUDGET_CHARS,
            budget_mode: BudgetMode::default(),
        }
    }
}

impl EngineParams {
    pub fn validate(&self) -> Result<()> {
        self.retrieval.validate()?;
        self.fusion.validate()?;
        if self.rerank_top_n == 0 {
            return Err(RetrievalError::Config("rerank_top_n must be > 0".to_string()));
        }
        Ok(())
    }
}

/// A passage handed to the compressor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassageRef {
    pub parent_id: String,
    pub child_idx: Option<u32>,
}

/// How a request was answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrievalTrace {
    pub queries: Vec<String>,
    pub parent_ids: Vec<String>,
    pub passages: Vec<PassageRef>,
    pub degradations: Vec<Degradation>,
}

/// Compressed context plus its trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrievalOutcome {
    pub context: CompressedContext,
    pub trace: RetrievalTrace,
}

/// Hierarchical retrieval engine.
pub struct RetrievalEngine {
    retriever: TwoStageRetriever,
    lexical: Option<Arc<dyn RankedRetriever>>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    params: EngineParams,
}

impl RetrievalEngine {
    pub fn new(index: DualIndex, params: EngineParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            retriever: TwoStageRetriever::new(index, params.retrieval)?,
            lexical: None,
            cross_encoder: None,
            params,
        })
    }

    pub fn with_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.retriever = self.retriever.with_expander(expander);
        self
    }

    pub fn with_lexical(mut self, lexical: Arc<dyn RankedRetriever>) -> Self {
        self.lexical = Some(lexical);
        self
    }

    pub fn with_cross_encoder(mut self, encoder: Arc<dyn CrossEncoder>) -> Self {
        self.cross_encoder = Some(encoder);
        self
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    /// Answer one question with a compressed, citation-tagged context.
    ///
    /// A blank question yields an empty outcome.
    pub async fn retrieve(&self, question: &str) -> RetrievalOutcome {
        if question.trim().is_empty() {
            return RetrievalOutcome::default();
        }

        let two_stage = self.retriever.retrieve(question, None).await;
        let mut degradations = two_stage.degradations;

        let mut dense = two_stage.candidates;
        // Stable: equal scores keep query order.
        dense.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut lists: Vec<Vec<Record>> = vec![dense.into_iter().map(|c| c.record).collect()];
        lists.extend(
            self.lexical_list(&two_stage.queries, &two_stage.parent_ids, &mut degradations)
                .await,
        );

        let fused = top_k(
            reciprocal_rank_fusion(&lists, self.params.fusion.rrf_k),
            self.params.fusion.final_top_k,
        );
        debug!(fused = fused.len(), lists = lists.len(), "fused candidates");

        let (reranked, rerank_degraded) = rerank_or_fallback(
            self.cross_encoder.as_ref(),
            question,
            fused,
            self.params.rerank_top_n,
        )
        .await
        .split("rerank");
        degradations.extend(rerank_degraded);

        let context = compress(&reranked, self.params.budget_chars, self.params.budget_mode);

        RetrievalOutcome {
            context,
            trace: RetrievalTrace {
                queries: two_stage.queries,
                parent_ids: two_stage.parent_ids.into_iter().collect(),
                passages: reranked
                    .iter()
                    .map(|c| PassageRef {
                        parent_id: c.record.metadata.parent_id.clone(),
                        child_idx: c.record.metadata.child_idx,
                    })
                    .collect(),
                degradations,
            },
        }
    }

    /// One lexical list for all queries, restricted to `parents` unless
    /// empty.
    ///
    /// Per-query results are interleaved by rank (every query's first hit,
    /// then every second hit, in query order) and deduplicated, so the
    /// lexical signal weighs as much as the single dense list in fusion
    /// regardless of how many queries expansion produced.
    async fn lexical_list(
        &self,
        queries: &[String],
        parents: &BTreeSet<String>,
        degradations: &mut Vec<Degradation>,
    ) -> Option<Vec<Record>> {
        let lexical = self.lexical.as_ref()?;

        let k = self.params.fusion.fetch_k_each;
        let results = join_all(queries.iter().map(|q| lexical.retrieve(q, k))).await;

        let mut per_query: Vec<Vec<Record>> = Vec::new();
        for (query, result) in queries.iter().zip(results) {
            match result {
                Ok(records) => per_query.push(
                    records
                        .into_iter()
                        .filter(|r| parents.is_empty() || parents.contains(&r.metadata.parent_id))
                        .collect(),
                ),
                Err(e) => {
                    warn!(
                        stage = "lexical",
                        query = %query,
                        error = %format!("{:#}", e),
                        "lexical search failed"
                    );
                    degradations.push(Degradation {
                        stage: "lexical".to_string(),
                        reason: format!("{}: {:#}", query, e),
                    });
                }
            }
        }

        let depth = per_query.iter().map(Vec::len).max().unwrap_or(0);
        let mut seen = HashSet::new();
        let list: Vec<Record> = (0..depth)
            .flat_map(|rank| per_query.iter().filter_map(move |list| list.get(rank)))
            .filter(|r| seen.insert(r.passage_key()))
            .cloned()
            .collect();
        (!list.is_empty()).then_some(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_document, ChunkingParams};
    use crate::embedding::HashEmbedder;
    use crate::expand::{LlmQueryExpander, TextGenerator};
    use crate::models::{RawDocument, RecordMetadata};
    use crate::store::memory::InMemoryCollection;
    use crate::store::VectorCollection;
    use async_trait::async_trait;

    async fn index() -> (DualIndex, Vec<Record>) {
        let embedder = Arc::new(HashEmbedder::new(256));
        let summary = Arc::new(InMemoryCollection::new("fortune_summary", embedder.clone()));
        let passage = Arc::new(InMemoryCollection::new("fortune", embedder));
        let docs = [
            RawDocument::new("kb/正官.txt", "正官格喜财印相生。正官格忌伤官见官。身弱正官宜用印。"),
            RawDocument::new("kb/七杀.txt", "七杀格喜食神制杀。七杀无制则为祸。"),
            RawDocument::new("kb/天气.txt", "今天天气很好。明天会下雨吗？后天应该放晴。"),
        ];
        let mut passages = Vec::new();
        for doc in &docs {
            let chunks = chunk_document(doc, &ChunkingParams::default());
            let summaries: Vec<_> = chunks.summaries.iter().map(|s| s.to_record()).collect();
            let children: Vec<_> = chunks.children.iter().map(|c| c.to_record()).collect();
            summary.upsert(&summaries).await.unwrap();
            passage.upsert(&children).await.unwrap();
            passages.extend(children);
        }
        (DualIndex::new(summary, passage), passages)
    }

    struct Down;

    #[async_trait]
    impl TextGenerator for Down {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            anyhow::bail!("generator offline")
        }
    }

    /// Passages containing the first two characters of the query.
    struct Prefix(Vec<Record>);

    #[async_trait]
    impl RankedRetriever for Prefix {
        async fn retrieve(&self, query: &str, k: usize) -> anyhow::Result<Vec<Record>> {
            let prefix: String = query.chars().take(2).collect();
            Ok(self
                .0
                .iter()
                .filter(|r| r.text.contains(&prefix))
                .take(k)
                .cloned()
                .collect())
        }
    }

    /// Same single record for every query.
    struct Always(Record);

    #[async_trait]
    impl RankedRetriever for Always {
        async fn retrieve(&self, _query: &str, _k: usize) -> anyhow::Result<Vec<Record>> {
            Ok(vec![self.0.clone()])
        }
    }

    struct Canned(&'static str);

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingLexical;

    #[async_trait]
    impl RankedRetriever for FailingLexical {
        async fn retrieve(&self, _query: &str, _k: usize) -> anyhow::Result<Vec<Record>> {
            anyhow::bail!("index missing")
        }
    }

    #[tokio::test]
    async fn test_end_to_end_produces_citations() {
        let (index, passages) = index().await;
        let engine = RetrievalEngine::new(index, EngineParams::default())
            .unwrap()
            .with_lexical(Arc::new(Prefix(passages)));
        let outcome = engine.retrieve("正官格喜什么").await;
        assert!(!outcome.context.is_empty());
        assert!(outcome.context.entries.len() <= 3);
        assert!(outcome.context.citations()[0].starts_with("正官.txt:kb/正官.txt#P0#"));
        assert_eq!(outcome.trace.queries, vec!["正官格喜什么"]);
        assert_eq!(outcome.trace.passages.len(), outcome.context.entries.len());
        assert!(outcome.trace.degradations.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_stages_are_traced() {
        let (index, _) = index().await;
        let engine = RetrievalEngine::new(index, EngineParams::default())
            .unwrap()
            .with_expander(Arc::new(LlmQueryExpander::new(Arc::new(Down), 4)))
            .with_lexical(Arc::new(FailingLexical));
        let outcome = engine.retrieve("七杀").await;
        let stages: Vec<_> = outcome.trace.degradations.iter().map(|d| d.stage.as_str()).collect();
        assert!(stages.contains(&"expand"));
        assert!(stages.contains(&"lexical"));
        assert_eq!(outcome.trace.queries, vec!["七杀"]);
        assert!(!outcome.context.is_empty());
    }

    #[tokio::test]
    async fn test_lexical_counts_once_across_expanded_queries() {
        let expander = || -> Arc<dyn QueryExpander> {
            Arc::new(LlmQueryExpander::new(
                Arc::new(Canned("正官格喜财印\n七杀格喜食神\n身弱正官宜用印")),
                4,
            ))
        };

        let (index, _) = index().await;
        let baseline = RetrievalEngine::new(index, EngineParams::default())
            .unwrap()
            .with_expander(expander())
            .retrieve("正官格")
            .await;
        assert_eq!(baseline.trace.queries.len(), 4);
        let dense_top = baseline.trace.passages[0].clone();

        // A passage the dense stage never returns, ranked first by every
        // lexical query.
        let parent_id = baseline.trace.parent_ids[0].clone();
        let lexical_only = Record {
            id: format!("{}#99", parent_id),
            text: "正官格".to_string(),
            metadata: RecordMetadata {
                source: parent_id.split('#').next().unwrap().to_string(),
                parent_id,
                child_idx: Some(99),
            },
        };

        let (index, _) = self::index().await;
        let outcome = RetrievalEngine::new(index, EngineParams::default())
            .unwrap()
            .with_expander(expander())
            .with_lexical(Arc::new(Always(lexical_only)))
            .retrieve("正官格")
            .await;
        assert_eq!(outcome.trace.passages[0], dense_top);
        assert_eq!(outcome.trace.passages[1].child_idx, Some(99));
    }

    #[tokio::test]
    async fn test_lexical_results_outside_candidate_parents_are_dropped() {
        let (index, passages) = index().await;
        let weather = passages
            .into_iter()
            .find(|r| r.metadata.source == "kb/天气.txt")
            .unwrap();
        let params = EngineParams {
            retrieval: RetrievalParams {
                coarse_k: 1,
                fine_k: 10,
            },
            ..EngineParams::default()
        };
        let engine = RetrievalEngine::new(index, params)
            .unwrap()
            .with_lexical(Arc::new(Always(weather)));
        let outcome = engine.retrieve("七杀格喜食神制杀").await;
        assert_eq!(outcome.trace.parent_ids.len(), 1);
        assert!(outcome
            .trace
            .passages
            .iter()
            .all(|p| outcome.trace.parent_ids.contains(&p.parent_id)));
    }

    #[tokio::test]
    async fn test_blank_question_is_empty() {
        let (index, _) = index().await;
        let engine = RetrievalEngine::new(index, EngineParams::default()).unwrap();
        let outcome = engine.retrieve(" \n").await;
        assert_eq!(outcome, RetrievalOutcome::default());
    }

    #[tokio::test]
    async fn test_budget_respected() {
        let (index, _) = index().await;
        let params = EngineParams {
            budget_chars: 40,
            budget_mode: BudgetMode::Rendered,
            ..EngineParams::default()
        };
        let engine = RetrievalEngine::new(index, params).unwrap();
        let outcome = engine.retrieve("天气").await;
        assert!(outcome.context.text.chars().count() <= 40);
    }

    #[tokio::test]
    async fn test_invalid_params_rejected() {
        let (index, _) = index().await;
        let params = EngineParams {
            rerank_top_n: 0,
            ..EngineParams::default()
        };
        assert!(matches!(
            RetrievalEngine::new(index, params),
            Err(RetrievalError::Config(_))
        ));
    }
}
