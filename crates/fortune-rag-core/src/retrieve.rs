//! Two-stage retrieval: coarse search over summaries selects candidate
//! parents, fine search over passages is restricted to those parents.
//!
//! Per-query searches within a stage run concurrently and are merged in
//! query order, so results are deterministic regardless of which search
//! finishes first. A failed search contributes nothing; when every coarse
//! search fails (or finds nothing) the candidate parent set is empty and
//! the fine stage runs unfiltered.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::{Result, RetrievalError};
use crate::expand::{merge_queries, IdentityExpander, QueryExpander};
use crate::fallback::Degradation;
use crate::models::RetrievalCandidate;
use crate::store::DualIndex;

/// Per-query result counts for the two stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalParams {
    /// Summaries taken per query in the coarse stage.
    pub coarse_k: usize,
    /// Passages taken per query in the fine stage.
    pub fine_k: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            coarse_k: 3,
            fine_k: 10,
        }
    }
}

impl RetrievalParams {
    pub fn validate(&self) -> Result<()> {
        if self.coarse_k == 0 {
            return Err(RetrievalError::Config("coarse_k must be > 0".to_string()));
        }
        if self.fine_k == 0 {
            return Err(RetrievalError::Config("fine_k must be > 0".to_string()));
        }
        Ok(())
    }
}

/// What the two stages produced for one question.
#[derive(Debug, Clone, Default)]
pub struct TwoStageResult {
    /// Queries actually searched, original question first.
    pub queries: Vec<String>,
    /// Union of parent ids selected by the coarse stage. Empty means the
    /// fine stage ran without a filter.
    pub parent_ids: BTreeSet<String>,
    /// Filtered, deduplicated passages with their scores, in query order.
    pub candidates: Vec<RetrievalCandidate>,
    pub degradations: Vec<Degradation>,
}

/// Coarse-to-fine retriever over a [`DualIndex`].
pub struct TwoStageRetriever {
    index: DualIndex,
    expander: Arc<dyn QueryExpander>,
    params: RetrievalParams,
}

impl TwoStageRetriever {
    pub fn new(index: DualIndex, params: RetrievalParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            index,
            expander: Arc::new(IdentityExpander),
            params,
        })
    }

    pub fn with_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = expander;
        self
    }

    pub fn params(&self) -> RetrievalParams {
        self.params
    }

    /// Retrieve passages for `question`.
    ///
    /// When `queries` is `None` the configured expander produces them.
    /// Explicit queries are merged behind the question itself, so the
    /// question is always searched first and duplicates are dropped. A
    /// blank question yields an empty result.
    pub async fn retrieve(&self, question: &str, queries: Option<Vec<String>>) -> TwoStageResult {
        let mut result = TwoStageResult::default();
        if question.trim().is_empty() {
            return result;
        }

        result.queries = match queries {
            Some(q) if !q.is_empty() => merge_queries(question, &q, q.len() + 1),
            _ => {
                let (q, degraded) = self.expander.expand(question).await.split("expand");
                result.degradations.extend(degraded);
                q
            }
        };

        result.parent_ids = self.coarse(&result.queries, &mut result.degradations).await;
        result.candidates = self
            .fine(&result.queries, &result.parent_ids, &mut result.degradations)
            .await;
        result
    }

    /// Union of the parent ids of the top `coarse_k` summaries per query.
    pub async fn coarse(
        &self,
        queries: &[String],
        degradations: &mut Vec<Degradation>,
    ) -> BTreeSet<String> {
        let searches = queries
            .iter()
            .map(|q| self.index.summary.similarity_search(q, self.params.coarse_k));
        let results = join_all(searches).await;

        let mut parents = BTreeSet::new();
        for (query, result) in queries.iter().zip(results) {
            match result {
                Ok(records) => {
                    parents.extend(records.into_iter().map(|r| r.metadata.parent_id));
                }
                Err(e) => {
                    warn!(
                        stage = "coarse",
                        query = %query,
                        error = %format!("{:#}", e),
                        "summary search failed"
                    );
                    degradations.push(Degradation {
                        stage: "coarse".to_string(),
                        reason: format!("{}: {:#}", query, e),
                    });
                }
            }
        }

        if parents.is_empty() {
            debug!("coarse stage selected no parents; fine stage runs unfiltered");
        }
        parents
    }

    /// Top `fine_k` passages per query, restricted to `parents` (unless
    /// empty), deduplicated keeping the first occurrence in query order.
    pub async fn fine(
        &self,
        queries: &[String],
        parents: &BTreeSet<String>,
        degradations: &mut Vec<Degradation>,
    ) -> Vec<RetrievalCandidate> {
        let searches = queries
            .iter()
            .map(|q| self.index.passage.similarity_search_with_score(q, self.params.fine_k));
        let results = join_all(searches).await;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (query, result) in queries.iter().zip(results) {
            let hits = match result {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(
                        stage = "fine",
                        query = %query,
                        error = %format!("{:#}", e),
                        "passage search failed"
                    );
                    degradations.push(Degradation {
                        stage: "fine".to_string(),
                        reason: format!("{}: {:#}", query, e),
                    });
                    continue;
                }
            };
            for hit in hits {
                if !parents.is_empty() && !parents.contains(&hit.record.metadata.parent_id) {
                    continue;
                }
                if seen.insert(hit.record.passage_key()) {
                    out.push(hit);
                }
            }
        }
        out
    }
}
