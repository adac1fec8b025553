//! Query expansion.
//!
//! A [`TextGenerator`] rewrites the question into a few short retrieval
//! queries. The merged list always starts with the original question, is
//! deduplicated preserving order, and is capped at `max_queries`. Any
//! generator failure degrades to `[question]`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::fallback::StageOutcome;

/// Free-text generation capability (an LLM behind some API).
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Turns one question into an ordered list of search queries.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    async fn expand(&self, question: &str) -> StageOutcome<Vec<String>>;
}

/// Instruction sent ahead of the question.
pub const EXPANSION_INSTRUCTION: &str = "请把用户问题改写为 2-3 条中文检索查询，尽量覆盖：核心对象A、条件/情境B、以及‘A在B情况下/与B组合’。每行一条，短句，不要编号。";

pub const DEFAULT_MAX_QUERIES: usize = 4;

/// Build the full expansion prompt for `question`.
pub fn expansion_prompt(question: &str) -> String {
    format!("{}\n\n问题：{}", EXPANSION_INSTRUCTION, question)
}

/// Parse generator output into candidate queries: one per line, trimmed,
/// leading `-`/`•` bullets removed, empty lines dropped.
pub fn parse_expansion(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim().trim_start_matches(['-', '•']).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `[question] + expansions`, deduplicated preserving order, capped.
pub fn merge_queries(question: &str, expansions: &[String], max_queries: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for q in std::iter::once(question).chain(expansions.iter().map(String::as_str)) {
        let q = q.trim();
        if q.is_empty() || merged.iter().any(|m| m == q) {
            continue;
        }
        merged.push(q.to_string());
        if merged.len() >= max_queries.max(1) {
            break;
        }
    }
    merged
}

/// Expander that passes the question through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityExpander;

#[async_trait]
impl QueryExpander for IdentityExpander {
    async fn expand(&self, question: &str) -> StageOutcome<Vec<String>> {
        StageOutcome::Fresh(merge_queries(question, &[], 1))
    }
}

/// Expander backed by a [`TextGenerator`].
pub struct LlmQueryExpander {
    generator: Arc<dyn TextGenerator>,
    max_queries: usize,
}

impl LlmQueryExpander {
    pub fn new(generator: Arc<dyn TextGenerator>, max_queries: usize) -> Self {
        Self {
            generator,
            max_queries,
        }
    }
}

#[async_trait]
impl QueryExpander for LlmQueryExpander {
    async fn expand(&self, question: &str) -> StageOutcome<Vec<String>> {
        match self.generator.generate(&expansion_prompt(question)).await {
            Ok(output) => {
                let queries = merge_queries(question, &parse_expansion(&output), self.max_queries);
                debug!(?queries, "expanded question");
                StageOutcome::Fresh(queries)
            }
            Err(e) => {
                warn!(stage = "expand", error = %format!("{:#}", e), "query expansion failed");
                StageOutcome::degraded(merge_queries(question, &[], 1), format!("{:#}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Result<String, String>);

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, prompt: &str) -> Result<String> {
            assert!(prompt.contains("问题："));
            self.0.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    #[test]
    fn test_parse_strips_bullets() {
        let parsed = parse_expansion("- 正官格\n• 正官格 身弱\n\n  正官 遇 七杀  \n");
        assert_eq!(parsed, vec!["正官格", "正官格 身弱", "正官 遇 七杀"]);
    }

    #[test]
    fn test_merge_original_first_dedup_cap() {
        let ex = vec![
            "甲".to_string(),
            "问题".to_string(),
            "乙".to_string(),
            "丙".to_string(),
            "丁".to_string(),
        ];
        let merged = merge_queries("问题", &ex, 4);
        assert_eq!(merged, vec!["问题", "甲", "乙", "丙"]);
    }

    #[tokio::test]
    async fn test_llm_expander_success() {
        let expander = LlmQueryExpander::new(Arc::new(Canned(Ok("正官格\n身弱\n".to_string()))), 4);
        let out = expander.expand("正官格身弱怎么办").await;
        assert!(!out.is_degraded());
        assert_eq!(out.into_value(), vec!["正官格身弱怎么办", "正官格", "身弱"]);
    }

    #[tokio::test]
    async fn test_llm_expander_failure_degrades() {
        let expander = LlmQueryExpander::new(Arc::new(Canned(Err("503".to_string()))), 4);
        let out = expander.expand("财多身弱").await;
        assert!(out.is_degraded());
        assert_eq!(out.into_value(), vec!["财多身弱"]);
    }

    #[tokio::test]
    async fn test_identity_expander() {
        let out = IdentityExpander.expand(" 七杀 ").await;
        assert_eq!(out, StageOutcome::Fresh(vec!["七杀".to_string()]));
    }
}
