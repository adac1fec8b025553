//! Cross-encoder reranking with fallback to fused order.
//!
//! Reranking is optional and never fails a request: any scorer error, or
//! a score count that does not match the candidates, falls back to the
//! first `top_n` candidates in fused order.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::fallback::StageOutcome;
use crate::models::FusedCandidate;

pub const DEFAULT_TOP_N: usize = 3;

/// Scores (query, passage) pairs jointly. Higher is more relevant.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// One score per text, in input order.
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;
}

/// Keep the `min(top_n, len)` best candidates by cross-encoder score, or
/// the first `top_n` in fused order when no encoder is configured or it
/// fails.
pub async fn rerank_or_fallback(
    encoder: Option<&Arc<dyn CrossEncoder>>,
    query: &str,
    fused: Vec<FusedCandidate>,
    top_n: usize,
) -> StageOutcome<Vec<FusedCandidate>> {
    let n = top_n.min(fused.len());
    let Some(encoder) = encoder else {
        return StageOutcome::Fresh(fused.into_iter().take(n).collect());
    };
    if fused.is_empty() {
        return StageOutcome::Fresh(fused);
    }

    let texts: Vec<String> = fused.iter().map(|f| f.record.text.clone()).collect();
    let reason = match encoder.score(query, &texts).await {
        Ok(scores) if scores.len() == fused.len() => {
            let mut scored: Vec<(f32, FusedCandidate)> = scores.into_iter().zip(fused).collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            return StageOutcome::Fresh(scored.into_iter().take(n).map(|(_, f)| f).collect());
        }
        Ok(scores) => format!(
            "cross-encoder returned {} scores for {} passages",
            scores.len(),
            fused.len()
        ),
        Err(e) => format!("{:#}", e),
    };

    warn!(stage = "rerank", error = %reason, "rerank failed; keeping fused order");
    StageOutcome::degraded(fused.into_iter().take(n).collect(), reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Record, RecordMetadata};

    fn fused(id: &str, text: &str, score: f64) -> FusedCandidate {
        FusedCandidate {
            record: Record {
                id: id.to_string(),
                text: text.to_string(),
                metadata: RecordMetadata {
                    source: "a.txt".to_string(),
                    parent_id: "a.txt#P0".to_string(),
                    child_idx: Some(0),
                },
            },
            fused_score: score,
        }
    }

    fn candidates() -> Vec<FusedCandidate> {
        vec![
            fused("1", "short", 0.4),
            fused("2", "a much longer passage", 0.3),
            fused("3", "mid length", 0.2),
            fused("4", "x", 0.1),
        ]
    }

    struct ByLength;

    #[async_trait]
    impl CrossEncoder for ByLength {
        async fn score(&self, _query: &str, texts: &[String]) -> Result<Vec<f32>> {
            Ok(texts.iter().map(|t| t.len() as f32).collect())
        }
    }

    struct Failing;

    #[async_trait]
    impl CrossEncoder for Failing {
        async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f32>> {
            anyhow::bail!("model not loaded")
        }
    }

    struct WrongCount;

    #[async_trait]
    impl CrossEncoder for WrongCount {
        async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f32>> {
            Ok(vec![1.0])
        }
    }

    fn ids(c: &[FusedCandidate]) -> Vec<&str> {
        c.iter().map(|f| f.record.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_rerank_orders_by_score() {
        let enc: Arc<dyn CrossEncoder> = Arc::new(ByLength);
        let out = rerank_or_fallback(Some(&enc), "q", candidates(), 3).await;
        assert!(!out.is_degraded());
        assert_eq!(ids(out.value()), vec!["2", "3", "1"]);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_fused_order() {
        let enc: Arc<dyn CrossEncoder> = Arc::new(Failing);
        let out = rerank_or_fallback(Some(&enc), "q", candidates(), 3).await;
        assert!(out.is_degraded());
        assert_eq!(ids(out.value()), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_score_count_mismatch_falls_back() {
        let enc: Arc<dyn CrossEncoder> = Arc::new(WrongCount);
        let out = rerank_or_fallback(Some(&enc), "q", candidates(), 2).await;
        assert!(out.is_degraded());
        assert_eq!(ids(out.value()), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_no_encoder_truncates() {
        let out = rerank_or_fallback(None, "q", candidates(), 3).await;
        assert!(!out.is_degraded());
        assert_eq!(out.value().len(), 3);
    }

    #[tokio::test]
    async fn test_top_n_capped_by_len() {
        let enc: Arc<dyn CrossEncoder> = Arc::new(ByLength);
        let out = rerank_or_fallback(Some(&enc), "q", candidates(), 10).await;
        assert_eq!(out.value().len(), 4);
        let empty = rerank_or_fallback(Some(&enc), "q", Vec::new(), 3).await;
        assert!(empty.value().is_empty());
    }
}
