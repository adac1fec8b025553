//! Reciprocal rank fusion.
//!
//! Each input list is a ranking from one signal (dense passages, lexical
//! BM25). An item's fused score is `Σ 1 / (k + rank + 1)` over the lists
//! that contain it, with `rank` zero-based. Items are identified by
//! [`Record::identity_key`]; the record kept for an identity is its first
//! occurrence.

use std::collections::HashMap;

use crate::error::{Result, RetrievalError};
use crate::models::{FusedCandidate, Record};

pub const DEFAULT_RRF_K: usize = 60;
pub const DEFAULT_FINAL_TOP_K: usize = 8;

/// Fusion settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionParams {
    pub rrf_k: usize,
    /// Candidates kept after fusion.
    pub final_top_k: usize,
    /// Lexical results fetched per query.
    pub fetch_k_each: usize,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            final_top_k: DEFAULT_FINAL_TOP_K,
            fetch_k_each: 20,
        }
    }
}

impl FusionParams {
    pub fn validate(&self) -> Result<()> {
        if self.final_top_k == 0 {
            return Err(RetrievalError::Config("final_top_k must be > 0".to_string()));
        }
        if self.fetch_k_each == 0 {
            return Err(RetrievalError::Config("fetch_k_each must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Fuse ranked lists into one list ordered by descending fused score.
///
/// Ties keep first-seen order. Duplicates within one list count once, at
/// their best rank.
pub fn reciprocal_rank_fusion(lists: &[Vec<Record>], k: usize) -> Vec<FusedCandidate> {
    let mut order: Vec<String> = Vec::new();
    let mut entries: HashMap<String, FusedCandidate> = HashMap::new();

    for list in lists {
        let mut seen_in_list = std::collections::HashSet::new();
        for (rank, record) in list.iter().enumerate() {
            let key = record.identity_key().to_string();
            if !seen_in_list.insert(key.clone()) {
                continue;
            }
            let contribution = 1.0 / (k as f64 + rank as f64 + 1.0);
            match entries.get_mut(&key) {
                Some(entry) => entry.fused_score += contribution,
                None => {
                    order.push(key.clone());
                    entries.insert(
                        key,
                        FusedCandidate {
                            record: record.clone(),
                            fused_score: contribution,
                        },
                    );
                }
            }
        }
    }

    let mut fused: Vec<FusedCandidate> = order
        .into_iter()
        .filter_map(|key| entries.remove(&key))
        .collect();
    // Stable sort keeps first-seen order among equal scores.
    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused
}

/// Keep the first `k` fused candidates.
pub fn top_k(mut fused: Vec<FusedCandidate>, k: usize) -> Vec<FusedCandidate> {
    fused.truncate(k);
    fused
}
