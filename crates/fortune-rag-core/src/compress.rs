//! Budgeted, citation-tagged context compression.
//!
//! Each candidate contributes one line `[{citation}] {snippet}` where the
//! snippet is its first four sentences. Snippets are truncated to the
//! remaining budget; processing stops at the first candidate that would
//! get an empty snippet. Output order is input order.
//!
//! Two accounting modes are supported:
//!
//! - [`BudgetMode::Snippet`] charges only snippet characters, so a budget
//!   of `B` admits `B` characters of source text.
//! - [`BudgetMode::Rendered`] charges every rendered character (label,
//!   brackets, separator and newline), so the returned text never exceeds
//!   `B` characters.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::chunk::{char_len, split_sentences, truncate_chars};
use crate::models::{CompressedContext, ContextEntry, FusedCandidate};

pub const DEFAULT_BUDGET_CHARS: usize = 1600;
/// Sentences taken from the head of each passage.
pub const SNIPPET_SENTENCES: usize = 4;

/// How the budget is charged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetMode {
    #[default]
    Snippet,
    Rendered,
}

/// First [`SNIPPET_SENTENCES`] sentences of `text`.
pub fn snippet(text: &str) -> String {
    split_sentences(text)
        .into_iter()
        .take(SNIPPET_SENTENCES)
        .collect::<Vec<_>>()
        .concat()
}

/// Compress `candidates` into at most `budget_chars` (per `mode`).
pub fn compress(
    candidates: &[FusedCandidate],
    budget_chars: usize,
    mode: BudgetMode,
) -> CompressedContext {
    let mut remaining = budget_chars;
    let mut entries: Vec<ContextEntry> = Vec::new();
    let mut seen = HashSet::new();

    for candidate in candidates {
        if remaining == 0 {
            break;
        }
        if !seen.insert(candidate.record.passage_key()) {
            continue;
        }

        let citation = candidate.record.metadata.citation();
        let full = snippet(&candidate.record.text);

        let overhead = match mode {
            BudgetMode::Snippet => 0,
            // "[" + citation + "] " plus the joining newline after the first line.
            BudgetMode::Rendered => {
                char_len(&citation) + 3 + usize::from(!entries.is_empty())
            }
        };
        let Some(room) = remaining.checked_sub(overhead) else {
            break;
        };

        let truncated = truncate_chars(&full, room);
        if truncated.is_empty() {
            break;
        }
        remaining -= overhead + char_len(truncated);
        entries.push(ContextEntry {
            citation,
            snippet: truncated.to_string(),
        });
    }

    let text = entries
        .iter()
        .map(|e| format!("[{}] {}", e.citation, e.snippet))
        .collect::<Vec<_>>()
        .join("\n");

    CompressedContext { entries, text }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Record, RecordMetadata};

    fn cand(source: &str, idx: u32, text: &str) -> FusedCandidate {
        FusedCandidate {
            record: Record {
                id: format!("{}#P0#{}", source, idx),
                text: text.to_string(),
                metadata: RecordMetadata {
                    source: source.to_string(),
                    parent_id: format!("{}#P0", source),
                    child_idx: Some(idx),
                },
            },
            fused_score: 0.0,
        }
    }

    #[test]
    fn test_snippet_takes_four_sentences() {
        assert_eq!(snippet("一。二。三。四。五。"), "一。二。三。四。");
        assert_eq!(snippet("only one"), "only one");
    }

    #[test]
    fn test_budget_ten_keeps_truncated_first() {
        // A's snippet is 15 characters.
        let a = cand("docs/a.txt", 0, "甲乙丙丁戊己庚辛壬癸子丑寅卯。");
        let b = cand("b.txt", 0, "第二段。");
        let c = cand("c.txt", 0, "第三段。");
        let out = compress(&[a, b, c], 10, BudgetMode::Snippet);
        assert_eq!(out.citations(), vec!["a.txt:docs/a.txt#P0#0"]);
        assert_eq!(out.entries[0].snippet, "甲乙丙丁戊己庚辛壬癸");
        assert_eq!(out.text, "[a.txt:docs/a.txt#P0#0] 甲乙丙丁戊己庚辛壬癸");
    }

    #[test]
    fn test_order_preserved() {
        let cands = vec![cand("z.txt", 0, "末。"), cand("a.txt", 1, "首。")];
        let out = compress(&cands, 1600, BudgetMode::Snippet);
        assert_eq!(out.citations(), vec!["z.txt:z.txt#P0#0", "a.txt:a.txt#P0#1"]);
        assert_eq!(out.text, "[z.txt:z.txt#P0#0] 末。\n[a.txt:a.txt#P0#1] 首。");
    }

    #[test]
    fn test_zero_budget_is_empty() {
        let out = compress(&[cand("a.txt", 0, "内容。")], 0, BudgetMode::Snippet);
        assert!(out.is_empty());
        assert_eq!(out.text, "");
    }

    #[test]
    fn test_empty_snippet_stops() {
        let cands = vec![cand("a.txt", 0, "  \n "), cand("b.txt", 0, "有内容。")];
        let out = compress(&cands, 100, BudgetMode::Snippet);
        assert!(out.is_empty());
    }

    #[test]
    fn test_duplicate_passages_skipped() {
        let cands = vec![cand("a.txt", 0, "一。"), cand("a.txt", 0, "一。")];
        let out = compress(&cands, 100, BudgetMode::Snippet);
        assert_eq!(out.entries.len(), 1);
    }

    #[test]
    fn test_rendered_mode_bounds_text() {
        let cands: Vec<_> = (0..5)
            .map(|i| cand("长文件名.txt", i, "这是一个比较长的段落。后面还有内容。"))
            .collect();
        for budget in [0, 5, 20, 30, 47, 60, 100, 400] {
            let out = compress(&cands, budget, BudgetMode::Rendered);
            assert!(char_len(&out.text) <= budget, "budget {}", budget);
        }
    }

    #[test]
    fn test_rendered_mode_label_larger_than_budget() {
        let out = compress(&[cand("a.txt", 0, "内容。")], 5, BudgetMode::Rendered);
        assert!(out.is_empty());
    }
}
