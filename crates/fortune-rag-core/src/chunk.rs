//! Sentence-aligned parent/child chunker.
//!
//! Splits document text into overlapping **parent** chunks and, within each
//! parent, overlapping **child** chunks. Boundaries always fall between
//! sentences; a sentence is never split, even when it alone exceeds the
//! target size.
//!
//! # Algorithm
//!
//! 1. Segment text into sentences. Each of `。！？!?` and `\n` terminates the
//!    current sentence (delimiter included). Sentences are whitespace-trimmed
//!    and empty ones dropped.
//! 2. Accumulate sentences into a bucket until adding the next one would
//!    exceed `size` and the bucket is non-empty.
//! 3. Emit the bucket. Carry its longest run of trailing sentences whose
//!    total length fits within `overlap` (and leaves room for the incoming
//!    sentence) into the next bucket, then add the incoming sentence.
//! 4. Emit the final non-empty bucket.
//!
//! Lengths are counted in characters, not bytes.
//!
//! # Example
//!
//! ```rust
//! use fortune_rag_core::chunk::{make_chunks, ChunkParams};
//!
//! let text = "《测试》今天天气很好。明天会下雨吗？后天应该放晴。";
//! let chunks = make_chunks(text, ChunkParams { size: 10, overlap: 3 });
//! assert_eq!(chunks.len(), 3);
//! assert!(chunks.iter().all(|c| c.ends_with('。') || c.ends_with('？')));
//! ```

use crate::error::{Result, RetrievalError};
use crate::models::{ChildChunk, ParentChunk, RawDocument, SummaryEntry};

/// Characters that terminate a sentence.
pub const SENTENCE_DELIMITERS: [char; 6] = ['。', '！', '？', '!', '?', '\n'];

/// Target size and overlap for one chunking level, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub size: usize,
    pub overlap: usize,
}

impl ChunkParams {
    /// Parent level: 1800 characters, 200 overlap.
    pub const PARENT: ChunkParams = ChunkParams {
        size: 1800,
        overlap: 200,
    };
    /// Child level: 700 characters, 120 overlap.
    pub const CHILD: ChunkParams = ChunkParams {
        size: 700,
        overlap: 120,
    };

    pub fn validate(&self, level: &str) -> Result<()> {
        if self.size == 0 {
            return Err(RetrievalError::Config(format!(
                "{}_size must be > 0",
                level
            )));
        }
        if self.overlap >= self.size {
            return Err(RetrievalError::Config(format!(
                "{}_overlap ({}) must be less than {}_size ({})",
                level, self.overlap, level, self.size
            )));
        }
        Ok(())
    }
}

/// Parameters for [`chunk_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    pub parent: ChunkParams,
    pub child: ChunkParams,
    /// Character limit for each parent's summary.
    pub summary_chars: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            parent: ChunkParams::PARENT,
            child: ChunkParams::CHILD,
            summary_chars: 400,
        }
    }
}

impl ChunkingParams {
    pub fn validate(&self) -> Result<()> {
        self.parent.validate("parent")?;
        self.child.validate("child")?;
        if self.summary_chars == 0 {
            return Err(RetrievalError::Config(
                "summary_chars must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A chunk expressed as a run of consecutive sentences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceWindow<'a> {
    pub sentences: Vec<&'a str>,
    /// How many leading sentences were carried over from the previous window.
    pub carried: usize,
}

impl SentenceWindow<'_> {
    pub fn text(&self) -> String {
        self.sentences.concat()
    }

    /// The sentences this window contributes for the first time.
    pub fn fresh(&self) -> &[&str] {
        &self.sentences[self.carried..]
    }

    pub fn overlap_chars(&self) -> usize {
        self.sentences[..self.carried]
            .iter()
            .map(|s| char_len(s))
            .sum()
    }
}

/// Split text into trimmed, non-empty sentences.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        if SENTENCE_DELIMITERS.contains(&ch) {
            let end = i + ch.len_utf8();
            push_trimmed(&mut sentences, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, raw: &'a str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
}

/// Group sentences into overlapping windows of at most `params.size`
/// characters (a lone oversized sentence excepted).
pub fn sentence_windows(text: &str, params: ChunkParams) -> Vec<SentenceWindow<'_>> {
    let mut windows = Vec::new();
    let mut bucket: Vec<&str> = Vec::new();
    let mut bucket_len = 0usize;
    let mut carried = 0usize;

    for sentence in split_sentences(text) {
        let len = char_len(sentence);
        if bucket_len + len > params.size && !bucket.is_empty() {
            let keep = overlap_tail(
                &bucket,
                params.overlap.min(params.size.saturating_sub(len)),
            );
            let tail = bucket[bucket.len() - keep..].to_vec();
            windows.push(SentenceWindow {
                sentences: std::mem::take(&mut bucket),
                carried,
            });
            bucket_len = tail.iter().map(|s| char_len(s)).sum();
            bucket = tail;
            carried = keep;
        }
        bucket.push(sentence);
        bucket_len += len;
    }

    if !bucket.is_empty() {
        windows.push(SentenceWindow {
            sentences: bucket,
            carried,
        });
    }

    windows
}

/// Number of trailing sentences to carry: the longest suffix whose length
/// fits in `budget`, never the whole bucket.
fn overlap_tail(bucket: &[&str], budget: usize) -> usize {
    let mut taken = 0;
    let mut total = 0;
    for sentence in bucket.iter().rev() {
        if taken + 1 >= bucket.len() {
            break;
        }
        let len = char_len(sentence);
        if total + len > budget {
            break;
        }
        total += len;
        taken += 1;
    }
    taken
}

/// Chunk text at one level, returning each chunk's text.
///
/// Empty or whitespace-only input yields no chunks.
pub fn make_chunks(text: &str, params: ChunkParams) -> Vec<String> {
    sentence_windows(text, params)
        .iter()
        .map(SentenceWindow::text)
        .collect()
}

/// Split a document into parent chunk texts (1800 / 200).
pub fn split_parent(text: &str) -> Vec<String> {
    make_chunks(text, ChunkParams::PARENT)
}

/// Split a parent chunk's text into child chunk texts (700 / 120).
pub fn split_child(parent_text: &str) -> Vec<String> {
    make_chunks(parent_text, ChunkParams::CHILD)
}

/// Heuristic digest: the leading whole sentences that fit in `limit`
/// characters, or the first `limit` characters when the opening sentence
/// alone is longer.
pub fn build_summary(text: &str, limit: usize) -> String {
    let mut out = String::new();
    let mut total = 0;
    for sentence in split_sentences(text) {
        let len = char_len(sentence);
        if total + len > limit {
            break;
        }
        out.push_str(sentence);
        total += len;
    }
    if out.is_empty() {
        truncate_chars(text.trim(), limit).to_string()
    } else {
        out
    }
}

/// Everything ingestion writes for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentChunks {
    pub parents: Vec<ParentChunk>,
    pub summaries: Vec<SummaryEntry>,
    pub children: Vec<ChildChunk>,
}

impl DocumentChunks {
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

/// Chunk one document into parents, one summary per parent, and the
/// children of every parent.
///
/// Returns an empty [`DocumentChunks`] for blank documents; callers skip them.
pub fn chunk_document(doc: &RawDocument, params: &ChunkingParams) -> DocumentChunks {
    let mut out = DocumentChunks::default();

    for (index, parent_text) in make_chunks(&doc.text, params.parent)
        .into_iter()
        .enumerate()
    {
        let parent_id = format!("{}#P{}", doc.source, index);

        out.summaries.push(SummaryEntry {
            parent_id: parent_id.clone(),
            source: doc.source.clone(),
            text: build_summary(&parent_text, params.summary_chars),
        });

        for (child_idx, child_text) in make_chunks(&parent_text, params.child)
            .into_iter()
            .enumerate()
        {
            out.children.push(ChildChunk {
                parent_id: parent_id.clone(),
                source: doc.source.clone(),
                child_idx: child_idx as u32,
                text: child_text,
            });
        }

        out.parents.push(ParentChunk {
            parent_id,
            source: doc.source.clone(),
            index,
            text: parent_text,
        });
    }

    out
}

/// Length in characters.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The first `max_chars` characters of `s`, never splitting a character.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = "《测试》今天天气很好。明天会下雨吗？后天应该放晴。";

    #[test]
    fn test_split_sentences_keeps_delimiters() {
        let sentences = split_sentences("你好！Are you ok? 好的。\n最后一句");
        assert_eq!(sentences, vec!["你好！", "Are you ok?", "好的。", "最后一句"]);
    }

    #[test]
    fn test_split_sentences_drops_blank_lines() {
        let sentences = split_sentences("第一行\n\n\n  \n第二行\n");
        assert_eq!(sentences, vec!["第一行", "第二行"]);
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        assert!(make_chunks("", ChunkParams::PARENT).is_empty());
        assert!(make_chunks("   \n\t  ", ChunkParams::CHILD).is_empty());
        assert!(split_parent("\n\n").is_empty());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_parent("天干地支。阴阳五行。");
        assert_eq!(chunks, vec!["天干地支。阴阳五行。".to_string()]);
    }

    #[test]
    fn test_scenario_chunks_end_on_sentence_boundary() {
        let windows = sentence_windows(SCENARIO, ChunkParams { size: 10, overlap: 3 });
        assert!(windows.len() >= 2);
        for w in &windows {
            let text = w.text();
            assert!(text.ends_with('。') || text.ends_with('？'), "bad end: {}", text);
            assert!(w.overlap_chars() <= 3);
        }
    }

    #[test]
    fn test_oversized_sentence_is_kept_whole() {
        let long = "长".repeat(50) + "。";
        let text = format!("短句。{}短句二。", long);
        let chunks = make_chunks(&text, ChunkParams { size: 10, overlap: 4 });
        assert!(chunks.iter().any(|c| c == &long));
    }

    #[test]
    fn test_overlap_carries_trailing_sentences() {
        // Each sentence is 3 characters; size 9 holds three of them.
        let text = "甲甲。乙乙。丙丙。丁丁。戊戊。";
        let windows = sentence_windows(text, ChunkParams { size: 9, overlap: 3 });
        assert_eq!(windows[0].sentences, vec!["甲甲。", "乙乙。", "丙丙。"]);
        assert_eq!(windows[1].sentences, vec!["丙丙。", "丁丁。", "戊戊。"]);
        assert_eq!(windows[1].carried, 1);
        assert_eq!(windows[1].overlap_chars(), 3);
    }

    #[test]
    fn test_fresh_sentences_cover_text() {
        let text = "一二三。四五六！七八九？十十十\n百百百。千千千。";
        let windows = sentence_windows(text, ChunkParams { size: 8, overlap: 4 });
        let rebuilt: String = windows.iter().flat_map(|w| w.fresh().to_vec()).collect();
        assert_eq!(rebuilt, split_sentences(text).concat());
    }

    #[test]
    fn test_build_summary_whole_sentences() {
        let summary = build_summary("第一句。第二句很长很长。第三句。", 9);
        assert_eq!(summary, "第一句。");
    }

    #[test]
    fn test_build_summary_falls_back_to_prefix() {
        let summary = build_summary("这是一个非常非常长的句子没有标点", 5);
        assert_eq!(summary, "这是一个非");
    }

    #[test]
    fn test_chunk_document_ids() {
        let doc = RawDocument::new("data/raw/命理.txt", "子平法。".repeat(600));
        let chunks = chunk_document(&doc, &ChunkingParams::default());
        assert!(chunks.parents.len() > 1);
        assert_eq!(chunks.summaries.len(), chunks.parents.len());
        for (i, p) in chunks.parents.iter().enumerate() {
            assert_eq!(p.parent_id, format!("data/raw/命理.txt#P{}", i));
            assert!(char_len(&p.text) <= 1800);
        }
        for c in &chunks.children {
            assert!(chunks.parents.iter().any(|p| p.parent_id == c.parent_id));
            assert!(char_len(&c.text) <= 700);
        }
        let first_children: Vec<u32> = chunks
            .children
            .iter()
            .filter(|c| c.parent_id.ends_with("#P0"))
            .map(|c| c.child_idx)
            .collect();
        assert_eq!(first_children, (0..first_children.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn test_chunk_document_blank() {
        let doc = RawDocument::new("empty.md", "  \n ");
        assert!(chunk_document(&doc, &ChunkingParams::default()).is_empty());
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("命理学问", 2), "命理");
        assert_eq!(truncate_chars("ab", 5), "ab");
        assert_eq!(truncate_chars("ab", 0), "");
    }

    #[test]
    fn test_params_validation() {
        assert!(ChunkParams { size: 10, overlap: 10 }.validate("parent").is_err());
        assert!(ChunkParams { size: 0, overlap: 0 }.validate("child").is_err());
        assert!(ChunkingParams::default().validate().is_ok());
    }
}
