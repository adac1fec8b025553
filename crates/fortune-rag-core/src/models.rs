//! Core data models that flow through ingestion and retrieval.
//!
//! Ingestion produces [`ParentChunk`]s, [`ChildChunk`]s and
//! [`SummaryEntry`]s from a [`RawDocument`] and stores them as [`Record`]s.
//! Retrieval works on records alone: everything a later stage needs
//! (source, parent, child index) travels in [`RecordMetadata`].

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A source document with its full extracted text.
///
/// Identified by its source path; re-ingestion replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub source: String,
    pub text: String,
}

impl RawDocument {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }
}

/// A large, overlap-linked segment of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentChunk {
    /// `{source}#P{index}`.
    pub parent_id: String,
    pub source: String,
    pub index: usize,
    pub text: String,
}

/// A small segment nested within exactly one [`ParentChunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildChunk {
    /// Back-reference to the owning parent (lookup only).
    pub parent_id: String,
    pub source: String,
    pub child_idx: u32,
    pub text: String,
}

impl ChildChunk {
    /// Record id in the passage collection: `{parent_id}#{child_idx}`.
    pub fn record_id(&self) -> String {
        format!("{}#{}", self.parent_id, self.child_idx)
    }

    pub fn to_record(&self) -> Record {
        Record {
            id: self.record_id(),
            text: self.text.clone(),
            metadata: RecordMetadata {
                source: self.source.clone(),
                parent_id: self.parent_id.clone(),
                child_idx: Some(self.child_idx),
            },
        }
    }
}

/// Heuristic digest of one parent, stored in the summary collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEntry {
    pub parent_id: String,
    pub source: String,
    pub text: String,
}

impl SummaryEntry {
    pub fn to_record(&self) -> Record {
        Record {
            id: self.parent_id.clone(),
            text: self.text.clone(),
            metadata: RecordMetadata {
                source: self.source.clone(),
                parent_id: self.parent_id.clone(),
                child_idx: None,
            },
        }
    }
}

/// Metadata stored with every record. Must round-trip exactly through a
/// [`VectorCollection`](crate::store::VectorCollection).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source: String,
    pub parent_id: String,
    /// Present on passage records only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_idx: Option<u32>,
}

impl RecordMetadata {
    pub fn passage_key(&self) -> PassageKey {
        PassageKey {
            source: self.source.clone(),
            parent_id: self.parent_id.clone(),
            child_idx: self.child_idx,
        }
    }

    /// Citation label: `{basename(source)}:{parent_id}#{child_idx}`.
    pub fn citation(&self) -> String {
        let file_name = Path::new(&self.source)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.clone());
        let child = self
            .child_idx
            .map(|idx| idx.to_string())
            .unwrap_or_default();
        format!("{}:{}#{}", file_name, self.parent_id, child)
    }
}

/// Composite dedup key for passages: `(source, parent_id, child_idx)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassageKey {
    pub source: String,
    pub parent_id: String,
    pub child_idx: Option<u32>,
}

/// A stored unit of text in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub text: String,
    pub metadata: RecordMetadata,
}

impl Record {
    pub fn passage_key(&self) -> PassageKey {
        self.metadata.passage_key()
    }

    /// Identity used by rank fusion: the explicit id, else the source path.
    pub fn identity_key(&self) -> &str {
        if self.id.is_empty() {
            &self.metadata.source
        } else {
            &self.id
        }
    }
}

/// A record paired with the relevance score one signal gave it.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalCandidate {
    pub record: Record,
    /// Higher is more relevant.
    pub score: f32,
}

/// A record with its reciprocal-rank-fusion score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub record: Record,
    pub fused_score: f64,
}

/// One line of a [`CompressedContext`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextEntry {
    pub citation: String,
    pub snippet: String,
}

/// Citation-tagged context handed to the answer generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompressedContext {
    pub entries: Vec<ContextEntry>,
    /// Lines `[{citation}] {snippet}` joined by `\n`.
    pub text: String,
}

impl CompressedContext {
    pub fn citations(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.citation.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
