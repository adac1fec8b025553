//! # fortune-rag core
//!
//! Runtime-agnostic logic for hierarchical retrieval: sentence-aligned
//! parent/child chunking, the dual-index store abstraction, two-stage
//! (summary → passage) retrieval, reciprocal rank fusion, cross-encoder
//! reranking with fallback, and budgeted context compression.
//!
//! This crate contains no tokio, sqlx, filesystem or network code. Every
//! external capability (embedding, vector search, lexical search,
//! cross-encoder scoring, text generation) is a trait implemented by the
//! application crate.
//!
//! ```text
//! chunk ──▶ store (summary + passage) ──▶ retrieve ──▶ fusion ──▶ rerank ──▶ compress
//! ```

pub mod chunk;
pub mod compress;
pub mod embedding;
pub mod error;
pub mod expand;
pub mod fallback;
pub mod fusion;
pub mod lexical;
pub mod models;
pub mod pipeline;
pub mod rerank;
pub mod retrieve;
pub mod store;
