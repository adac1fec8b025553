//! # fortune-rag
//!
//! Hierarchical retrieval over a local library of fortune-telling texts.
//!
//! Documents are split into large *parent* chunks and small *child*
//! passages. A summary of every parent goes into one collection, every
//! passage into another. At query time the question is optionally expanded
//! into several retrieval queries, the summary collection picks candidate
//! parents, the passage collection is searched inside them, dense and
//! lexical results are fused, optionally reranked, and finally compressed
//! into a citation-tagged context that fits a character budget.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────────┐
//! │ Filesystem  │──▶│ Chunk+Embed  │──▶│ SQLite            │
//! │ md/txt/docx │   │ parent/child │   │ summary + passage │
//! └─────────────┘   └──────────────┘   └─────────┬─────────┘
//!                                                │
//!               ┌────────────────────────────────┘
//!               ▼
//!  expand → coarse → fine → fuse (+BM25) → rerank → compress
//! ```
//!
//! The retrieval algorithms live in the `fortune-rag-core` crate and are
//! storage-agnostic; this crate provides SQLite storage, embedding,
//! reranking and generation backends, ingestion, and the `fortune` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! fortune init                       # create database and collections
//! fortune ingest                     # index ./data/raw
//! fortune query "正官格身弱怎么看"   # print cited context
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connector_fs`] | Filesystem scanning and document loading |
//! | [`extract`] | `.docx` text extraction chain |
//! | [`ingest`] | Duplicate-safe ingestion |
//! | [`sqlite_store`] | SQLite-backed vector collections |
//! | [`embedding`] | Embedding providers |
//! | [`rerank`] | Cross-encoder providers |
//! | [`generation`] | Query-expansion generator |
//! | [`engine`] | Query-time context and request deadlines |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod connector_fs;
pub mod db;
pub mod deadline;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod generation;
pub mod http;
pub mod ingest;
pub mod migrate;
pub mod rerank;
pub mod sqlite_store;
