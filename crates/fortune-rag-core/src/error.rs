//! Fatal error classes raised by the core.
//!
//! Recoverable failures of external services never surface here; each stage
//! degrades on its own (see [`crate::fallback`]). What remains are setup
//! bugs that the caller must see synchronously.

use thiserror::Error;

/// Errors that abort a retrieval request or an ingestion run.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// A configuration value is out of range or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A named collection does not exist in the storage root.
    #[error("Collection '{0}' does not exist; run `fortune init` or `fortune ingest` first")]
    MissingCollection(String),
}

/// A convenience result type for the fatal error classes.
pub type Result<T> = std::result::Result<T, RetrievalError>;
