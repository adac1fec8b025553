//! Filesystem scanning for the ingestion root.
//!
//! Walks `ingest.root` recursively, applies include/exclude globs to paths
//! relative to the root, and loads each match as a [`RawDocument`]:
//! `.docx` through the extraction chain in [`crate::extract`], everything
//! else as (lossy) UTF-8 text.

use anyhow::{bail, Context, Result};
use fortune_rag_core::models::RawDocument;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::extract::extract_docx;

/// A file selected for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Path relative to the ingestion root, `/`-separated.
    pub relative: String,
}

impl SourceFile {
    /// Stable document identity: the path as walked from the root.
    pub fn source(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }
}

pub fn scan_filesystem(config: &IngestConfig) -> Result<Vec<SourceFile>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Ingest root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/~$*".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        files.push(SourceFile {
            path: path.to_path_buf(),
            relative: rel_str,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.relative.cmp(&b.relative));

    Ok(files)
}

/// Load one file as a document.
///
/// Returns `Ok(None)` when no text could be extracted; the caller skips it.
pub fn read_document(file: &SourceFile) -> Result<Option<RawDocument>> {
    let bytes = std::fs::read(&file.path)
        .with_context(|| format!("Failed to read {}", file.path.display()))?;

    let text = if is_docx(&file.path) {
        extract_docx(&bytes).into_value()
    } else {
        Some(String::from_utf8_lossy(&bytes).into_owned())
    };

    match text {
        Some(text) if !text.trim().is_empty() => Ok(Some(RawDocument::new(file.source(), text))),
        _ => {
            warn!(stage = "scan", file = %file.relative, "no text extracted; skipping");
            Ok(None)
        }
    }
}

fn is_docx(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("docx"))
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
