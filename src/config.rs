//! TOML configuration.
//!
//! Every section except `[storage]` is optional and falls back to the
//! defaults below. [`load_config`] parses and validates; any invalid value
//! is a fatal error.

use anyhow::{Context, Result};
use fortune_rag_core::chunk::{ChunkParams, ChunkingParams};
use fortune_rag_core::compress::BudgetMode;
use fortune_rag_core::fusion::FusionParams;
use fortune_rag_core::pipeline::EngineParams;
use fortune_rag_core::retrieve::RetrievalParams;
use fortune_rag_core::store::{DEFAULT_PASSAGE_COLLECTION, DEFAULT_SUMMARY_COLLECTION};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name of the SQLite database inside `storage.root`.
pub const DB_FILE_NAME: &str = "fortune.sqlite";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub root: PathBuf,
    #[serde(default = "default_summary_collection")]
    pub summary_collection: String,
    #[serde(default = "default_passage_collection")]
    pub passage_collection: String,
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE_NAME)
    }
}

fn default_summary_collection() -> String {
    DEFAULT_SUMMARY_COLLECTION.to_string()
}
fn default_passage_collection() -> String {
    DEFAULT_PASSAGE_COLLECTION.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root: default_ingest_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_ingest_root() -> PathBuf {
    PathBuf::from("./data/raw")
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.docx".to_string(),
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_parent_size")]
    pub parent_size: usize,
    #[serde(default = "default_parent_overlap")]
    pub parent_overlap: usize,
    #[serde(default = "default_child_size")]
    pub child_size: usize,
    #[serde(default = "default_child_overlap")]
    pub child_overlap: usize,
    #[serde(default = "default_summary_chars")]
    pub summary_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            parent_size: default_parent_size(),
            parent_overlap: default_parent_overlap(),
            child_size: default_child_size(),
            child_overlap: default_child_overlap(),
            summary_chars: default_summary_chars(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkingParams {
        ChunkingParams {
            parent: ChunkParams {
                size: self.parent_size,
                overlap: self.parent_overlap,
            },
            child: ChunkParams {
                size: self.child_size,
                overlap: self.child_overlap,
            },
            summary_chars: self.summary_chars,
        }
    }
}

fn default_parent_size() -> usize {
    1800
}
fn default_parent_overlap() -> usize {
    200
}
fn default_child_size() -> usize {
    700
}
fn default_child_overlap() -> usize {
    120
}
fn default_summary_chars() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_coarse_k")]
    pub coarse_k: usize,
    #[serde(default = "default_fine_k")]
    pub fine_k: usize,
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    #[serde(default = "default_true")]
    pub expand_queries: bool,
    #[serde(default = "default_true")]
    pub lexical: bool,
    #[serde(default = "default_fetch_k_each")]
    pub fetch_k_each: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
    #[serde(default = "default_final_top_k")]
    pub final_top_k: usize,
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
    #[serde(default = "default_budget_chars")]
    pub budget_chars: usize,
    #[serde(default)]
    pub budget_mode: BudgetMode,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            coarse_k: default_coarse_k(),
            fine_k: default_fine_k(),
            max_queries: default_max_queries(),
            expand_queries: true,
            lexical: true,
            fetch_k_each: default_fetch_k_each(),
            rrf_k: default_rrf_k(),
            final_top_k: default_final_top_k(),
            rerank_top_n: default_rerank_top_n(),
            budget_chars: default_budget_chars(),
            budget_mode: BudgetMode::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl RetrievalConfig {
    pub fn engine_params(&self) -> EngineParams {
        EngineParams {
            retrieval: RetrievalParams {
                coarse_k: self.coarse_k,
                fine_k: self.fine_k,
            },
            fusion: FusionParams {
                rrf_k: self.rrf_k,
                final_top_k: self.final_top_k,
                fetch_k_each: self.fetch_k_each,
            },
            rerank_top_n: self.rerank_top_n,
            budget_chars: self.budget_chars,
            budget_mode: self.budget_mode,
        }
    }
}

fn default_coarse_k() -> usize {
    3
}
fn default_fine_k() -> usize {
    10
}
fn default_max_queries() -> usize {
    4
}
fn default_true() -> bool {
    true
}
fn default_fetch_k_each() -> usize {
    20
}
fn default_rrf_k() -> usize {
    60
}
fn default_final_top_k() -> usize {
    8
}
fn default_rerank_top_n() -> usize {
    3
}
fn default_budget_chars() -> usize {
    1600
}
fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for `openai` (default `https://api.openai.com/v1`) or
    /// `ollama` (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Endpoint for `http`: POST `{url}` with `{query, documents}`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            api_key_env: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            api_key_env: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.2
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.storage.summary_collection.trim().is_empty()
        || config.storage.passage_collection.trim().is_empty()
    {
        anyhow::bail!("storage collection names must not be empty");
    }
    if config.storage.summary_collection == config.storage.passage_collection {
        anyhow::bail!("storage.summary_collection and storage.passage_collection must differ");
    }

    // Validate chunking
    config
        .chunking
        .params()
        .validate()
        .context("Invalid [chunking] section")?;

    // Validate retrieval
    config
        .retrieval
        .engine_params()
        .validate()
        .context("Invalid [retrieval] section")?;
    if config.retrieval.max_queries == 0 {
        anyhow::bail!("retrieval.max_queries must be >= 1");
    }
    if config.retrieval.request_timeout_secs == 0 {
        anyhow::bail!("retrieval.request_timeout_secs must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if matches!(config.embedding.provider.as_str(), "openai" | "ollama")
            && config.embedding.model.is_none()
        {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    match config.rerank.provider.as_str() {
        "disabled" | "local" => {}
        "http" => {
            if config.rerank.url.is_none() {
                anyhow::bail!("rerank.url must be specified when provider is 'http'");
            }
        }
        other => anyhow::bail!(
            "Unknown rerank provider: '{}'. Must be disabled, http, or local.",
            other
        ),
    }

    match config.generation.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.generation.model.is_none() {
                anyhow::bail!("generation.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}
