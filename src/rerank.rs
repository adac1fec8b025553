//! Cross-encoder implementations.
//!
//! - `http`: any Cohere/Jina-style `/rerank` endpoint. Request
//!   `{model, query, documents}`, response
//!   `{"results": [{"index": i, "relevance_score": s}, ...]}`.
//! - `local`: fastembed `TextRerank` (default `bge-reranker-base`),
//!   behind the `local-models` feature.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use fortune_rag_core::rerank::CrossEncoder;

use crate::config::RerankConfig;
use crate::http::{api_key, JsonEndpoint};

pub struct HttpReranker {
    model: Option<String>,
    endpoint: JsonEndpoint,
}

impl HttpReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("rerank.url required for http provider"))?;
        let bearer = match &config.api_key_env {
            Some(var) => Some(api_key(Some(var))?),
            None => None,
        };
        Ok(Self {
            model: config.model.clone(),
            endpoint: JsonEndpoint::new(
                "Rerank",
                url,
                bearer,
                config.timeout_secs,
                config.max_retries,
            )?,
        })
    }
}

#[async_trait]
impl CrossEncoder for HttpReranker {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let mut body = serde_json::json!({
            "query": query,
            "documents": texts,
        });
        if let Some(model) = &self.model {
            body["model"] = serde_json::json!(model);
        }
        parse_rerank_response(&self.endpoint.post(&body).await?, texts.len())
    }
}

/// Map `results[].{index, relevance_score}` back to input order.
pub fn parse_rerank_response(json: &serde_json::Value, expected: usize) -> Result<Vec<f32>> {
    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing results array"))?;

    let mut scores: Vec<Option<f32>> = vec![None; expected];
    for item in results {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing index"))?
            as usize;
        let score = item
            .get("relevance_score")
            .or_else(|| item.get("score"))
            .and_then(|s| s.as_f64())
            .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing relevance_score"))?;
        match scores.get_mut(index) {
            Some(slot) => *slot = Some(score as f32),
            None => bail!("Invalid rerank response: index {} out of range", index),
        }
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| anyhow::anyhow!("Rerank response has no score for document {}", i)))
        .collect()
}

#[cfg(feature = "local-models")]
pub use local::LocalReranker;

#[cfg(feature = "local-models")]
mod local {
    use std::sync::{Arc, Mutex};

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
    use fortune_rag_core::rerank::CrossEncoder;

    use crate::config::RerankConfig;

    fn resolve_model(name: &str) -> Result<RerankerModel> {
        match name {
            "bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
            "bge-reranker-v2-m3" => Ok(RerankerModel::BGERerankerV2M3),
            "jina-reranker-v2-base-multilingual" => {
                Ok(RerankerModel::JINARerankerV2BaseMultiligual)
            }
            other => bail!(
                "Unknown local rerank model: '{}'. Supported models: \
                 bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v2-base-multilingual",
                other
            ),
        }
    }

    pub struct LocalReranker {
        model: RerankerModel,
        loaded: Arc<Mutex<Option<TextRerank>>>,
    }

    impl LocalReranker {
        pub fn new(config: &RerankConfig) -> Result<Self> {
            let name = config.model.as_deref().unwrap_or("bge-reranker-base");
            Ok(Self {
                model: resolve_model(name)?,
                loaded: Arc::new(Mutex::new(None)),
            })
        }
    }

    #[async_trait]
    impl CrossEncoder for LocalReranker {
        async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
            let loaded = Arc::clone(&self.loaded);
            let model = self.model.clone();
            let query = query.to_string();
            let texts = texts.to_vec();
            let expected = texts.len();

            tokio::task::spawn_blocking(move || {
                let mut guard = loaded
                    .lock()
                    .map_err(|_| anyhow::anyhow!("local rerank model lock poisoned"))?;
                if guard.is_none() {
                    let reranker = TextRerank::try_new(
                        RerankInitOptions::new(model).with_show_download_progress(true),
                    )
                    .map_err(|e| anyhow::anyhow!("Failed to initialize local rerank model: {}", e))?;
                    *guard = Some(reranker);
                }
                let Some(reranker) = guard.as_mut() else {
                    bail!("local rerank model not loaded");
                };
                let results = reranker
                    .rerank(query, texts, false, None)
                    .map_err(|e| anyhow::anyhow!("Local rerank failed: {}", e))?;

                let mut scores = vec![f32::NEG_INFINITY; expected];
                for r in results {
                    if let Some(slot) = scores.get_mut(r.index) {
                        *slot = r.score;
                    }
                }
                Ok(scores)
            })
            .await?
        }
    }
}

/// Build the cross-encoder named by `rerank.provider`, or `None` when
/// disabled.
pub fn create_cross_encoder(config: &RerankConfig) -> Result<Option<Arc<dyn CrossEncoder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "http" => Ok(Some(Arc::new(HttpReranker::new(config)?))),
        #[cfg(feature = "local-models")]
        "local" => Ok(Some(Arc::new(LocalReranker::new(config)?))),
        #[cfg(not(feature = "local-models"))]
        "local" => bail!("Local rerank provider requires --features local-models"),
        other => bail!("Unknown rerank provider: {}", other),
    }
}
