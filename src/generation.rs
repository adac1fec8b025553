//! Text generation for query expansion.
//!
//! Only OpenAI-compatible `/chat/completions` endpoints are supported. The
//! generator is used solely to rewrite questions into retrieval queries;
//! answer generation is left to the caller.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use fortune_rag_core::expand::TextGenerator;

use crate::config::GenerationConfig;
use crate::http::{api_key, JsonEndpoint};

pub struct OpenAIChatGenerator {
    model: String,
    temperature: f32,
    endpoint: JsonEndpoint,
}

impl OpenAIChatGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for openai provider"))?;
        let key = api_key(config.api_key_env.as_deref())?;
        let base = config
            .url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/');

        Ok(Self {
            model,
            temperature: config.temperature,
            endpoint: JsonEndpoint::new(
                "OpenAI",
                format!("{}/chat/completions", base),
                Some(key),
                config.timeout_secs,
                config.max_retries,
            )?,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAIChatGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        parse_chat_response(&self.endpoint.post(&body).await?)
    }
}

pub fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}

/// Build the generator named by `generation.provider`, or `None` when
/// disabled.
pub fn create_generator(config: &GenerationConfig) -> Result<Option<Arc<dyn TextGenerator>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAIChatGenerator::new(config)?))),
        other => bail!("Unknown generation provider: {}", other),
    }
}
