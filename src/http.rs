//! JSON-over-HTTP calls with retry and exponential backoff.
//!
//! Shared by every network provider (embeddings, reranking, generation):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use std::time::Duration;
use tracing::debug;

/// A configured endpoint for one provider.
#[derive(Debug, Clone)]
pub struct JsonEndpoint {
    client: reqwest::Client,
    url: String,
    bearer: Option<String>,
    max_retries: u32,
    /// Provider name used in error messages.
    label: &'static str,
}

impl JsonEndpoint {
    pub fn new(
        label: &'static str,
        url: impl Into<String>,
        bearer: Option<String>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            bearer,
            max_retries,
            label,
        })
    }

    /// POST `body` and return the parsed JSON response.
    pub async fn post(&self, body: &serde_json::Value) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(provider = self.label, attempt, ?delay, "retrying");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(token) = &self.bearer {
                request = request.header("Authorization", format!("Bearer {}", token));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "{} API error {}: {}",
                            self.label,
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("{} API error {}: {}", self.label, status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "{} connection error ({}): {}",
                        self.label,
                        self.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", self.label)))
    }
}

/// Read an API key from `api_key_env`, defaulting to `OPENAI_API_KEY`.
pub fn api_key(api_key_env: Option<&str>) -> Result<String> {
    let var = api_key_env.unwrap_or("OPENAI_API_KEY");
    std::env::var(var).map_err(|_| anyhow::anyhow!("{} environment variable not set", var))
}

/// Parse a JSON array of numbers into `f32`s.
pub fn f32_array(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid response: {} is not an array", what))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_array() {
        let v = serde_json::json!([1.0, 0.5, -2]);
        assert_eq!(f32_array(&v, "embedding").unwrap(), vec![1.0, 0.5, -2.0]);
        assert!(f32_array(&serde_json::json!({}), "embedding").is_err());
    }

    #[test]
    fn test_api_key_missing_var() {
        let err = api_key(Some("FORTUNE_TEST_SURELY_UNSET_KEY")).unwrap_err();
        assert!(err.to_string().contains("FORTUNE_TEST_SURELY_UNSET_KEY"));
    }

    #[tokio::test]
    async fn test_connection_error_after_retries() {
        // Nothing listens on port 9 (discard) on test machines.
        let endpoint = JsonEndpoint::new("Test", "http://127.0.0.1:9/none", None, 2, 0).unwrap();
        let err = endpoint.post(&serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Test connection error"));
    }
}
