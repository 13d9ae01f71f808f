//! OpenAI-compatible `/embeddings` client used to embed expense descriptions and queries.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::TextEmbedder;

/// Connection settings for an OpenAI-compatible embeddings endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    /// Bearer token.
    pub api_key: String,
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Requested output width; must match the store dimension.
    pub dimensions: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Attempts before giving up on 429/5xx and transport errors.
    pub max_attempts: usize,
}

/// Blocking embeddings client.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    max_attempts: usize,
}

impl OpenAiEmbedder {
    /// Builds the client; fails on a blank key or model.
    pub fn new(settings: OpenAiSettings) -> Result<Self> {
        anyhow::ensure!(!settings.api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!settings.model.trim().is_empty(), "missing OpenAI model name");
        anyhow::ensure!(settings.dimensions > 0, "embedding dimension must be positive");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", settings.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", settings.base_url.trim_end_matches('/')),
            model: settings.model,
            dimensions: settings.dimensions,
            max_attempts: settings.max_attempts.max(1),
        })
    }

    fn request(&self, input: &str) -> Result<Vec<f32>> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let body = EmbeddingRequest {
                model: &self.model,
                input,
                dimensions: self.dimensions,
            };
            let failure = match self.client.post(&self.endpoint).json(&body).send() {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: EmbeddingResponse = resp
                        .json()
                        .context("failed to parse OpenAI embedding response")?;
                    let embedding = parsed
                        .data
                        .into_iter()
                        .next()
                        .map(|entry| entry.embedding)
                        .ok_or_else(|| anyhow!("OpenAI returned no embedding"))?;
                    anyhow::ensure!(
                        embedding.len() == self.dimensions,
                        "OpenAI returned {} dimensions, expected {}",
                        embedding.len(),
                        self.dimensions
                    );
                    return Ok(embedding);
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if !should_retry(status) || attempt >= self.max_attempts {
                        anyhow::bail!("OpenAI embeddings request failed ({status}): {text}");
                    }
                    status.to_string()
                }
                Err(err) => {
                    if !(err.is_timeout() || err.is_connect()) || attempt >= self.max_attempts {
                        return Err(err).context("OpenAI embeddings request failed");
                    }
                    err.to_string()
                }
            };
            let backoff = retry_backoff(attempt);
            warn!(attempt, backoff_ms = backoff.as_millis() as u64, %failure, "retrying embedding request");
            thread::sleep(backoff);
        }
    }
}

impl TextEmbedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        anyhow::ensure!(!text.trim().is_empty(), "cannot embed empty text");
        self.request(text)
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(250 * (1 << capped))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> OpenAiSettings {
        OpenAiSettings {
            api_key: "sk-test".to_string(),
            base_url: "https://api.openai.com/v1/".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            timeout: Duration::from_secs(5),
            max_attempts: 0,
        }
    }

    #[test]
    fn builds_endpoint_and_clamps_attempts() {
        let embedder = OpenAiEmbedder::new(settings()).expect("client");
        assert_eq!(embedder.endpoint, "https://api.openai.com/v1/embeddings");
        assert_eq!(embedder.max_attempts, 1);
    }

    #[test]
    fn rejects_blank_credentials() {
        let mut blank = settings();
        blank.api_key = "  ".to_string();
        assert!(OpenAiEmbedder::new(blank).is_err());
        assert!(OpenAiEmbedder::new(settings())
            .expect("client")
            .embed("   ")
            .is_err());
    }

    #[test]
    fn backoff_grows_then_caps() {
        assert_eq!(retry_backoff(1), Duration::from_millis(500));
        assert_eq!(retry_backoff(2), Duration::from_millis(1000));
        assert_eq!(retry_backoff(9), retry_backoff(5));
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(!should_retry(StatusCode::BAD_REQUEST));
    }
}
