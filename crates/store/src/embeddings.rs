//! Embedding client
//!
//! OpenAI-compatible embeddings over HTTP. Transient failures retry with
//! exponential backoff and full jitter; auth failures are permanent.

use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::StoreError;

/// Embedding client configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// Expected output dimension; mismatched responses are rejected
    pub dimension: usize,
    pub timeout: Duration,
    /// Inputs longer than this are invalid, not truncated
    pub max_input_chars: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            timeout: Duration::from_secs(10),
            max_input_chars: 32_000,
            max_retries: 3,
            backoff_base: Duration::from_millis(250),
            backoff_cap: Duration::from_secs(4),
        }
    }
}

impl EmbeddingConfig {
    pub fn from_settings(settings: &ticket_rag_config::EmbeddingSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            api_key: std::env::var(&settings.api_key_env).unwrap_or_default(),
            model: settings.model.clone(),
            dimension: settings.dimension,
            timeout: Duration::from_millis(settings.timeout_ms),
            max_input_chars: settings.max_input_chars,
            max_retries: settings.max_retries,
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            backoff_cap: Duration::from_millis(settings.backoff_cap_ms),
        }
    }
}

/// Shared, pool-backed embedding client
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    client: Client,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Backend(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| StoreError::Backend("provider returned no embedding".to_string()))
    }

    /// Embed a batch of texts, preserving order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        for text in texts {
            if text.trim().is_empty() {
                return Err(StoreError::InvalidInput("empty embedding input".to_string()));
            }
            if text.len() > self.config.max_input_chars {
                return Err(StoreError::InvalidInput(format!(
                    "embedding input of {} chars exceeds limit {}",
                    text.len(),
                    self.config.max_input_chars
                )));
            }
        }

        let start = std::time::Instant::now();
        metrics::counter!("embedding_requests_total").increment(1);

        let result = self.request_with_retry(texts).await;

        metrics::histogram!("embedding_request_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        if result.is_err() {
            metrics::counter!("embedding_request_errors_total").increment(1);
        }

        result
    }

    /// Quick readiness probe for /health.
    pub async fn ready(&self) -> bool {
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        self.client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn request_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                let delay = self.jittered_backoff(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "embedding request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }

            match self.request(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| StoreError::Transient("embedding retries exhausted".to_string())))
    }

    /// Full jitter: uniform over [0, min(cap, base · 2^attempt)].
    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let ceiling = exp.min(self.config.backoff_cap);
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..=ceiling.as_millis().max(1) as u64))
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        let url = format!("{}/embeddings", self.config.endpoint.trim_end_matches('/'));
        let body = EmbeddingRequest {
            model: self.config.model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StoreError::Transient("embedding request timed out".to_string())
                } else {
                    StoreError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("HTTP {status}: {body}")));
        }
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Transient(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!("HTTP {status}: {body}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("invalid embedding response: {e}")))?;

        let mut data = parsed.data;
        data.sort_by_key(|d| d.index);

        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

        if vectors.len() != texts.len() {
            return Err(StoreError::Backend(format!(
                "provider returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        for vector in &vectors {
            if vector.len() != self.config.dimension {
                return Err(StoreError::Backend(format!(
                    "embedding dimension {} does not match configured {}",
                    vector.len(),
                    self.config.dimension
                )));
            }
        }

        Ok(vectors)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
