//! Pluggable reranker
//!
//! A dedicated relevance scorer that reorders a candidate set and assigns
//! new scores in [0, 1]. The contextual-compression strategy treats the
//! reranker as optional: absence or failure falls through to raw vector
//! ordering with a warning.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use ticket_rag_core::{Error, RetrievedContext};

/// Reranker contract: reordered docs with new scores in [0, 1]
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    async fn rerank(
        &self,
        query: &str,
        docs: Vec<RetrievedContext>,
        k: usize,
    ) -> Result<Vec<RetrievedContext>, Error>;
}

/// HTTP cross-encoder client configuration
#[derive(Debug, Clone)]
pub struct HttpRerankerConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

/// Cross-encoder rerank endpoint client (Cohere-style API shape)
pub struct HttpReranker {
    config: HttpRerankerConfig,
    client: Client,
}

impl HttpReranker {
    pub fn new(config: HttpRerankerConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Fatal(format!("failed to create reranker client: {e}")))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn rerank(
        &self,
        query: &str,
        docs: Vec<RetrievedContext>,
        k: usize,
    ) -> Result<Vec<RetrievedContext>, Error> {
        if docs.is_empty() {
            return Ok(docs);
        }

        let request = RerankRequest {
            model: self.config.model.clone(),
            query: query.to_string(),
            documents: docs.iter().map(|d| d.content.clone()).collect(),
            top_n: k,
        };

        let url = format!("{}/rerank", self.config.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::UpstreamTransient(format!("rerank request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::UpstreamPermanent(format!("reranker auth: {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamTransient(format!(
                "reranker HTTP {status}: {body}"
            )));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| Error::Retrieval(format!("invalid rerank response: {e}")))?;

        // The reranker's score replaces the vector score.
        let mut out = Vec::with_capacity(parsed.results.len().min(k));
        for result in parsed.results.into_iter().take(k) {
            if let Some(doc) = docs.get(result.index) {
                let mut doc = doc.clone();
                doc.score = result.relevance_score.clamp(0.0, 1.0);
                out.push(doc);
            }
        }

        Ok(out)
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest {
    model: String,
    query: String,
    documents: Vec<String>,
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = RerankRequest {
            model: "rerank-english-v3.0".to_string(),
            query: "timeout".to_string(),
            documents: vec!["doc a".to_string(), "doc b".to_string()],
            top_n: 2,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("top_n"));
        assert!(json.contains("doc b"));
    }

    #[test]
    fn test_response_parse() {
        let body = r#"{"results": [{"index": 1, "relevance_score": 0.92}, {"index": 0, "relevance_score": 0.4}]}"#;
        let parsed: RerankResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].index, 1);
    }
}
