//! Web search provider
//!
//! Narrow interface over an external keyword-search API, plus the Tavily
//! client implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use ticket_rag_core::Error;

/// One provider hit
#[derive(Debug, Clone)]
pub struct WebHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Provider-assigned relevance, when supplied
    pub score: Option<f32>,
    pub timestamp: Option<String>,
}

/// External web-search capability
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    /// Provider tag recorded in context sources (`web_<provider>`).
    fn name(&self) -> &str;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebHit>, Error>;

    async fn ready(&self) -> bool;
}

/// Tavily client configuration
#[derive(Debug, Clone)]
pub struct TavilyConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// Tavily search API client
pub struct TavilyClient {
    config: TavilyConfig,
    client: Client,
}

impl TavilyClient {
    pub fn new(config: TavilyConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Fatal(format!("failed to create web search client: {e}")))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl WebSearchProvider for TavilyClient {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebHit>, Error> {
        let url = format!("{}/search", self.config.endpoint.trim_end_matches('/'));
        let request = TavilyRequest {
            api_key: self.config.api_key.clone(),
            query: query.to_string(),
            max_results,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::UpstreamTransient(format!("web search request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::UpstreamPermanent(format!("web search auth: {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamTransient(format!(
                "web search HTTP {status}: {body}"
            )));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| Error::Retrieval(format!("invalid web search response: {e}")))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| WebHit {
                title: r.title,
                url: r.url,
                snippet: r.content,
                score: r.score,
                timestamp: r.published_date,
            })
            .collect())
    }

    async fn ready(&self) -> bool {
        // Providers expose no cheap health route; reachability is enough.
        self.client
            .get(self.config.endpoint.trim_end_matches('/'))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest {
    api_key: String,
    query: String,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    published_date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parse() {
        let body = r#"{"results": [
            {"title": "GitHub Status", "url": "https://status.github.com", "content": "All systems operational", "score": 0.97},
            {"title": "Outage report", "url": "https://example.com/outage", "content": "..."}
        ]}"#;
        let parsed: TavilyResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results.len(), 2);
        assert_eq!(parsed.results[0].score, Some(0.97));
        assert!(parsed.results[1].score.is_none());
    }

    #[test]
    fn test_empty_response_tolerated() {
        let parsed: TavilyResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.results.is_empty());
    }
}
