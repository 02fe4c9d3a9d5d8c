//! Log store client
//!
//! Narrow interface over an external log store queried with a
//! filter-language expression: severity, payload pattern, time window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use ticket_rag_core::Error;

/// One matching log entry
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: String,
    pub service: String,
    pub payload: String,
}

/// A filter-language query: severity AND pattern AND window
#[derive(Debug, Clone)]
pub struct LogQueryFilter {
    pub severity: String,
    pub pattern: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl LogQueryFilter {
    /// Render to the store's filter language.
    pub fn to_filter_string(&self) -> String {
        format!(
            "severity = {} AND textPayload =~ \"{}\" AND timestamp >= \"{}\" AND timestamp <= \"{}\"",
            self.severity,
            self.pattern.replace('"', "\\\""),
            self.start.to_rfc3339(),
            self.end.to_rfc3339(),
        )
    }
}

/// External log store capability
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Store tag recorded in context sources (`logs_<store>`).
    fn name(&self) -> &str;

    async fn query(&self, filter: &LogQueryFilter, limit: usize)
        -> Result<Vec<LogEntry>, Error>;

    async fn ready(&self) -> bool;
}

/// HTTP log store configuration
#[derive(Debug, Clone)]
pub struct HttpLogStoreConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// Log store queried over an entries:list style HTTP API
pub struct HttpLogStore {
    config: HttpLogStoreConfig,
    client: Client,
}

impl HttpLogStore {
    pub fn new(config: HttpLogStoreConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Fatal(format!("failed to create log store client: {e}")))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl LogStore for HttpLogStore {
    fn name(&self) -> &str {
        "gcp"
    }

    async fn query(
        &self,
        filter: &LogQueryFilter,
        limit: usize,
    ) -> Result<Vec<LogEntry>, Error> {
        let url = format!(
            "{}/v2/entries:list",
            self.config.endpoint.trim_end_matches('/')
        );
        let request = ListEntriesRequest {
            filter: filter.to_filter_string(),
            page_size: limit,
            order_by: "timestamp desc".to_string(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::UpstreamTransient(format!("log query failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::UpstreamPermanent(format!("log store auth: {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamTransient(format!(
                "log store HTTP {status}: {body}"
            )));
        }

        let parsed: ListEntriesResponse = response
            .json()
            .await
            .map_err(|e| Error::Retrieval(format!("invalid log store response: {e}")))?;

        Ok(parsed
            .entries
            .into_iter()
            .map(|e| LogEntry {
                timestamp: e.timestamp,
                severity: e.severity,
                service: e
                    .resource
                    .and_then(|r| r.labels.get("service").cloned())
                    .unwrap_or_else(|| "unknown".to_string()),
                payload: e.text_payload,
            })
            .collect())
    }

    async fn ready(&self) -> bool {
        self.client
            .get(self.config.endpoint.trim_end_matches('/'))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }
}

#[derive(Debug, Serialize)]
struct ListEntriesRequest {
    filter: String,
    #[serde(rename = "pageSize")]
    page_size: usize,
    #[serde(rename = "orderBy")]
    order_by: String,
}

#[derive(Debug, Deserialize)]
struct ListEntriesResponse {
    #[serde(default)]
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    severity: String,
    #[serde(default, rename = "textPayload")]
    text_payload: String,
    #[serde(default)]
    resource: Option<RawResource>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(default)]
    labels: std::collections::HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_filter_string() {
        let filter = LogQueryFilter {
            severity: "ERROR".to_string(),
            pattern: "CertificateExpiredException".to_string(),
            start: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap(),
        };
        let rendered = filter.to_filter_string();
        assert!(rendered.starts_with("severity = ERROR AND textPayload =~ \"CertificateExpiredException\""));
        assert!(rendered.contains("timestamp >= \"2024-05-01T12:00:00+00:00\""));
    }

    #[test]
    fn test_filter_string_escapes_quotes() {
        let filter = LogQueryFilter {
            severity: "ERROR".to_string(),
            pattern: "failed \"badly\"".to_string(),
            start: Utc::now(),
            end: Utc::now(),
        };
        assert!(filter.to_filter_string().contains("failed \\\"badly\\\""));
    }

    #[test]
    fn test_entry_parse() {
        let body = r#"{"entries": [{
            "timestamp": "2024-05-01T12:30:00Z",
            "severity": "ERROR",
            "textPayload": "CertificateExpiredException: cert expired",
            "resource": {"labels": {"service": "gateway"}}
        }]}"#;
        let parsed: ListEntriesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].severity, "ERROR");
    }
}
