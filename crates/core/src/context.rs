//! Retrieved context record
//!
//! The single output unit every retrieval strategy produces. Scores are
//! comparable only within one strategy invocation until fusion renormalizes
//! them onto [0, 1].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Recognized metadata keys.
///
/// Unknown keys are preserved on the record but nothing in the engine
/// relies on them.
pub mod meta {
    pub const TITLE: &str = "title";
    pub const URL: &str = "url";
    pub const TIMESTAMP: &str = "timestamp";
    pub const KEY: &str = "key";
    pub const PROJECT: &str = "project";
    pub const SEVERITY: &str = "severity";
    pub const SERVICE: &str = "service";
}

/// A single unit of retrieved evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedContext {
    /// Evidence text
    pub content: String,
    /// Free-form key/value metadata; see [`meta`] for recognized keys
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Producing strategy and collection, e.g. `bm25_bugs`, `web_tavily`
    pub source: String,
    /// Relevance in [0, 1] after normalization
    pub score: f32,
}

impl RetrievedContext {
    pub fn new(content: impl Into<String>, source: impl Into<String>, score: f32) -> Self {
        Self {
            content: content.into(),
            metadata: HashMap::new(),
            source: source.into(),
            score,
        }
    }

    /// Attach a metadata entry, builder style.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Ticket key carried in metadata, if any.
    pub fn ticket_key(&self) -> Option<&str> {
        self.metadata.get(meta::KEY).map(String::as_str)
    }

    /// Title carried in metadata, if any.
    pub fn title(&self) -> Option<&str> {
        self.metadata.get(meta::TITLE).map(String::as_str)
    }

    /// Ticket reference for the response's `relevant_tickets` list.
    pub fn ticket_ref(&self) -> Option<TicketRef> {
        self.ticket_key().map(|key| TicketRef {
            key: key.to_string(),
            title: self.title().unwrap_or_default().to_string(),
        })
    }
}

/// A `(key, title)` ticket reference extracted from retrieved contexts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRef {
    pub key: String,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_ref_from_metadata() {
        let ctx = RetrievedContext::new("body", "bm25_bugs", 0.8)
            .with_meta(meta::KEY, "HBASE-12345")
            .with_meta(meta::TITLE, "Region server timeout");

        let r = ctx.ticket_ref().unwrap();
        assert_eq!(r.key, "HBASE-12345");
        assert_eq!(r.title, "Region server timeout");
    }

    #[test]
    fn test_ticket_ref_absent_without_key() {
        let ctx = RetrievedContext::new("body", "web_tavily", 0.5)
            .with_meta(meta::URL, "https://example.com");
        assert!(ctx.ticket_ref().is_none());
    }

    #[test]
    fn test_unknown_metadata_preserved() {
        let ctx = RetrievedContext::new("body", "logs_gcp", 0.4).with_meta("trace_id", "abc123");
        assert_eq!(ctx.metadata.get("trace_id").unwrap(), "abc123");
    }
}
