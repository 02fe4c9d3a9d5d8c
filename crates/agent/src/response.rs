//! Response model
//!
//! The assembled per-request response object the HTTP surface serializes
//! verbatim. Field names are part of the external contract.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use ticket_rag_core::{QueryHints, RetrievedContext, TicketRef};

/// A progress/warning message attached to the response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AgentMessage {
    pub fn info(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: "info".to_string(),
        }
    }

    pub fn warning(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: "warning".to_string(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: "error".to_string(),
        }
    }
}

/// Retrieval facts echoed back to the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Strategy that produced the final contexts
    pub agent: String,
    pub num_results: usize,
    /// Retrieve-stage duration, seconds
    pub processing_time: f64,
    /// Lowercase strategy tag, e.g. `bm25`, `web`
    pub method_type: String,
    #[serde(default)]
    pub methods_used: Vec<String>,
    #[serde(default)]
    pub result_counts: HashMap<String, usize>,
    #[serde(default)]
    pub reranker_used: bool,
    #[serde(default)]
    pub keyword_index_used: bool,
    #[serde(default)]
    pub filters_applied: bool,
    /// Every strategy attempt, in order (original, then fallback)
    #[serde(default)]
    pub attempts: Vec<String>,
    #[serde(default)]
    pub fallback_used: bool,
    /// Per-stage durations, seconds
    #[serde(default)]
    pub stage_timings: HashMap<String, f64>,
}

/// The full response object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub query: String,
    pub final_answer: String,
    pub relevant_tickets: Vec<TicketRef>,
    pub routing_decision: String,
    pub routing_reasoning: String,
    pub retrieval_method: String,
    pub retrieved_contexts: Vec<RetrievedContext>,
    pub retrieval_metadata: ResponseMetadata,
    pub user_can_wait: bool,
    pub production_incident: bool,
    pub messages: Vec<AgentMessage>,
    /// ISO-8601 UTC, server generated
    pub timestamp: String,
    /// Seconds
    pub total_processing_time: f64,
}

impl AgentResponse {
    pub fn hints(&self) -> QueryHints {
        QueryHints {
            user_can_wait: self.user_can_wait,
            production_incident: self.production_incident,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_field_names() {
        let response = AgentResponse {
            query: "q".into(),
            final_answer: "a".into(),
            relevant_tickets: vec![TicketRef {
                key: "HBASE-1".into(),
                title: "t".into(),
            }],
            routing_decision: "BM25".into(),
            routing_reasoning: "rule 2".into(),
            retrieval_method: "BM25".into(),
            retrieved_contexts: vec![RetrievedContext::new("c", "bm25_bugs", 0.5)],
            retrieval_metadata: ResponseMetadata {
                agent: "BM25".into(),
                num_results: 1,
                method_type: "bm25".into(),
                ..Default::default()
            },
            user_can_wait: false,
            production_incident: true,
            messages: vec![AgentMessage::warning("degraded")],
            timestamp: "2024-05-01T00:00:00Z".into(),
            total_processing_time: 0.25,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["routing_decision"], "BM25");
        assert_eq!(json["relevant_tickets"][0]["key"], "HBASE-1");
        assert_eq!(json["messages"][0]["type"], "warning");
        assert_eq!(json["retrieval_metadata"]["num_results"], 1);
        assert!(json["total_processing_time"].is_number());
    }
}
