//! Back-end health reporting
//!
//! /health reports liveness plus readiness per back-end client. A back-end
//! marked unready reduces the engine to the strategies that do not require
//! it; the strategy list in the report reflects that.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use ticket_rag_agent::Workflow;
use ticket_rag_llm::LlmTiers;
use ticket_rag_retrieval::{LogStore, WebSearchProvider};
use ticket_rag_store::{EmbeddingClient, TicketStore};

/// Serialized health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub backends: BTreeMap<String, bool>,
    pub strategies: BTreeMap<String, bool>,
}

/// Probes every long-lived client
pub struct HealthRegistry {
    embedder: Arc<EmbeddingClient>,
    store: Arc<TicketStore>,
    web: Arc<dyn WebSearchProvider>,
    logs: Arc<dyn LogStore>,
    llm: LlmTiers,
}

impl HealthRegistry {
    pub fn new(
        embedder: Arc<EmbeddingClient>,
        store: Arc<TicketStore>,
        web: Arc<dyn WebSearchProvider>,
        logs: Arc<dyn LogStore>,
        llm: LlmTiers,
    ) -> Self {
        Self {
            embedder,
            store,
            web,
            logs,
            llm,
        }
    }

    pub async fn report(&self, workflow: &Workflow) -> HealthReport {
        let mut backends = BTreeMap::new();
        backends.insert("embedder".to_string(), self.embedder.ready().await);
        for (name, ready) in self.store.backend_readiness().await {
            backends.insert(format!("ticket_store_{name}"), ready);
        }
        backends.insert(
            format!("web_{}", self.web.name()),
            self.web.ready().await,
        );
        backends.insert(
            format!("logs_{}", self.logs.name()),
            self.logs.ready().await,
        );
        backends.insert("llm_fast".to_string(), self.llm.fast.is_available().await);
        backends.insert(
            "llm_strong".to_string(),
            self.llm.strong.is_available().await,
        );

        let mut strategies = BTreeMap::new();
        for (kind, ready) in workflow.strategy_readiness().await {
            strategies.insert(kind.as_str().to_string(), ready);
        }

        let status = if strategies.values().any(|ready| *ready) {
            "ok"
        } else {
            "degraded"
        };

        HealthReport {
            status,
            backends,
            strategies,
        }
    }
}
