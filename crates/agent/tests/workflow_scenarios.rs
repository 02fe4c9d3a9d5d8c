//! End-to-end workflow scenarios against stub back-ends
//!
//! Exercises the orchestrator's routing, timeout/fallback, and response
//! assembly without any network: strategies and the response model are
//! in-process stubs.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use ticket_rag_agent::{ResponseWriter, Supervisor, Workflow, WorkflowConfig};
use ticket_rag_core::{
    meta, Error, QueryHints, RetrievalMetadata, RetrievalStrategy, RetrievedContext, StrategyKind,
    StrategyOutput,
};
use ticket_rag_llm::{GenerationResult, LlmBackend, LlmError, Message};

struct StaticLlm(String);

#[async_trait]
impl LlmBackend for StaticLlm {
    async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult, LlmError> {
        Ok(GenerationResult {
            text: self.0.clone(),
            tokens: 0,
            total_time_ms: 1,
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        "static"
    }
}

enum Behavior {
    Return(Vec<RetrievedContext>, RetrievalMetadata),
    Sleep(Duration),
    Fail,
}

struct StubStrategy {
    kind: StrategyKind,
    behavior: Behavior,
}

impl StubStrategy {
    fn returning(kind: StrategyKind, contexts: Vec<RetrievedContext>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior: Behavior::Return(contexts, RetrievalMetadata::default()),
        })
    }

    fn with_metadata(
        kind: StrategyKind,
        contexts: Vec<RetrievedContext>,
        metadata: RetrievalMetadata,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior: Behavior::Return(contexts, metadata),
        })
    }

    fn sleeping(kind: StrategyKind, duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior: Behavior::Sleep(duration),
        })
    }

    fn failing(kind: StrategyKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior: Behavior::Fail,
        })
    }
}

#[async_trait]
impl RetrievalStrategy for StubStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn run(
        &self,
        _query: &str,
        _hints: &QueryHints,
        _k: usize,
    ) -> Result<StrategyOutput, Error> {
        match &self.behavior {
            Behavior::Return(contexts, metadata) => Ok(StrategyOutput {
                contexts: contexts.clone(),
                metadata: metadata.clone(),
            }),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(StrategyOutput::default())
            }
            Behavior::Fail => Err(Error::StrategyFailed("stub failure".to_string())),
        }
    }
}

fn ticket(key: &str, title: &str, source: &str, score: f32) -> RetrievedContext {
    RetrievedContext::new(format!("content for {key}"), source, score)
        .with_meta(meta::KEY, key)
        .with_meta(meta::TITLE, title)
}

fn hints(wait: bool, incident: bool) -> QueryHints {
    QueryHints {
        user_can_wait: wait,
        production_incident: incident,
    }
}

fn config() -> WorkflowConfig {
    WorkflowConfig {
        top_k: 10,
        bm25_timeout: Duration::from_millis(500),
        compression_timeout: Duration::from_millis(500),
        ensemble_timeout: Duration::from_millis(100),
        web_search_timeout: Duration::from_millis(500),
        log_search_timeout: Duration::from_millis(500),
        compose_budget: Duration::from_millis(500),
    }
}

fn workflow_with(
    strategies: Vec<Arc<StubStrategy>>,
    fallback: Arc<StubStrategy>,
    answer: &str,
) -> Workflow {
    let writer = ResponseWriter::new(Arc::new(StaticLlm(answer.to_string())));
    let mut workflow = Workflow::new(Supervisor::new(), writer, fallback, config());
    for strategy in strategies {
        workflow = workflow.with_strategy(strategy);
    }
    workflow
}

#[tokio::test]
async fn identifier_routing_selects_bm25() {
    let bm25 = StubStrategy::returning(
        StrategyKind::Bm25,
        vec![ticket("HBASE-12345", "Region server timeout", "bm25_bugs", 0.9)],
    );
    let fallback = StubStrategy::failing(StrategyKind::Compression);
    let workflow = workflow_with(
        vec![bm25],
        fallback,
        "HBASE-12345 tracks the region server timeout.",
    );

    let response = workflow
        .run("Why does HBASE-12345 time out?", hints(false, false), None)
        .await;

    assert_eq!(response.routing_decision, "BM25");
    assert!(response.routing_reasoning.contains("identifier"));
    assert!(response
        .retrieved_contexts
        .iter()
        .any(|c| c.source.starts_with("bm25_")));
    assert_eq!(response.relevant_tickets[0].key, "HBASE-12345");
}

#[tokio::test]
async fn outage_override_beats_patience_and_incident() {
    let web = StubStrategy::returning(
        StrategyKind::WebSearch,
        vec![RetrievedContext::new("GitHub reports degraded service", "web_tavily", 0.9)
            .with_meta(meta::URL, "https://status.github.com")],
    );
    let fallback = StubStrategy::failing(StrategyKind::Compression);
    let workflow = workflow_with(vec![web], fallback, "GitHub is reporting degraded service.");

    let response = workflow
        .run("Is GitHub down right now?", hints(true, true), None)
        .await;

    assert_eq!(response.routing_decision, "WebSearch");
    assert!(response.user_can_wait);
    assert!(response.production_incident);
}

#[tokio::test]
async fn urgent_default_routes_to_compression_within_budget() {
    let compression = StubStrategy::returning(
        StrategyKind::Compression,
        vec![ticket("AUTH-11", "Login service 500s", "compression_bugs", 0.8)],
    );
    let fallback = StubStrategy::failing(StrategyKind::Compression);
    let workflow = workflow_with(vec![compression], fallback, "Check AUTH-11 first.");

    let response = workflow
        .run("users cannot sign in", hints(false, true), None)
        .await;

    assert_eq!(response.routing_decision, "Compression");
    // total ≤ strategy timeout + compose budget
    assert!(response.total_processing_time <= 1.0);
    assert!(response.total_processing_time >= response.retrieval_metadata.processing_time);
}

#[tokio::test]
async fn patient_comprehensive_uses_ensemble_methods() {
    let mut metadata = RetrievalMetadata::default();
    metadata.record_method("multi_query", 4);
    metadata.record_method("compression", 5);
    metadata.record_method("keyword", 3);
    metadata.record_method("naive", 5);

    let ensemble = StubStrategy::with_metadata(
        StrategyKind::Ensemble,
        vec![ticket("SPRING-7", "OutOfMemoryError analysis", "ensemble_bugs", 0.7)],
        metadata,
    );
    let fallback = StubStrategy::failing(StrategyKind::Compression);
    let workflow = workflow_with(vec![ensemble], fallback, "See SPRING-7 for heap tuning.");

    let response = workflow
        .run(
            "common causes of OutOfMemoryError in Spring Framework",
            hints(true, false),
            None,
        )
        .await;

    assert_eq!(response.routing_decision, "Ensemble");
    let methods = &response.retrieval_metadata.methods_used;
    let known = ["multi_query", "compression", "keyword", "naive"];
    let present = known.iter().filter(|m| methods.contains(&m.to_string())).count();
    assert!(present >= 3, "expected at least 3 ensemble methods, got {methods:?}");
}

#[tokio::test]
async fn empty_result_is_success_with_explicit_answer() {
    let compression = StubStrategy::returning(StrategyKind::Compression, vec![]);
    let fallback = StubStrategy::failing(StrategyKind::Compression);
    let workflow = workflow_with(vec![compression], fallback, "unused");

    let response = workflow
        .run("how do I configure retries", hints(false, false), None)
        .await;

    assert!(response.retrieved_contexts.is_empty());
    assert!(response.relevant_tickets.is_empty());
    assert!(response.final_answer.contains("No relevant information"));
    assert!(response.final_answer.contains("Suggestions"));
}

#[tokio::test]
async fn timed_out_strategy_falls_back_to_compression() {
    // Ensemble budget is 100 ms in the test config; the stub sleeps 10 s.
    let ensemble = StubStrategy::sleeping(StrategyKind::Ensemble, Duration::from_secs(10));
    let fallback = StubStrategy::returning(
        StrategyKind::Compression,
        vec![ticket("CORE-3", "Fallback finding", "compression_bugs", 0.6)],
    );
    let workflow = workflow_with(vec![ensemble], fallback, "CORE-3 is the closest match.");

    let response = workflow
        .run("broad analysis please", hints(true, false), None)
        .await;

    assert_eq!(response.routing_decision, "Ensemble");
    assert_eq!(response.retrieval_method, "Compression (fallback)");
    assert!(response.retrieval_metadata.fallback_used);
    assert_eq!(
        response.retrieval_metadata.attempts,
        vec!["Ensemble".to_string(), "Compression (fallback)".to_string()]
    );
    assert!(response
        .messages
        .iter()
        .any(|m| m.kind == "warning" && m.content.contains("timed out")));
    assert_eq!(response.relevant_tickets[0].key, "CORE-3");
}

#[tokio::test]
async fn double_failure_still_composes_with_no_contexts() {
    let ensemble = StubStrategy::failing(StrategyKind::Ensemble);
    let fallback = StubStrategy::failing(StrategyKind::Compression);
    let workflow = workflow_with(vec![ensemble], fallback, "unused");

    let response = workflow
        .run("broad analysis please", hints(true, false), None)
        .await;

    assert!(response.retrieved_contexts.is_empty());
    assert!(response.final_answer.contains("No relevant information"));
    assert!(response.messages.iter().any(|m| m.kind == "error"));
    assert!(response.retrieval_metadata.fallback_used);
}

#[tokio::test]
async fn client_deadline_tightens_strategy_budget() {
    let ensemble = StubStrategy::sleeping(StrategyKind::Ensemble, Duration::from_secs(10));
    let fallback = StubStrategy::returning(StrategyKind::Compression, vec![]);
    let workflow = workflow_with(vec![ensemble], fallback, "unused");

    let started = std::time::Instant::now();
    let response = workflow
        .run(
            "broad analysis please",
            hints(true, false),
            Some(Duration::from_millis(50)),
        )
        .await;

    // Both attempts were bounded by the 50 ms client budget.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(response.retrieval_method, "Compression (fallback)");
}

#[tokio::test]
async fn prose_keys_always_appear_in_relevant_tickets() {
    let bm25 = StubStrategy::returning(
        StrategyKind::Bm25,
        vec![ticket("HBASE-12345", "Region server timeout", "bm25_bugs", 0.9)],
    );
    let fallback = StubStrategy::failing(StrategyKind::Compression);
    let workflow = workflow_with(
        vec![bm25],
        fallback,
        "HBASE-12345 and the unrelated KAFKA-1 both mention this.",
    );

    let response = workflow
        .run("Why does HBASE-12345 time out?", hints(false, false), None)
        .await;

    let keys: Vec<&str> = response
        .relevant_tickets
        .iter()
        .map(|t| t.key.as_str())
        .collect();
    assert!(keys.contains(&"HBASE-12345"));
    assert!(keys.contains(&"KAFKA-1"));
}
