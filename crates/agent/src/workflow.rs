//! Workflow orchestrator
//!
//! Owns the request state machine: SupervisorDecide → Retrieve → Compose,
//! with Cancel/Timeout as a parallel terminal. The chosen strategy runs
//! under its configured budget (the stricter of it and any client
//! deadline); on timeout or hard failure the orchestrator falls back to a
//! degraded Compression pass exactly once, and composes over an empty
//! context list if the fallback fails too. Retrieval-confined failures
//! never escape as request errors.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ticket_rag_core::{
    topk, Error, QueryHints, QueryPlan, RetrievalMetadata, RetrievalStrategy, RetrievedContext,
    StrategyKind, StrategyOutput,
};
use ticket_rag_config::WorkflowSettings;

use crate::response::{AgentMessage, AgentResponse, ResponseMetadata};
use crate::supervisor::Supervisor;
use crate::writer::{ComposedAnswer, ResponseWriter};

/// Orchestrator budgets
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub top_k: usize,
    pub bm25_timeout: Duration,
    pub compression_timeout: Duration,
    pub ensemble_timeout: Duration,
    pub web_search_timeout: Duration,
    pub log_search_timeout: Duration,
    pub compose_budget: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            bm25_timeout: Duration::from_secs(5),
            compression_timeout: Duration::from_secs(10),
            ensemble_timeout: Duration::from_secs(30),
            web_search_timeout: Duration::from_secs(20),
            log_search_timeout: Duration::from_secs(20),
            compose_budget: Duration::from_secs(5),
        }
    }
}

impl WorkflowConfig {
    pub fn from_settings(settings: &WorkflowSettings, top_k: usize) -> Self {
        Self {
            top_k,
            bm25_timeout: Duration::from_millis(settings.bm25_timeout_ms),
            compression_timeout: Duration::from_millis(settings.compression_timeout_ms),
            ensemble_timeout: Duration::from_millis(settings.ensemble_timeout_ms),
            web_search_timeout: Duration::from_millis(settings.web_search_timeout_ms),
            log_search_timeout: Duration::from_millis(settings.log_search_timeout_ms),
            compose_budget: Duration::from_millis(settings.compose_budget_ms),
        }
    }

    pub fn timeout_for(&self, kind: StrategyKind) -> Duration {
        match kind {
            StrategyKind::Bm25 => self.bm25_timeout,
            StrategyKind::Compression => self.compression_timeout,
            StrategyKind::Ensemble => self.ensemble_timeout,
            StrategyKind::WebSearch => self.web_search_timeout,
            StrategyKind::LogSearch => self.log_search_timeout,
        }
    }
}

/// What one strategy attempt produced
enum AttemptOutcome {
    Success(StrategyOutput),
    TimedOut(Duration),
    Failed(Error),
}

/// The per-request driver; shared across requests behind `Arc`
pub struct Workflow {
    supervisor: Supervisor,
    writer: ResponseWriter,
    strategies: HashMap<StrategyKind, Arc<dyn RetrievalStrategy>>,
    /// The degraded (no-rerank) Compression pass used for fallback
    fallback: Arc<dyn RetrievalStrategy>,
    config: WorkflowConfig,
}

impl Workflow {
    pub fn new(
        supervisor: Supervisor,
        writer: ResponseWriter,
        fallback: Arc<dyn RetrievalStrategy>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            supervisor,
            writer,
            strategies: HashMap::new(),
            fallback,
            config,
        }
    }

    /// Register a strategy under its own kind.
    pub fn with_strategy(mut self, strategy: Arc<dyn RetrievalStrategy>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    /// Readiness per registered strategy, for /health.
    pub async fn strategy_readiness(&self) -> Vec<(StrategyKind, bool)> {
        let mut out = Vec::with_capacity(self.strategies.len());
        for (kind, strategy) in &self.strategies {
            out.push((*kind, strategy.ready().await));
        }
        out.sort_by_key(|(kind, _)| kind.as_str());
        out
    }

    /// True when at least one registered strategy can serve requests.
    pub async fn any_strategy_ready(&self) -> bool {
        for strategy in self.strategies.values() {
            if strategy.ready().await {
                return true;
            }
        }
        false
    }

    /// Supervisor decision only, for the routing debug endpoint.
    pub async fn route_only(&self, query: &str, hints: &QueryHints) -> QueryPlan {
        self.supervisor.decide(query, hints).await
    }

    /// Drive one request end to end.
    ///
    /// `client_deadline` is the caller-supplied budget; the stricter of it
    /// and the per-stage budget applies at each stage.
    pub async fn run(
        &self,
        query: &str,
        hints: QueryHints,
        client_deadline: Option<Duration>,
    ) -> AgentResponse {
        let started = Instant::now();
        let timestamp = Utc::now();
        let mut stage_timings: HashMap<String, f64> = HashMap::new();
        let mut messages: Vec<AgentMessage> = Vec::new();

        // Stage 1: SupervisorDecide
        let stage_start = Instant::now();
        let plan = self.supervisor.decide(query, &hints).await;
        stage_timings.insert(
            "supervisor".to_string(),
            stage_start.elapsed().as_secs_f64(),
        );
        tracing::info!(
            strategy = %plan.strategy,
            rationale = %plan.rationale,
            "supervisor decision"
        );
        metrics::counter!("workflow_requests_total", "strategy" => plan.strategy.as_str())
            .increment(1);

        // Stage 2: Retrieve, with one degraded-Compression fallback
        let stage_start = Instant::now();
        let (contexts, metadata, retrieval_method, attempts) = self
            .retrieve(query, &hints, &plan, client_deadline, &mut messages)
            .await;
        let retrieve_secs = stage_start.elapsed().as_secs_f64();
        stage_timings.insert("retrieve".to_string(), retrieve_secs);

        // Stage 3: Compose under its own budget
        let stage_start = Instant::now();
        let compose_budget = strictest(
            self.config.compose_budget,
            client_deadline.map(|d| d.saturating_sub(started.elapsed())),
        );
        let composed = match tokio::time::timeout(
            compose_budget,
            self.writer.compose(query, plan.strategy, &hints, &contexts),
        )
        .await
        {
            Ok(composed) => composed,
            Err(_) => {
                messages.push(AgentMessage::warning(
                    "compose budget expired, returning extractive answer",
                ));
                if contexts.is_empty() {
                    ResponseWriter::no_results(query)
                } else {
                    ResponseWriter::extractive(query, &contexts)
                }
            }
        };
        stage_timings.insert("compose".to_string(), stage_start.elapsed().as_secs_f64());

        let total = started.elapsed().as_secs_f64();
        metrics::histogram!("workflow_duration_seconds", "strategy" => plan.strategy.as_str())
            .record(total);

        self.assemble(
            query,
            hints,
            plan,
            contexts,
            metadata,
            retrieval_method,
            attempts,
            composed,
            messages,
            stage_timings,
            retrieve_secs,
            timestamp,
            total,
        )
    }

    async fn run_strategy(
        &self,
        strategy: &Arc<dyn RetrievalStrategy>,
        query: &str,
        hints: &QueryHints,
        budget: Duration,
    ) -> AttemptOutcome {
        match tokio::time::timeout(budget, strategy.run(query, hints, self.config.top_k)).await {
            Ok(Ok(output)) => AttemptOutcome::Success(output),
            Ok(Err(e)) => AttemptOutcome::Failed(e),
            Err(_) => AttemptOutcome::TimedOut(budget),
        }
    }

    async fn retrieve(
        &self,
        query: &str,
        hints: &QueryHints,
        plan: &QueryPlan,
        client_deadline: Option<Duration>,
        messages: &mut Vec<AgentMessage>,
    ) -> (
        Vec<RetrievedContext>,
        RetrievalMetadata,
        String,
        Vec<String>,
    ) {
        let mut attempts = Vec::new();
        let budget = strictest(self.config.timeout_for(plan.strategy), client_deadline);

        let primary = match self.strategies.get(&plan.strategy) {
            Some(strategy) => {
                attempts.push(plan.strategy.as_str().to_string());
                self.run_strategy(strategy, query, hints, budget).await
            }
            None => {
                attempts.push(plan.strategy.as_str().to_string());
                AttemptOutcome::Failed(Error::StrategyFailed(format!(
                    "strategy {} is not available",
                    plan.strategy
                )))
            }
        };

        match primary {
            AttemptOutcome::Success(output) => {
                for warning in &output.metadata.warnings {
                    messages.push(AgentMessage::warning(warning.clone()));
                }
                (
                    output.contexts,
                    output.metadata,
                    plan.strategy.as_str().to_string(),
                    attempts,
                )
            }
            outcome => {
                let reason = match outcome {
                    AttemptOutcome::TimedOut(budget) => {
                        format!("{} timed out after {:?}", plan.strategy, budget)
                    }
                    AttemptOutcome::Failed(e) => format!("{} failed: {e}", plan.strategy),
                    AttemptOutcome::Success(_) => unreachable!(),
                };
                tracing::warn!(reason = %reason, "strategy attempt failed, falling back");
                messages.push(AgentMessage::warning(reason.clone()));
                metrics::counter!("workflow_fallbacks_total").increment(1);

                // Single fallback: degraded Compression, even when the
                // original choice was Compression.
                attempts.push("Compression (fallback)".to_string());
                let fallback_budget = strictest(self.config.compression_timeout, client_deadline);
                match self
                    .run_strategy(&self.fallback, query, hints, fallback_budget)
                    .await
                {
                    AttemptOutcome::Success(output) => {
                        for warning in &output.metadata.warnings {
                            messages.push(AgentMessage::warning(warning.clone()));
                        }
                        let mut metadata = output.metadata;
                        metadata.warn(reason);
                        (
                            output.contexts,
                            metadata,
                            "Compression (fallback)".to_string(),
                            attempts,
                        )
                    }
                    AttemptOutcome::TimedOut(budget) => {
                        let message =
                            format!("fallback compression timed out after {budget:?}");
                        tracing::error!("{message}; composing with no contexts");
                        messages.push(AgentMessage::error(message.clone()));
                        let mut metadata = RetrievalMetadata::default();
                        metadata.warn(reason);
                        metadata.warn(message);
                        (
                            Vec::new(),
                            metadata,
                            "Compression (fallback)".to_string(),
                            attempts,
                        )
                    }
                    AttemptOutcome::Failed(e) => {
                        let message = format!("fallback compression failed: {e}");
                        tracing::error!("{message}; composing with no contexts");
                        messages.push(AgentMessage::error(message.clone()));
                        let mut metadata = RetrievalMetadata::default();
                        metadata.warn(reason);
                        metadata.warn(message);
                        (
                            Vec::new(),
                            metadata,
                            "Compression (fallback)".to_string(),
                            attempts,
                        )
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        query: &str,
        hints: QueryHints,
        plan: QueryPlan,
        contexts: Vec<RetrievedContext>,
        metadata: RetrievalMetadata,
        retrieval_method: String,
        attempts: Vec<String>,
        composed: ComposedAnswer,
        messages: Vec<AgentMessage>,
        stage_timings: HashMap<String, f64>,
        retrieve_secs: f64,
        timestamp: chrono::DateTime<Utc>,
        total: f64,
    ) -> AgentResponse {
        let capped = topk(contexts, self.config.top_k);
        let fallback_used = attempts.len() > 1;

        AgentResponse {
            query: query.to_string(),
            final_answer: composed.answer,
            relevant_tickets: composed.references,
            routing_decision: plan.strategy.as_str().to_string(),
            routing_reasoning: plan.rationale,
            retrieval_method,
            retrieval_metadata: ResponseMetadata {
                agent: plan.strategy.as_str().to_string(),
                num_results: capped.len(),
                processing_time: retrieve_secs,
                method_type: plan.strategy.tag().to_string(),
                methods_used: metadata.methods_used,
                result_counts: metadata.result_counts,
                reranker_used: metadata.reranker_used,
                keyword_index_used: metadata.keyword_index_used,
                filters_applied: metadata.filters_applied,
                attempts,
                fallback_used,
                stage_timings,
            },
            retrieved_contexts: capped,
            user_can_wait: hints.user_can_wait,
            production_incident: hints.production_incident,
            messages,
            timestamp: timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            total_processing_time: total,
        }
    }
}

/// The stricter of a stage budget and an optional client budget.
fn strictest(stage: Duration, client: Option<Duration>) -> Duration {
    match client {
        Some(client) => stage.min(client),
        None => stage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_table() {
        let config = WorkflowConfig::default();
        assert_eq!(config.timeout_for(StrategyKind::Bm25), Duration::from_secs(5));
        assert_eq!(
            config.timeout_for(StrategyKind::Ensemble),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.timeout_for(StrategyKind::WebSearch),
            Duration::from_secs(20)
        );
    }

    #[test]
    fn test_strictest_deadline() {
        assert_eq!(
            strictest(Duration::from_secs(10), Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            strictest(Duration::from_secs(10), None),
            Duration::from_secs(10)
        );
    }
}
