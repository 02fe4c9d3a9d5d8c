//! Web-search strategy
//!
//! Planner phase: the fast model classifies the query and emits up to
//! `max_searches` refined search strings. Malformed plans get one stricter
//! retry, then the documented default plan. Execution phase: planned
//! searches dispatch concurrently under a bounded fan-out and an overall
//! deadline; this strategy opts into returning partial results collected
//! before the deadline.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ticket_rag_core::{
    meta, topk, Error, QueryHints, RetrievalMetadata, RetrievalStrategy, RetrievedContext,
    StrategyKind, StrategyOutput,
};
use ticket_rag_llm::{extract_json, LlmBackend, Message};

use crate::websearch::WebSearchProvider;

/// Query classification emitted by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebClassification {
    StatusCheck,
    Troubleshooting,
    General,
}

/// Planner priority tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanPriority {
    Urgent,
    Normal,
}

/// The planner's structured output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebPlan {
    pub classification: WebClassification,
    pub priority: PlanPriority,
    pub searches: Vec<String>,
}

impl WebPlan {
    /// Documented fallback when planning fails twice.
    pub fn fallback(query: &str) -> Self {
        Self {
            classification: WebClassification::General,
            priority: PlanPriority::Normal,
            searches: vec![query.to_string()],
        }
    }
}

/// Strategy configuration
#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    pub max_searches: usize,
    pub fanout: usize,
    pub timeout: Duration,
    pub max_results: usize,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            max_searches: 5,
            fanout: 3,
            timeout: Duration::from_secs(20),
            max_results: 10,
        }
    }
}

/// LLM-planned multi-query web search
#[derive(Clone)]
pub struct WebSearchStrategy {
    provider: Arc<dyn WebSearchProvider>,
    llm: Arc<dyn LlmBackend>,
    config: WebSearchConfig,
}

impl WebSearchStrategy {
    pub fn new(
        provider: Arc<dyn WebSearchProvider>,
        llm: Arc<dyn LlmBackend>,
        config: WebSearchConfig,
    ) -> Self {
        Self {
            provider,
            llm,
            config,
        }
    }

    fn plan_prompt(&self, query: &str, hints: &QueryHints, strict: bool) -> Vec<Message> {
        let mut system = format!(
            "You plan web searches for an engineering support assistant. Respond with ONLY a \
             JSON object of the form {{\"classification\": \"status_check|troubleshooting|general\", \
             \"priority\": \"urgent|normal\", \"searches\": [\"...\"]}} with at most {} searches.",
            self.config.max_searches
        );
        if strict {
            system.push_str(" Output the JSON object with no code fences, prose, or comments.");
        }

        vec![
            Message::system(system),
            Message::user(format!(
                "Query: {query}\nproduction_incident: {}\nuser_can_wait: {}",
                hints.production_incident, hints.user_can_wait
            )),
        ]
    }

    /// Plan with one strict retry, then the default plan.
    pub async fn plan(&self, query: &str, hints: &QueryHints) -> WebPlan {
        for strict in [false, true] {
            let messages = self.plan_prompt(query, hints, strict);
            match self.llm.generate(&messages).await {
                Ok(result) => {
                    if let Some(json) = extract_json(&result.text) {
                        match serde_json::from_str::<WebPlan>(json) {
                            Ok(mut plan) => {
                                plan.searches.retain(|s| !s.trim().is_empty());
                                plan.searches.truncate(self.config.max_searches);
                                if plan.searches.is_empty() {
                                    plan.searches.push(query.to_string());
                                }
                                return plan;
                            }
                            Err(e) => {
                                tracing::warn!(strict, error = %e, "web plan failed to parse");
                            }
                        }
                    } else {
                        tracing::warn!(strict, "web planner produced no JSON object");
                    }
                }
                Err(e) => {
                    tracing::warn!(strict, error = %e, "web planner call failed");
                }
            }
        }

        tracing::warn!("web planning failed twice, using default plan");
        WebPlan::fallback(query)
    }

    fn hit_to_context(
        &self,
        hit: crate::websearch::WebHit,
        rank: usize,
        result_count: usize,
    ) -> RetrievedContext {
        let score = hit
            .score
            .unwrap_or_else(|| 1.0 - rank as f32 / result_count.max(1) as f32)
            .clamp(0.0, 1.0);

        let content = if hit.snippet.is_empty() {
            hit.title.clone()
        } else {
            hit.snippet
        };

        let mut ctx = RetrievedContext::new(
            content,
            format!("web_{}", self.provider.name()),
            score,
        )
        .with_meta(meta::TITLE, hit.title)
        .with_meta(meta::URL, hit.url);
        if let Some(timestamp) = hit.timestamp {
            ctx = ctx.with_meta(meta::TIMESTAMP, timestamp);
        }
        ctx
    }
}

#[async_trait]
impl RetrievalStrategy for WebSearchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WebSearch
    }

    async fn run(
        &self,
        query: &str,
        hints: &QueryHints,
        k: usize,
    ) -> Result<StrategyOutput, Error> {
        let plan = self.plan(query, hints).await;
        tracing::debug!(
            classification = ?plan.classification,
            priority = ?plan.priority,
            searches = plan.searches.len(),
            "executing web search plan"
        );

        let mut metadata = RetrievalMetadata::default();
        let attempted = plan.searches.len();
        let mut failures = 0usize;
        let mut contexts: Vec<RetrievedContext> = Vec::new();

        let mut searches = stream::iter(plan.searches.into_iter().map(|search| {
            let provider = Arc::clone(&self.provider);
            let max_results = self.config.max_results;
            async move {
                let result = provider.search(&search, max_results).await;
                (search, result)
            }
        }))
        .buffer_unordered(self.config.fanout.max(1));

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    metadata.warn("web search deadline expired, returning partial results".to_string());
                    break;
                }
                next = searches.next() => match next {
                    Some((search, Ok(hits))) => {
                        let count = hits.len();
                        for (rank, hit) in hits.into_iter().enumerate() {
                            contexts.push(self.hit_to_context(hit, rank, count));
                        }
                        tracing::debug!(search = %search, hits = count, "web search completed");
                    }
                    Some((search, Err(e))) => {
                        tracing::warn!(search = %search, error = %e, "web search failed");
                        metadata.warn(format!("search '{search}' failed: {e}"));
                        failures += 1;
                    }
                    None => break,
                }
            }
        }

        if attempted > 0 && failures == attempted {
            return Err(Error::StrategyFailed(
                "every planned web search failed".to_string(),
            ));
        }

        // Dedup by URL, keeping the first occurrence.
        let mut seen = HashSet::new();
        contexts.retain(|ctx| {
            let url = ctx.metadata.get(meta::URL).cloned().unwrap_or_default();
            seen.insert(url)
        });

        metadata.record_method("web_search", contexts.len());

        Ok(StrategyOutput {
            contexts: topk(contexts, k),
            metadata,
        })
    }

    async fn ready(&self) -> bool {
        self.provider.ready().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websearch::WebHit;
    use ticket_rag_llm::{GenerationResult, LlmError};

    struct StaticLlm {
        responses: Vec<String>,
        calls: std::sync::Mutex<usize>,
    }

    impl StaticLlm {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: responses.into_iter().map(String::from).collect(),
                calls: std::sync::Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for StaticLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult, LlmError> {
            let mut calls = self.calls.lock().unwrap();
            let text = self
                .responses
                .get(*calls)
                .cloned()
                .unwrap_or_else(|| self.responses.last().cloned().unwrap_or_default());
            *calls += 1;
            Ok(GenerationResult {
                text,
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

    struct StaticProvider {
        hits: Vec<WebHit>,
    }

    #[async_trait]
    impl WebSearchProvider for StaticProvider {
        fn name(&self) -> &str {
            "tavily"
        }

        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebHit>, Error> {
            Ok(self.hits.clone())
        }

        async fn ready(&self) -> bool {
            true
        }
    }

    fn hit(url: &str, score: Option<f32>) -> WebHit {
        WebHit {
            title: format!("title {url}"),
            url: url.to_string(),
            snippet: format!("snippet for {url}"),
            score,
            timestamp: None,
        }
    }

    fn strategy(llm: StaticLlm, hits: Vec<WebHit>) -> WebSearchStrategy {
        WebSearchStrategy::new(
            Arc::new(StaticProvider { hits }),
            Arc::new(llm),
            WebSearchConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_plan_parses_valid_json() {
        let llm = StaticLlm::new(vec![
            r#"{"classification": "status_check", "priority": "urgent", "searches": ["github status", "github outage"]}"#,
        ]);
        let strategy = strategy(llm, vec![]);
        let plan = strategy.plan("is github down", &QueryHints::default()).await;
        assert_eq!(plan.classification, WebClassification::StatusCheck);
        assert_eq!(plan.priority, PlanPriority::Urgent);
        assert_eq!(plan.searches.len(), 2);
    }

    #[tokio::test]
    async fn test_plan_retries_then_falls_back() {
        let llm = StaticLlm::new(vec!["not json at all", "still not json"]);
        let strategy = strategy(llm, vec![]);
        let plan = strategy.plan("some query", &QueryHints::default()).await;
        assert_eq!(plan.classification, WebClassification::General);
        assert_eq!(plan.priority, PlanPriority::Normal);
        assert_eq!(plan.searches, vec!["some query".to_string()]);
    }

    #[tokio::test]
    async fn test_plan_strict_retry_recovers() {
        let llm = StaticLlm::new(vec![
            "garbage",
            r#"{"classification": "general", "priority": "normal", "searches": ["x"]}"#,
        ]);
        let strategy = strategy(llm, vec![]);
        let plan = strategy.plan("q", &QueryHints::default()).await;
        assert_eq!(plan.searches, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_run_dedups_by_url_and_scores_by_rank() {
        let llm = StaticLlm::new(vec![
            r#"{"classification": "general", "priority": "normal", "searches": ["a"]}"#,
        ]);
        let hits = vec![
            hit("https://a.example", None),
            hit("https://b.example", Some(0.4)),
            hit("https://a.example", Some(0.99)),
        ];
        let strategy = strategy(llm, hits);
        let output = strategy
            .run("q", &QueryHints::default(), 10)
            .await
            .unwrap();

        assert_eq!(output.contexts.len(), 2);
        let first = output
            .contexts
            .iter()
            .find(|c| c.metadata["url"] == "https://a.example")
            .unwrap();
        // First occurrence kept: rank 0 of 3 results → 1.0
        assert_eq!(first.score, 1.0);
        assert!(output
            .contexts
            .iter()
            .all(|c| c.source == "web_tavily"));
    }

    #[tokio::test]
    async fn test_empty_results_are_success() {
        let llm = StaticLlm::new(vec![
            r#"{"classification": "general", "priority": "normal", "searches": ["a", "b"]}"#,
        ]);
        let strategy = strategy(llm, vec![]);
        let output = strategy.run("q", &QueryHints::default(), 10).await.unwrap();
        assert!(output.contexts.is_empty());
        assert!(output.metadata.warnings.is_empty());
    }
}
