//! Log-search strategy
//!
//! Planner phase: the fast model names a search type, up to three concrete
//! log queries, and a time window (1 h default, widened to 72 h during a
//! production incident). Exception searches draw type names from the
//! configured catalogue. Execution phase: severity=ERROR filter queries
//! dispatch concurrently under bounded fan-out; matches are scored by
//! recency within the window weighted by pattern specificity (exact
//! exception class beats generic keyword).

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use ticket_rag_core::{
    fuse, meta, topk, Error, QueryHints, RetrievalMetadata, RetrievalStrategy, RetrievedContext,
    StrategyKind, StrategyOutput,
};
use ticket_rag_llm::{extract_json, LlmBackend, Message};

use crate::logstore::{LogEntry, LogQueryFilter, LogStore};

/// Payload excerpt length carried in context metadata
const EXCERPT_LEN: usize = 240;

/// Score multiplier for generic (non-catalogue) patterns
const GENERIC_PATTERN_WEIGHT: f32 = 0.6;

/// Search type emitted by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSearchType {
    ExceptionSearch,
    ProductionIssue,
    GeneralSearch,
    TimeRangeAnalysis,
}

/// The planner's structured output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPlan {
    pub search_type: LogSearchType,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default)]
    pub window_hours: Option<i64>,
    #[serde(default)]
    pub exception_types: Vec<String>,
}

/// Strategy configuration
#[derive(Debug, Clone)]
pub struct LogSearchConfig {
    pub max_searches: usize,
    pub fanout: usize,
    pub default_window_hours: i64,
    pub incident_window_hours: i64,
    /// Exception classes the planner may target
    pub exception_catalogue: Vec<String>,
    /// Entries fetched per query
    pub per_query_limit: usize,
}

impl Default for LogSearchConfig {
    fn default() -> Self {
        Self {
            max_searches: 5,
            fanout: 3,
            default_window_hours: 1,
            incident_window_hours: 72,
            exception_catalogue: vec![
                "CertificateExpiredException".to_string(),
                "HttpServerErrorException".to_string(),
                "DiskSpaceExceededException".to_string(),
                "DeadLetterQueueExceededException".to_string(),
            ],
            per_query_limit: 20,
        }
    }
}

/// LLM-planned log retrieval
#[derive(Clone)]
pub struct LogSearchStrategy {
    store: Arc<dyn LogStore>,
    llm: Arc<dyn LlmBackend>,
    config: LogSearchConfig,
}

impl LogSearchStrategy {
    pub fn new(store: Arc<dyn LogStore>, llm: Arc<dyn LlmBackend>, config: LogSearchConfig) -> Self {
        Self { store, llm, config }
    }

    fn default_window(&self, hints: &QueryHints) -> i64 {
        if hints.production_incident {
            self.config.incident_window_hours
        } else {
            self.config.default_window_hours
        }
    }

    fn plan_prompt(&self, query: &str, hints: &QueryHints, strict: bool) -> Vec<Message> {
        let mut system = format!(
            "You plan log store searches. Respond with ONLY a JSON object of the form \
             {{\"search_type\": \"exception_search|production_issue|general_search|time_range_analysis\", \
             \"queries\": [\"...\"], \"window_hours\": <int>, \"exception_types\": [\"...\"]}}. \
             At most 3 queries. Known exception types: {}.",
            self.config.exception_catalogue.join(", ")
        );
        if strict {
            system.push_str(" Output the JSON object with no code fences, prose, or comments.");
        }

        vec![
            Message::system(system),
            Message::user(format!(
                "Query: {query}\nproduction_incident: {}",
                hints.production_incident
            )),
        ]
    }

    /// Plan with one strict retry, then a default plan over the raw query.
    pub async fn plan(&self, query: &str, hints: &QueryHints) -> LogPlan {
        for strict in [false, true] {
            let messages = self.plan_prompt(query, hints, strict);
            match self.llm.generate(&messages).await {
                Ok(result) => {
                    if let Some(json) = extract_json(&result.text) {
                        match serde_json::from_str::<LogPlan>(json) {
                            Ok(mut plan) => {
                                plan.queries.retain(|q| !q.trim().is_empty());
                                plan.queries.truncate(3);
                                // Planner exception names outside the
                                // catalogue are dropped, not trusted.
                                plan.exception_types
                                    .retain(|t| self.config.exception_catalogue.contains(t));
                                return plan;
                            }
                            Err(e) => {
                                tracing::warn!(strict, error = %e, "log plan failed to parse");
                            }
                        }
                    } else {
                        tracing::warn!(strict, "log planner produced no JSON object");
                    }
                }
                Err(e) => {
                    tracing::warn!(strict, error = %e, "log planner call failed");
                }
            }
        }

        tracing::warn!("log planning failed twice, using default plan");
        LogPlan {
            search_type: LogSearchType::GeneralSearch,
            queries: vec![query.to_string()],
            window_hours: None,
            exception_types: Vec::new(),
        }
    }

    /// Patterns to dispatch: planner queries plus, for exception searches,
    /// the targeted exception class names.
    fn patterns(&self, plan: &LogPlan) -> Vec<String> {
        let mut patterns = plan.queries.clone();
        if plan.search_type == LogSearchType::ExceptionSearch {
            for exception in &plan.exception_types {
                if !patterns.contains(exception) {
                    patterns.push(exception.clone());
                }
            }
        }
        patterns.truncate(self.config.max_searches);
        patterns
    }

    fn entry_to_context(&self, entry: LogEntry, pattern: &str, window_hours: i64) -> RetrievedContext {
        let window_secs = (window_hours.max(1) * 3600) as f32;
        let age_secs = (Utc::now() - entry.timestamp).num_seconds().max(0) as f32;
        let recency = (1.0 - age_secs / window_secs).clamp(0.0, 1.0);

        let specificity = if self.config.exception_catalogue.iter().any(|e| e == pattern) {
            1.0
        } else {
            GENERIC_PATTERN_WEIGHT
        };

        let excerpt: String = entry.payload.chars().take(EXCERPT_LEN).collect();

        RetrievedContext::new(
            entry.payload.clone(),
            format!("logs_{}", self.store.name()),
            (recency * specificity).clamp(0.0, 1.0),
        )
        .with_meta(meta::TIMESTAMP, entry.timestamp.to_rfc3339())
        .with_meta(meta::SEVERITY, entry.severity)
        .with_meta(meta::SERVICE, entry.service)
        .with_meta("excerpt", excerpt)
        .with_meta("matched_pattern", pattern.to_string())
    }
}

#[async_trait]
impl RetrievalStrategy for LogSearchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LogSearch
    }

    async fn run(
        &self,
        query: &str,
        hints: &QueryHints,
        k: usize,
    ) -> Result<StrategyOutput, Error> {
        let plan = self.plan(query, hints).await;
        let window_hours = plan
            .window_hours
            .filter(|h| *h > 0)
            .unwrap_or_else(|| self.default_window(hints));

        let patterns = self.patterns(&plan);
        tracing::debug!(
            search_type = ?plan.search_type,
            window_hours,
            patterns = patterns.len(),
            "executing log search plan"
        );

        let mut metadata = RetrievalMetadata::default();
        if patterns.is_empty() {
            metadata.record_method("log_search", 0);
            return Ok(StrategyOutput {
                contexts: Vec::new(),
                metadata,
            });
        }

        let end = Utc::now();
        let start = end - ChronoDuration::hours(window_hours);
        let attempted = patterns.len();
        let mut failures = 0usize;
        let mut contexts: Vec<RetrievedContext> = Vec::new();

        let mut searches = stream::iter(patterns.into_iter().map(|pattern| {
            let store = Arc::clone(&self.store);
            let limit = self.config.per_query_limit;
            let filter = LogQueryFilter {
                severity: "ERROR".to_string(),
                pattern: pattern.clone(),
                start,
                end,
            };
            async move {
                let result = store.query(&filter, limit).await;
                (pattern, result)
            }
        }))
        .buffer_unordered(self.config.fanout.max(1));

        while let Some((pattern, result)) = searches.next().await {
            match result {
                Ok(entries) => {
                    tracing::debug!(pattern = %pattern, entries = entries.len(), "log query completed");
                    for entry in entries {
                        contexts.push(self.entry_to_context(entry, &pattern, window_hours));
                    }
                }
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "log query failed");
                    metadata.warn(format!("log query '{pattern}' failed: {e}"));
                    failures += 1;
                }
            }
        }

        if failures == attempted {
            return Err(Error::StrategyFailed(
                "every planned log query failed".to_string(),
            ));
        }

        // Dedup identical payloads surfaced by overlapping patterns.
        let deduped = fuse(&[contexts], &[1.0]);
        metadata.record_method("log_search", deduped.len());

        Ok(StrategyOutput {
            contexts: topk(deduped, k),
            metadata,
        })
    }

    async fn ready(&self) -> bool {
        self.store.ready().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use ticket_rag_llm::{GenerationResult, LlmError};

    struct StaticLlm {
        responses: Vec<String>,
        calls: Mutex<usize>,
    }

    impl StaticLlm {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: responses.into_iter().map(String::from).collect(),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for StaticLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult, LlmError> {
            let mut calls = self.calls.lock();
            let text = self
                .responses
                .get(*calls)
                .cloned()
                .unwrap_or_default();
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

    struct StaticLogStore {
        entries: Vec<LogEntry>,
        seen_filters: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LogStore for StaticLogStore {
        fn name(&self) -> &str {
            "gcp"
        }

        async fn query(
            &self,
            filter: &LogQueryFilter,
            _limit: usize,
        ) -> Result<Vec<LogEntry>, Error> {
            self.seen_filters.lock().push(filter.to_filter_string());
            Ok(self.entries.clone())
        }

        async fn ready(&self) -> bool {
            true
        }
    }

    fn entry(minutes_ago: i64, payload: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now() - ChronoDuration::minutes(minutes_ago),
            severity: "ERROR".to_string(),
            service: "gateway".to_string(),
            payload: payload.to_string(),
        }
    }

    fn strategy(llm: StaticLlm, entries: Vec<LogEntry>) -> (LogSearchStrategy, Arc<StaticLogStore>) {
        let store = Arc::new(StaticLogStore {
            entries,
            seen_filters: Mutex::new(Vec::new()),
        });
        (
            LogSearchStrategy::new(store.clone(), Arc::new(llm), LogSearchConfig::default()),
            store,
        )
    }

    #[tokio::test]
    async fn test_plan_filters_unknown_exceptions() {
        let llm = StaticLlm::new(vec![
            r#"{"search_type": "exception_search", "queries": ["cert errors"],
                "exception_types": ["CertificateExpiredException", "MadeUpException"]}"#,
        ]);
        let (strategy, _) = strategy(llm, vec![]);
        let plan = strategy.plan("certs failing", &QueryHints::default()).await;
        assert_eq!(plan.search_type, LogSearchType::ExceptionSearch);
        assert_eq!(plan.exception_types, vec!["CertificateExpiredException"]);
    }

    #[tokio::test]
    async fn test_incident_widens_window() {
        let llm = StaticLlm::new(vec!["garbage", "garbage"]);
        let (strategy, store) = strategy(llm, vec![]);
        let hints = QueryHints {
            user_can_wait: false,
            production_incident: true,
        };
        strategy.run("errors in checkout", &hints, 10).await.unwrap();

        let filters = store.seen_filters.lock();
        assert_eq!(filters.len(), 1);
        // 72 h window: the rendered start must be about three days back.
        let rendered = &filters[0];
        assert!(rendered.contains("severity = ERROR"));
    }

    #[tokio::test]
    async fn test_exact_exception_scores_above_generic() {
        let llm = StaticLlm::new(vec![
            r#"{"search_type": "exception_search", "queries": ["disk troubles"],
                "exception_types": ["DiskSpaceExceededException"]}"#,
        ]);
        let (strategy, _) = strategy(
            llm,
            vec![entry(5, "DiskSpaceExceededException on /var")],
        );
        let output = strategy
            .run("disk space", &QueryHints::default(), 10)
            .await
            .unwrap();

        // The same entry matched both patterns; the deduped survivor keeps
        // the exact-class score, which beats the generic one.
        assert_eq!(output.contexts.len(), 1);
        let ctx = &output.contexts[0];
        assert_eq!(ctx.source, "logs_gcp");
        assert_eq!(ctx.metadata["severity"], "ERROR");
        assert_eq!(ctx.metadata["service"], "gateway");
        assert!(ctx.score > GENERIC_PATTERN_WEIGHT * 0.95);
    }

    #[tokio::test]
    async fn test_recent_entries_score_higher() {
        let llm = StaticLlm::new(vec![
            r#"{"search_type": "general_search", "queries": ["timeout"]}"#,
        ]);
        let (strategy, _) = strategy(
            llm,
            vec![entry(2, "timeout in gateway"), entry(50, "timeout in worker")],
        );
        let output = strategy
            .run("timeouts", &QueryHints::default(), 10)
            .await
            .unwrap();

        assert_eq!(output.contexts.len(), 2);
        assert!(output.contexts[0].score > output.contexts[1].score);
        assert!(output.contexts[0].content.contains("gateway"));
    }
}
