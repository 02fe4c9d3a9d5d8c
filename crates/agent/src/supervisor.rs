//! Supervisor router
//!
//! An ordered rule table maps `(query, hints)` to a strategy; the first
//! matching rule wins. With the LLM classifier disabled the decision is a
//! pure function of its inputs. The classifier, when enabled, is consulted
//! only when no rule fired beyond the default.

use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use std::sync::Arc;

use ticket_rag_core::{QueryHints, QueryPlan, StrategyKind};
use ticket_rag_llm::{LlmBackend, Message};

/// Ticket identifier pattern, e.g. `HBASE-12345`
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Z]{2,}-\d+").expect("identifier regex"));

/// Rule 1: outage/status vocabulary (phrases matched as substrings,
/// single words on word boundaries)
const OUTAGE_PHRASES: [&str; 2] = ["status page", "status-page"];
const OUTAGE_WORDS: [&str; 4] = ["down", "outage", "latest", "current"];

/// Rule 3: log vocabulary
const LOG_PHRASES: [&str; 2] = ["stack trace", "error rate"];
const LOG_WORDS: [&str; 4] = ["logs", "log", "exception", "exceptions"];

/// Rule 3 alternative: error vocabulary during an incident
const ERROR_WORDS: [&str; 4] = ["error", "errors", "failing", "failure"];

fn has_word(lowered: &str, words: &[&str]) -> bool {
    lowered
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .any(|token| words.contains(&token))
}

fn has_phrase(lowered: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| lowered.contains(p))
}

/// Pure rule-table routing. Rules evaluate in order; the first match wins.
/// Returns the plan and whether a rule beyond the default fired.
fn route_rules(query: &str, hints: &QueryHints) -> (QueryPlan, bool) {
    let lowered = query.to_lowercase();
    let urgent = hints.urgent();

    if has_phrase(&lowered, &OUTAGE_PHRASES) || has_word(&lowered, &OUTAGE_WORDS) {
        return (
            QueryPlan::new(
                StrategyKind::WebSearch,
                "rule 1: outage/status vocabulary routes to web search",
                urgent,
            ),
            true,
        );
    }

    if IDENTIFIER_RE.is_match(query) {
        return (
            QueryPlan::new(
                StrategyKind::Bm25,
                "rule 2: ticket identifier in query routes to BM25",
                urgent,
            ),
            true,
        );
    }

    if has_phrase(&lowered, &LOG_PHRASES)
        || has_word(&lowered, &LOG_WORDS)
        || (hints.production_incident && has_word(&lowered, &ERROR_WORDS))
    {
        return (
            QueryPlan::new(
                StrategyKind::LogSearch,
                "rule 3: log/error vocabulary routes to log search",
                urgent,
            ),
            true,
        );
    }

    if hints.user_can_wait {
        return (
            QueryPlan::new(
                StrategyKind::Ensemble,
                "rule 4: caller can wait, comprehensive ensemble selected",
                urgent,
            ),
            true,
        );
    }

    if hints.production_incident {
        return (
            QueryPlan::new(
                StrategyKind::Compression,
                "rule 5: production incident, urgent compression default",
                urgent,
            ),
            true,
        );
    }

    (
        QueryPlan::new(
            StrategyKind::Compression,
            "rule 6: default compression route",
            urgent,
        ),
        false,
    )
}

/// Deterministic routing entry point; what the tests exercise.
pub fn route(query: &str, hints: &QueryHints) -> QueryPlan {
    route_rules(query, hints).0
}

/// Supervisor with an optional LLM classifier for ambiguous queries
pub struct Supervisor {
    classifier: Option<Arc<dyn LlmBackend>>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self { classifier: None }
    }

    /// Enable the LLM classifier. Its choice is accepted only when the
    /// rule table was ambiguous (nothing fired beyond the default).
    pub fn with_classifier(mut self, llm: Arc<dyn LlmBackend>) -> Self {
        self.classifier = Some(llm);
        self
    }

    pub async fn decide(&self, query: &str, hints: &QueryHints) -> QueryPlan {
        let (plan, rule_fired) = route_rules(query, hints);
        if rule_fired {
            return plan;
        }

        let Some(ref classifier) = self.classifier else {
            return plan;
        };

        let messages = [
            Message::system(
                "Classify a support query into exactly one retrieval strategy. Respond with \
                 one word from: BM25, Compression, Ensemble, WebSearch, LogSearch.",
            ),
            Message::user(query.to_string()),
        ];

        match classifier.generate(&messages).await {
            Ok(result) => match StrategyKind::from_str(result.text.trim()) {
                Ok(strategy) => QueryPlan::new(
                    strategy,
                    format!("llm classifier chose {strategy} for ambiguous query"),
                    hints.urgent(),
                ),
                Err(()) => {
                    tracing::warn!(
                        output = %result.text.trim(),
                        "classifier produced no known strategy, keeping default"
                    );
                    plan
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "classifier call failed, keeping default");
                plan
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
