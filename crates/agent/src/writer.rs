//! Response writer
//!
//! Composes the final answer from the ranked contexts (capped to the top
//! ten). During a production incident the answer leads with the most
//! actionable item. With no contexts the writer states so explicitly and
//! suggests reformulations without fabricating ticket identifiers. Every
//! key mentioned in prose lands in the returned reference list.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use ticket_rag_core::{topk, QueryHints, RetrievedContext, StrategyKind, TicketRef};
use ticket_rag_llm::{LlmBackend, Message};

static KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z]{2,}-\d+").expect("key regex"));

/// Contexts offered to the model per request
const MAX_CONTEXTS: usize = 10;

/// Context text cap inside the prompt
const CONTEXT_CHAR_LIMIT: usize = 1_000;

/// A composed answer plus its extracted references
#[derive(Debug, Clone)]
pub struct ComposedAnswer {
    pub answer: String,
    pub references: Vec<TicketRef>,
}

/// Final-answer synthesis over retrieved contexts
pub struct ResponseWriter {
    llm: Arc<dyn LlmBackend>,
}

impl ResponseWriter {
    pub fn new(llm: Arc<dyn LlmBackend>) -> Self {
        Self { llm }
    }

    /// Compose an answer. LLM failure degrades to the deterministic
    /// extractive path; it never fails the request.
    pub async fn compose(
        &self,
        query: &str,
        strategy: StrategyKind,
        hints: &QueryHints,
        contexts: &[RetrievedContext],
    ) -> ComposedAnswer {
        let capped = topk(contexts.to_vec(), MAX_CONTEXTS);
        if capped.is_empty() {
            return Self::no_results(query);
        }

        let messages = self.prompt(query, strategy, hints, &capped);
        match self.llm.generate(&messages).await {
            Ok(result) => {
                let references = Self::extract_references(&result.text, &capped);
                ComposedAnswer {
                    answer: result.text,
                    references,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "response model failed, composing extractive answer");
                Self::extractive(query, &capped)
            }
        }
    }

    fn prompt(
        &self,
        query: &str,
        strategy: StrategyKind,
        hints: &QueryHints,
        contexts: &[RetrievedContext],
    ) -> Vec<Message> {
        let mut system = String::new();
        if hints.production_incident {
            system.push_str(
                "A production incident is in progress. Lead with the single most actionable \
                 item and skip background discussion. ",
            );
        }
        system.push_str(
            "You are a support engineer answering questions from engineering tickets, web \
             results, and log entries. Cite every ticket you use by its key (e.g. PROJ-1234) \
             and only cite keys that appear in the context. If the context does not answer \
             the question, say so plainly.",
        );

        let mut body = format!("Question: {query}\nRetrieved via: {strategy}\n\nContext:\n");
        for (i, ctx) in contexts.iter().enumerate() {
            let mut label = format!("[{}] ({}", i + 1, ctx.source);
            if let Some(key) = ctx.ticket_key() {
                label.push_str(&format!(", {key}"));
            }
            if let Some(title) = ctx.title() {
                label.push_str(&format!(": {title}"));
            }
            label.push(')');

            let text: String = ctx.content.chars().take(CONTEXT_CHAR_LIMIT).collect();
            body.push_str(&format!("{label}\n{text}\n\n"));
        }

        vec![Message::system(system), Message::user(body)]
    }

    /// The empty-context answer: explicit, suggestion-bearing, and free of
    /// fabricated ticket identifiers.
    pub fn no_results(query: &str) -> ComposedAnswer {
        let answer = format!(
            "No relevant information was found for \"{query}\".\n\n\
             Suggestions to reformulate:\n\
             - Include the exact error message or exception name you are seeing\n\
             - Name the affected component or version\n\
             - If you know a related ticket key, include it verbatim",
        );
        ComposedAnswer {
            answer,
            references: Vec::new(),
        }
    }

    /// Deterministic fallback when the response model is unavailable:
    /// surface the top contexts verbatim with their citations.
    pub fn extractive(query: &str, contexts: &[RetrievedContext]) -> ComposedAnswer {
        let mut answer = format!(
            "The response model was unavailable; here are the most relevant findings for \
             \"{query}\":\n"
        );
        for ctx in contexts.iter().take(3) {
            let excerpt: String = ctx.content.chars().take(280).collect();
            match ctx.ticket_key() {
                Some(key) => answer.push_str(&format!("\n- {key}: {excerpt}")),
                None => answer.push_str(&format!("\n- ({}): {excerpt}", ctx.source)),
            }
        }
        let references = Self::extract_references(&answer, contexts);
        ComposedAnswer { answer, references }
    }

    /// Every key mentioned in prose, in order of first mention, with the
    /// title pulled from the matching context when one exists.
    fn extract_references(answer: &str, contexts: &[RetrievedContext]) -> Vec<TicketRef> {
        let mut seen = std::collections::HashSet::new();
        let mut references = Vec::new();

        for found in KEY_RE.find_iter(answer) {
            let key = found.as_str().to_string();
            if !seen.insert(key.clone()) {
                continue;
            }
            let title = contexts
                .iter()
                .find(|c| c.ticket_key() == Some(key.as_str()))
                .and_then(|c| c.title())
                .unwrap_or_default()
                .to_string();
            references.push(TicketRef { key, title });
        }

        references
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ticket_rag_core::meta;
    use ticket_rag_llm::{GenerationResult, LlmError};

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

    struct FailingLlm;

    #[async_trait]
    impl LlmBackend for FailingLlm {
        async fn generate(&self, _messages: &[Message]) -> Result<GenerationResult, LlmError> {
            Err(LlmError::Timeout)
        }

        async fn is_available(&self) -> bool {
            false
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn ticket_ctx(key: &str, title: &str, score: f32) -> RetrievedContext {
        RetrievedContext::new(format!("content for {key}"), "bm25_bugs", score)
            .with_meta(meta::KEY, key)
            .with_meta(meta::TITLE, title)
    }

    #[tokio::test]
    async fn test_no_results_answer() {
        let writer = ResponseWriter::new(Arc::new(StaticLlm("unused".into())));
        let composed = writer
            .compose("why is it slow", StrategyKind::Compression, &QueryHints::default(), &[])
            .await;

        assert!(composed.answer.contains("No relevant information"));
        assert!(composed.references.is_empty());
        // Three suggestions, zero fabricated ticket keys.
        assert_eq!(composed.answer.matches("\n- ").count(), 3);
        assert!(!KEY_RE.is_match(&composed.answer));
    }

    #[tokio::test]
    async fn test_references_extracted_from_prose() {
        let writer = ResponseWriter::new(Arc::new(StaticLlm(
            "HBASE-12345 describes the timeout; see also HBASE-12345 and SPARK-99.".into(),
        )));
        let contexts = vec![
            ticket_ctx("HBASE-12345", "Region server timeout", 0.9),
            ticket_ctx("SPARK-99", "Executor OOM", 0.5),
        ];
        let composed = writer
            .compose("timeouts", StrategyKind::Bm25, &QueryHints::default(), &contexts)
            .await;

        assert_eq!(composed.references.len(), 2);
        assert_eq!(composed.references[0].key, "HBASE-12345");
        assert_eq!(composed.references[0].title, "Region server timeout");
        assert_eq!(composed.references[1].key, "SPARK-99");
    }

    #[tokio::test]
    async fn test_prose_key_without_context_still_referenced() {
        let writer = ResponseWriter::new(Arc::new(StaticLlm("Possibly KAFKA-777.".into())));
        let contexts = vec![ticket_ctx("HBASE-1", "t", 0.9)];
        let composed = writer
            .compose("q", StrategyKind::Compression, &QueryHints::default(), &contexts)
            .await;

        // Every key in prose appears in the reference list, titled or not.
        assert_eq!(composed.references.len(), 1);
        assert_eq!(composed.references[0].key, "KAFKA-777");
        assert_eq!(composed.references[0].title, "");
    }

    #[tokio::test]
    async fn test_llm_failure_degrades_to_extractive() {
        let writer = ResponseWriter::new(Arc::new(FailingLlm));
        let contexts = vec![ticket_ctx("HBASE-12345", "Region server timeout", 0.9)];
        let composed = writer
            .compose("timeouts", StrategyKind::Compression, &QueryHints::default(), &contexts)
            .await;

        assert!(composed.answer.contains("HBASE-12345"));
        assert_eq!(composed.references.len(), 1);
        assert_eq!(composed.references[0].key, "HBASE-12345");
    }

    #[test]
    fn test_extractive_caps_at_three() {
        let contexts: Vec<RetrievedContext> = (0..5)
            .map(|i| ticket_ctx(&format!("PROJ-{i}"), "t", 1.0 - i as f32 * 0.1))
            .collect();
        let composed = ResponseWriter::extractive("q", &contexts);
        assert_eq!(composed.references.len(), 3);
    }
}
