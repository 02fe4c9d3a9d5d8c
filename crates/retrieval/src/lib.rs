//! Retrieval strategies
//!
//! Five strategies satisfy the core `RetrievalStrategy` capability:
//! - `Bm25Strategy`: keyword ranking across both ticket collections
//! - `CompressionStrategy`: vector search with pluggable reranking
//! - `EnsembleStrategy`: four equal-weight sub-retrievals, fused
//! - `WebSearchStrategy`: LLM-planned multi-query web search
//! - `LogSearchStrategy`: LLM-planned exception/time-window log search
//!
//! Sub-retrievals inside a strategy run concurrently; a failed sub-retrieval
//! contributes an empty list and a warning, and a strategy fails only when
//! every sub-retrieval failed.

pub mod bm25;
pub mod compression;
pub mod ensemble;
pub mod logs;
pub mod logstore;
pub mod reranker;
pub mod web;
pub mod websearch;

pub use bm25::Bm25Strategy;
pub use compression::CompressionStrategy;
pub use ensemble::EnsembleStrategy;
pub use logs::{LogPlan, LogSearchConfig, LogSearchStrategy, LogSearchType};
pub use logstore::{HttpLogStore, LogEntry, LogQueryFilter, LogStore};
pub use reranker::{HttpReranker, Reranker};
pub use web::{WebPlan, WebSearchConfig, WebSearchStrategy};
pub use websearch::{TavilyClient, WebHit, WebSearchProvider};

use ticket_rag_core::{Collection, RetrievedContext, StrategyKind};

/// Re-tag contexts with the owning strategy's source label.
///
/// Store operations tag hits `vector_bugs` / `keyword_releases`; the
/// strategy's outward source names the strategy and collection instead
/// (`bm25_bugs`, `ensemble_releases`).
pub(crate) fn retag(contexts: &mut [RetrievedContext], kind: StrategyKind, collection: Collection) {
    for ctx in contexts.iter_mut() {
        ctx.source = format!("{}_{}", kind.tag(), collection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retag() {
        let mut contexts = vec![RetrievedContext::new("c", "vector_bugs", 0.5)];
        retag(&mut contexts, StrategyKind::Ensemble, Collection::Releases);
        assert_eq!(contexts[0].source, "ensemble_releases");
    }
}
