//! Contextual-compression strategy
//!
//! Vector search against both collections (2k each) followed by reranking
//! when a reranker is configured; otherwise the raw vector ordering stands.
//! The default route, preferred on urgent paths: it is the fastest option
//! that still reorders for quality.

use async_trait::async_trait;
use std::sync::Arc;

use ticket_rag_core::{
    topk, Collection, Error, QueryHints, RetrievalMetadata, RetrievalStrategy, RetrievedContext,
    StrategyKind, StrategyOutput, TicketFilters,
};
use ticket_rag_store::TicketStore;

use crate::reranker::Reranker;
use crate::retag;

/// Vector retrieval with optional cross-encoder reranking
#[derive(Clone)]
pub struct CompressionStrategy {
    store: Arc<TicketStore>,
    reranker: Option<Arc<dyn Reranker>>,
    filters: TicketFilters,
}

impl CompressionStrategy {
    pub fn new(store: Arc<TicketStore>) -> Self {
        Self {
            store,
            reranker: None,
            filters: TicketFilters::default(),
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_filters(mut self, filters: TicketFilters) -> Self {
        self.filters = filters;
        self
    }

    /// The orchestrator's fallback pass: same retrieval, no reranker.
    pub fn degraded(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            reranker: None,
            filters: self.filters.clone(),
        }
    }

    /// Vector search on both collections with one shared embedding.
    /// Also used by the ensemble's compression and naive sub-retrievals.
    pub(crate) async fn gather_candidates(
        &self,
        query: &str,
        per_collection: usize,
        kind: StrategyKind,
        metadata: &mut RetrievalMetadata,
    ) -> Result<Vec<RetrievedContext>, Error> {
        let embedding = self
            .store
            .embed_query(query)
            .await
            .map_err(|e| Error::StrategyFailed(format!("query embedding failed: {e}")))?;

        let (bugs, releases) = tokio::join!(
            self.store.vector_search_with_embedding(
                &embedding,
                Collection::Bugs,
                per_collection,
                None,
                &self.filters,
            ),
            self.store.vector_search_with_embedding(
                &embedding,
                Collection::Releases,
                per_collection,
                None,
                &self.filters,
            ),
        );

        let mut candidates = Vec::new();
        let mut failures = 0usize;

        for (collection, result) in [(Collection::Bugs, bugs), (Collection::Releases, releases)] {
            match result {
                Ok(outcome) => {
                    let mut contexts = outcome.contexts;
                    retag(&mut contexts, kind, collection);
                    metadata.record_method(format!("vector_{collection}"), contexts.len());
                    metadata.warnings.extend(outcome.warnings);
                    candidates.extend(contexts);
                }
                Err(e) => {
                    tracing::warn!(
                        collection = %collection,
                        error = %e,
                        "vector sub-retrieval failed"
                    );
                    metadata.warn(format!("vector search on {collection} failed: {e}"));
                    failures += 1;
                }
            }
        }

        if failures == 2 {
            return Err(Error::StrategyFailed(
                "vector search failed on every collection".to_string(),
            ));
        }

        Ok(candidates)
    }
}

#[async_trait]
impl RetrievalStrategy for CompressionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Compression
    }

    async fn run(
        &self,
        query: &str,
        _hints: &QueryHints,
        k: usize,
    ) -> Result<StrategyOutput, Error> {
        let mut metadata = RetrievalMetadata {
            filters_applied: !self.filters.is_empty(),
            ..Default::default()
        };

        let candidates = self
            .gather_candidates(query, k.saturating_mul(2).max(1), StrategyKind::Compression, &mut metadata)
            .await?;

        let contexts = match &self.reranker {
            Some(reranker) if !candidates.is_empty() => {
                match reranker.rerank(query, candidates.clone(), k).await {
                    Ok(reranked) => {
                        metadata.reranker_used = true;
                        metadata.record_method("rerank", reranked.len());
                        reranked
                    }
                    Err(e) => {
                        tracing::warn!(
                            reranker = reranker.name(),
                            error = %e,
                            "reranker unavailable, keeping raw vector ordering"
                        );
                        metadata.warn(format!("reranker failed, raw vector ordering kept: {e}"));
                        topk(candidates, k)
                    }
                }
            }
            _ => topk(candidates, k),
        };

        Ok(StrategyOutput { contexts, metadata })
    }

    async fn ready(&self) -> bool {
        self.store.ready().await
    }
}
