//! BM25 strategy
//!
//! Keyword search against both collections concurrently (k each), fused
//! 50/50. The supervisor routes here when the query carries a ticket
//! identifier or is otherwise lexically specific.

use async_trait::async_trait;
use std::sync::Arc;

use ticket_rag_core::{
    fuse, topk, Collection, Error, QueryHints, RetrievalMetadata, RetrievalStrategy,
    RetrievedContext, StrategyKind, StrategyOutput, TicketFilters,
};
use ticket_rag_store::TicketStore;

use crate::retag;

/// Keyword-ranking strategy over both ticket collections
#[derive(Clone)]
pub struct Bm25Strategy {
    store: Arc<TicketStore>,
    filters: TicketFilters,
}

impl Bm25Strategy {
    pub fn new(store: Arc<TicketStore>) -> Self {
        Self {
            store,
            filters: TicketFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: TicketFilters) -> Self {
        self.filters = filters;
        self
    }
}

#[async_trait]
impl RetrievalStrategy for Bm25Strategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Bm25
    }

    async fn run(
        &self,
        query: &str,
        _hints: &QueryHints,
        k: usize,
    ) -> Result<StrategyOutput, Error> {
        let (bugs, releases) = tokio::join!(
            self.store
                .keyword_search(query, Collection::Bugs, k, &self.filters),
            self.store
                .keyword_search(query, Collection::Releases, k, &self.filters),
        );

        let mut metadata = RetrievalMetadata {
            filters_applied: !self.filters.is_empty(),
            ..Default::default()
        };

        let mut lists: Vec<Vec<RetrievedContext>> = Vec::with_capacity(2);
        let mut failures = 0usize;

        for (collection, result) in [(Collection::Bugs, bugs), (Collection::Releases, releases)] {
            match result {
                Ok(outcome) => {
                    let mut contexts = outcome.contexts;
                    retag(&mut contexts, StrategyKind::Bm25, collection);
                    metadata.record_method(format!("keyword_{collection}"), contexts.len());
                    metadata.keyword_index_used |= outcome.keyword_index_used;
                    metadata.warnings.extend(outcome.warnings);
                    lists.push(contexts);
                }
                Err(e) => {
                    tracing::warn!(collection = %collection, error = %e, "BM25 sub-retrieval failed");
                    metadata.warn(format!("keyword search on {collection} failed: {e}"));
                    failures += 1;
                    lists.push(Vec::new());
                }
            }
        }

        if failures == lists.len() {
            return Err(Error::StrategyFailed(
                "keyword search failed on every collection".to_string(),
            ));
        }

        let fused = fuse(&lists, &[0.5, 0.5]);
        Ok(StrategyOutput {
            contexts: topk(fused, k),
            metadata,
        })
    }

    async fn ready(&self) -> bool {
        self.store.ready().await
    }
}
