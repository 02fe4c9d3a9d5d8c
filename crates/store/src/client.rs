//! Ticket store facade
//!
//! Owns the ordered back-end chain (`auto` = primary then fallback, tried
//! per call) and the embedding client, and exposes the three store
//! operations. Scores leave this module normalized per the fusion rules:
//! vector hits carry clamped cosine similarity, ranked keyword batches are
//! rescaled by their batch maximum, substring-scan batches keep their
//! uniform score.

use std::sync::Arc;

use ticket_rag_core::{
    fuse, normalize_rank_scores, topk, Collection, RetrievedContext, TicketFilters,
};

use crate::backend::TicketBackend;
use crate::embeddings::EmbeddingClient;
use crate::StoreError;

/// Result of one store operation
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub contexts: Vec<RetrievedContext>,
    /// False when any contributing keyword batch came from a substring scan
    pub keyword_index_used: bool,
    /// Degradation messages (failed sub-queries, back-end fallbacks)
    pub warnings: Vec<String>,
    /// Which back-end served the call
    pub backend: Option<&'static str>,
}

/// Facade configuration
#[derive(Debug, Clone)]
pub struct TicketStoreConfig {
    pub similarity_threshold: f32,
    pub vector_weight: f32,
    pub keyword_weight: f32,
}

impl Default for TicketStoreConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.1,
            vector_weight: 0.7,
            keyword_weight: 0.3,
        }
    }
}

/// Shared, concurrency-safe ticket store client
pub struct TicketStore {
    backends: Vec<Arc<dyn TicketBackend>>,
    embedder: Arc<EmbeddingClient>,
    config: TicketStoreConfig,
}

impl TicketStore {
    /// Build with back-ends in fallback order; `auto` mode passes both.
    pub fn new(
        backends: Vec<Arc<dyn TicketBackend>>,
        embedder: Arc<EmbeddingClient>,
        config: TicketStoreConfig,
    ) -> Self {
        Self {
            backends,
            embedder,
            config,
        }
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.config.similarity_threshold
    }

    /// Embed a query once; callers searching both collections reuse it.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        self.embedder.embed(text).await
    }

    /// Vector search with a precomputed embedding.
    pub async fn vector_search_with_embedding(
        &self,
        embedding: &[f32],
        collection: Collection,
        k: usize,
        threshold: Option<f32>,
        filters: &TicketFilters,
    ) -> Result<SearchOutcome, StoreError> {
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);
        let start = std::time::Instant::now();
        metrics::counter!("ticket_store_queries_total", "op" => "vector").increment(1);

        let mut warnings = Vec::new();
        let mut last_error = None;

        for backend in &self.backends {
            match backend
                .vector_search(collection, embedding, k, threshold, filters)
                .await
            {
                Ok(hits) => {
                    let contexts = hits
                        .into_iter()
                        .map(|hit| RetrievedContext {
                            content: hit.content,
                            metadata: hit.metadata,
                            source: format!("vector_{collection}"),
                            score: hit.similarity.clamp(0.0, 1.0),
                        })
                        .collect();
                    metrics::histogram!("ticket_store_query_duration_seconds", "op" => "vector")
                        .record(start.elapsed().as_secs_f64());
                    return Ok(SearchOutcome {
                        contexts,
                        keyword_index_used: false,
                        warnings,
                        backend: Some(backend.name()),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        backend = backend.name(),
                        collection = %collection,
                        error = %e,
                        "vector search failed on back-end"
                    );
                    warnings.push(format!("vector search on {} failed: {e}", backend.name()));
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| StoreError::Unavailable("no ticket back-end configured".into())))
    }

    /// Vector search from query text.
    pub async fn vector_search(
        &self,
        query: &str,
        collection: Collection,
        k: usize,
        threshold: Option<f32>,
        filters: &TicketFilters,
    ) -> Result<SearchOutcome, StoreError> {
        let embedding = self.embed_query(query).await?;
        self.vector_search_with_embedding(&embedding, collection, k, threshold, filters)
            .await
    }

    /// Keyword search, ranked by the store's lexical index when present.
    pub async fn keyword_search(
        &self,
        query: &str,
        collection: Collection,
        k: usize,
        filters: &TicketFilters,
    ) -> Result<SearchOutcome, StoreError> {
        let start = std::time::Instant::now();
        metrics::counter!("ticket_store_queries_total", "op" => "keyword").increment(1);

        let mut warnings = Vec::new();
        let mut last_error = None;

        for backend in &self.backends {
            match backend.keyword_search(collection, query, k, filters).await {
                Ok(results) => {
                    let mut contexts: Vec<RetrievedContext> = results
                        .hits
                        .into_iter()
                        .map(|hit| RetrievedContext {
                            content: hit.content,
                            metadata: hit.metadata,
                            source: format!("keyword_{collection}"),
                            score: hit.rank,
                        })
                        .collect();

                    if results.used_index {
                        // Raw ranks are batch-relative; rescale by the max.
                        normalize_rank_scores(&mut contexts);
                    }

                    metrics::histogram!("ticket_store_query_duration_seconds", "op" => "keyword")
                        .record(start.elapsed().as_secs_f64());
                    return Ok(SearchOutcome {
                        contexts,
                        keyword_index_used: results.used_index,
                        warnings,
                        backend: Some(backend.name()),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        backend = backend.name(),
                        collection = %collection,
                        error = %e,
                        "keyword search failed on back-end"
                    );
                    warnings.push(format!("keyword search on {} failed: {e}", backend.name()));
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| StoreError::Unavailable("no ticket back-end configured".into())))
    }

    /// Hybrid search: vector and keyword at up to `2k` each, fused under
    /// the configured weights. One failed sub-query degrades to the
    /// surviving list; only both failing is an error.
    pub async fn hybrid_search(
        &self,
        query: &str,
        collection: Collection,
        k: usize,
        threshold: Option<f32>,
        filters: &TicketFilters,
    ) -> Result<SearchOutcome, StoreError> {
        metrics::counter!("ticket_store_queries_total", "op" => "hybrid").increment(1);

        let sub_k = k.saturating_mul(2).max(1);
        let (vector_result, keyword_result) = tokio::join!(
            self.vector_search(query, collection, sub_k, threshold, filters),
            self.keyword_search(query, collection, sub_k, filters),
        );

        let mut warnings = Vec::new();
        let mut keyword_index_used = false;
        let mut backend = None;
        let mut failed_sub_queries = 0u8;

        let vector_contexts = match vector_result {
            Ok(outcome) => {
                warnings.extend(outcome.warnings);
                backend = backend.or(outcome.backend);
                outcome.contexts
            }
            Err(e) => {
                warnings.push(format!("hybrid vector sub-query failed: {e}"));
                failed_sub_queries += 1;
                Vec::new()
            }
        };

        let keyword_contexts = match keyword_result {
            Ok(outcome) => {
                warnings.extend(outcome.warnings);
                keyword_index_used = outcome.keyword_index_used;
                backend = backend.or(outcome.backend);
                outcome.contexts
            }
            Err(e) => {
                warnings.push(format!("hybrid keyword sub-query failed: {e}"));
                failed_sub_queries += 1;
                Vec::new()
            }
        };

        if failed_sub_queries == 2 {
            return Err(StoreError::Unavailable(
                "both hybrid sub-queries failed".to_string(),
            ));
        }

        let fused = fuse(
            &[vector_contexts, keyword_contexts],
            &[self.config.vector_weight, self.config.keyword_weight],
        );

        Ok(SearchOutcome {
            contexts: topk(fused, k),
            keyword_index_used,
            warnings,
            backend,
        })
    }

    /// Per-back-end readiness, for /health.
    pub async fn backend_readiness(&self) -> Vec<(&'static str, bool)> {
        let mut out = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            out.push((backend.name(), backend.ready().await));
        }
        out
    }

    /// The store is ready when any back-end is.
    pub async fn ready(&self) -> bool {
        for backend in &self.backends {
            if backend.ready().await {
                return true;
            }
        }
        false
    }
}
