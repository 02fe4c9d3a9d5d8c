//! Ensemble strategy
//!
//! Four sub-retrievals run concurrently under equal weight 0.25: multi-query
//! expansion (LLM paraphrases), contextual compression, keyword, and naive
//! vector. The comprehensive path, selected when the caller signals
//! patience. A failed sub-retrieval contributes an empty list plus a
//! warning; the strategy fails only when all four fail.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use ticket_rag_core::{
    fuse, topk, Collection, Error, QueryHints, RetrievalMetadata, RetrievalStrategy,
    RetrievedContext, StrategyKind, StrategyOutput, TicketFilters,
};
use ticket_rag_llm::{extract_json, LlmBackend, Message};
use ticket_rag_store::TicketStore;

use crate::reranker::Reranker;
use crate::retag;

/// Paraphrases requested from the expansion model
const MAX_PARAPHRASES: usize = 3;

/// Four-way ensemble retrieval
#[derive(Clone)]
pub struct EnsembleStrategy {
    store: Arc<TicketStore>,
    llm: Arc<dyn LlmBackend>,
    reranker: Option<Arc<dyn Reranker>>,
    filters: TicketFilters,
}

impl EnsembleStrategy {
    pub fn new(store: Arc<TicketStore>, llm: Arc<dyn LlmBackend>) -> Self {
        Self {
            store,
            llm,
            reranker: None,
            filters: TicketFilters::default(),
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Vector search over both collections with a shared embedding.
    async fn vector_both(
        &self,
        embedding: &[f32],
        per_collection: usize,
    ) -> (Vec<RetrievedContext>, Vec<String>, usize) {
        let (bugs, releases) = tokio::join!(
            self.store.vector_search_with_embedding(
                embedding,
                Collection::Bugs,
                per_collection,
                None,
                &self.filters,
            ),
            self.store.vector_search_with_embedding(
                embedding,
                Collection::Releases,
                per_collection,
                None,
                &self.filters,
            ),
        );

        let mut contexts = Vec::new();
        let mut warnings = Vec::new();
        let mut failures = 0usize;
        for (collection, result) in [(Collection::Bugs, bugs), (Collection::Releases, releases)] {
            match result {
                Ok(outcome) => {
                    let mut list = outcome.contexts;
                    retag(&mut list, StrategyKind::Ensemble, collection);
                    warnings.extend(outcome.warnings);
                    contexts.extend(list);
                }
                Err(e) => {
                    warnings.push(format!("vector search on {collection} failed: {e}"));
                    failures += 1;
                }
            }
        }
        (contexts, warnings, failures)
    }

    /// Ask the fast model for query paraphrases. Errors and malformed
    /// output degrade to an empty expansion, never fail the strategy.
    async fn paraphrase(&self, query: &str) -> Vec<String> {
        let messages = [
            Message::system(
                "You rewrite search queries for an engineering ticket tracker. \
                 Respond with a JSON object: {\"queries\": [\"...\"]}.",
            ),
            Message::user(format!(
                "Produce up to {MAX_PARAPHRASES} alternative phrasings of this query. \
                 Keep technical terms intact.\n\nQuery: {query}"
            )),
        ];

        let text = match self.llm.generate(&messages).await {
            Ok(result) => result.text,
            Err(e) => {
                tracing::warn!(error = %e, "multi-query expansion failed");
                return Vec::new();
            }
        };

        #[derive(Deserialize)]
        struct ParaphraseResponse {
            queries: Vec<String>,
        }

        let parsed = extract_json(&text)
            .and_then(|json| serde_json::from_str::<ParaphraseResponse>(json).ok());

        let candidates = match parsed {
            Some(response) => response.queries,
            // Tolerate line-per-query output from smaller models.
            None => text.lines().map(|l| l.trim().to_string()).collect(),
        };

        candidates
            .into_iter()
            .map(|q| q.trim_matches(|c: char| c == '-' || c == '*' || c.is_whitespace()).to_string())
            .filter(|q| !q.is_empty() && !q.eq_ignore_ascii_case(query))
            .take(MAX_PARAPHRASES)
            .collect()
    }

    /// Multi-query expansion: vector search each paraphrase, union results.
    async fn multi_query(
        &self,
        query: &str,
        k: usize,
    ) -> Result<(Vec<RetrievedContext>, Vec<String>), Error> {
        let paraphrases = self.paraphrase(query).await;
        if paraphrases.is_empty() {
            return Ok((Vec::new(), vec!["query expansion produced no paraphrases".to_string()]));
        }

        let mut contexts = Vec::new();
        let mut warnings = Vec::new();
        let mut failures = 0usize;

        for paraphrase in &paraphrases {
            match self.store.embed_query(paraphrase).await {
                Ok(embedding) => {
                    let (list, warns, fails) = self.vector_both(&embedding, k).await;
                    contexts.extend(list);
                    warnings.extend(warns);
                    if fails == 2 {
                        failures += 1;
                    }
                }
                Err(e) => {
                    warnings.push(format!("paraphrase embedding failed: {e}"));
                    failures += 1;
                }
            }
        }

        if failures == paraphrases.len() {
            return Err(Error::StrategyFailed(
                "every expanded query failed".to_string(),
            ));
        }
        Ok((contexts, warnings))
    }

    /// Compression sub-retrieval: 2k candidates, reranked when possible.
    async fn compression(
        &self,
        query: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<(Vec<RetrievedContext>, Vec<String>, bool), Error> {
        let (candidates, mut warnings, failures) =
            self.vector_both(embedding, k.saturating_mul(2).max(1)).await;
        if failures == 2 {
            return Err(Error::StrategyFailed(
                "compression vector search failed on every collection".to_string(),
            ));
        }

        if let Some(ref reranker) = self.reranker {
            if !candidates.is_empty() {
                match reranker.rerank(query, candidates.clone(), k).await {
                    Ok(reranked) => return Ok((reranked, warnings, true)),
                    Err(e) => {
                        warnings.push(format!("reranker failed, raw vector ordering kept: {e}"));
                    }
                }
            }
        }
        Ok((topk(candidates, k), warnings, false))
    }

    /// Keyword sub-retrieval across both collections.
    async fn keyword(
        &self,
        query: &str,
        k: usize,
    ) -> Result<(Vec<RetrievedContext>, Vec<String>, bool), Error> {
        let (bugs, releases) = tokio::join!(
            self.store
                .keyword_search(query, Collection::Bugs, k, &self.filters),
            self.store
                .keyword_search(query, Collection::Releases, k, &self.filters),
        );

        let mut contexts = Vec::new();
        let mut warnings = Vec::new();
        let mut used_index = false;
        let mut failures = 0usize;
        for (collection, result) in [(Collection::Bugs, bugs), (Collection::Releases, releases)] {
            match result {
                Ok(outcome) => {
                    let mut list = outcome.contexts;
                    retag(&mut list, StrategyKind::Ensemble, collection);
                    used_index |= outcome.keyword_index_used;
                    warnings.extend(outcome.warnings);
                    contexts.extend(list);
                }
                Err(e) => {
                    warnings.push(format!("keyword search on {collection} failed: {e}"));
                    failures += 1;
                }
            }
        }

        if failures == 2 {
            return Err(Error::StrategyFailed(
                "keyword search failed on every collection".to_string(),
            ));
        }
        Ok((contexts, warnings, used_index))
    }
}

#[async_trait]
impl RetrievalStrategy for EnsembleStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Ensemble
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

        // One embedding of the original query, shared by the compression
        // and naive sub-retrievals. If embedding itself fails those two
        // sub-retrievals fail, but multi-query and keyword can still run.
        let embedding = match self.store.embed_query(query).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                metadata.warn(format!("query embedding failed: {e}"));
                None
            }
        };

        let compression_fut = async {
            match &embedding {
                Some(embedding) => self.compression(query, embedding, k).await,
                None => Err(Error::StrategyFailed("no query embedding".to_string())),
            }
        };
        let naive_fut = async {
            match &embedding {
                Some(embedding) => {
                    let (contexts, warnings, failures) = self.vector_both(embedding, k).await;
                    if failures == 2 {
                        Err(Error::StrategyFailed(
                            "naive vector search failed on every collection".to_string(),
                        ))
                    } else {
                        Ok((contexts, warnings))
                    }
                }
                None => Err(Error::StrategyFailed("no query embedding".to_string())),
            }
        };

        let (multi, compression, keyword, naive) = tokio::join!(
            self.multi_query(query, k),
            compression_fut,
            self.keyword(query, k),
            naive_fut,
        );

        let mut lists: Vec<Vec<RetrievedContext>> = Vec::with_capacity(4);
        let mut failures = 0usize;

        match multi {
            Ok((contexts, warnings)) => {
                metadata.record_method("multi_query", contexts.len());
                metadata.warnings.extend(warnings);
                lists.push(contexts);
            }
            Err(e) => {
                metadata.warn(format!("multi_query sub-retrieval failed: {e}"));
                failures += 1;
                lists.push(Vec::new());
            }
        }

        match compression {
            Ok((contexts, warnings, reranked)) => {
                metadata.record_method("compression", contexts.len());
                metadata.reranker_used |= reranked;
                metadata.warnings.extend(warnings);
                lists.push(contexts);
            }
            Err(e) => {
                metadata.warn(format!("compression sub-retrieval failed: {e}"));
                failures += 1;
                lists.push(Vec::new());
            }
        }

        match keyword {
            Ok((contexts, warnings, used_index)) => {
                metadata.record_method("keyword", contexts.len());
                metadata.keyword_index_used |= used_index;
                metadata.warnings.extend(warnings);
                lists.push(contexts);
            }
            Err(e) => {
                metadata.warn(format!("keyword sub-retrieval failed: {e}"));
                failures += 1;
                lists.push(Vec::new());
            }
        }

        match naive {
            Ok((contexts, warnings)) => {
                metadata.record_method("naive", contexts.len());
                metadata.warnings.extend(warnings);
                lists.push(contexts);
            }
            Err(e) => {
                metadata.warn(format!("naive sub-retrieval failed: {e}"));
                failures += 1;
                lists.push(Vec::new());
            }
        }

        if failures == 4 {
            return Err(Error::StrategyFailed(
                "all four ensemble sub-retrievals failed".to_string(),
            ));
        }

        let fused = fuse(&lists, &[0.25, 0.25, 0.25, 0.25]);
        Ok(StrategyOutput {
            contexts: topk(fused, k),
            metadata,
        })
    }

    async fn ready(&self) -> bool {
        self.store.ready().await
    }
}
