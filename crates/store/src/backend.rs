//! Ticket back-end trait
//!
//! Both the primary (Qdrant + tantivy) and fallback (Postgres) back-ends
//! expose the same two primitive searches over the same collections; the
//! facade builds hybrid search and back-end selection on top.

use async_trait::async_trait;
use std::collections::HashMap;

use ticket_rag_core::{Collection, TicketFilters};

use crate::StoreError;

/// A vector search hit: similarity already in [0, 1]
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub similarity: f32,
}

/// A keyword search hit: raw rank score, comparable only within its batch
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub rank: f32,
}

/// Keyword results plus how they were produced
#[derive(Debug, Clone, Default)]
pub struct KeywordResults {
    pub hits: Vec<KeywordHit>,
    /// False when the lexical index was absent and a substring scan ran.
    /// Substring-scan ranks are final uniform scores, not rescaled.
    pub used_index: bool,
}

/// One ticket store back-end
#[async_trait]
pub trait TicketBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// k nearest neighbors by cosine similarity with `sim ≥ threshold`.
    async fn vector_search(
        &self,
        collection: Collection,
        query_embedding: &[f32],
        k: usize,
        threshold: f32,
        filters: &TicketFilters,
    ) -> Result<Vec<VectorHit>, StoreError>;

    /// Full-text ranked search; degrades to a substring scan when the
    /// lexical index is absent.
    async fn keyword_search(
        &self,
        collection: Collection,
        query: &str,
        k: usize,
        filters: &TicketFilters,
    ) -> Result<KeywordResults, StoreError>;

    async fn ready(&self) -> bool;
}
