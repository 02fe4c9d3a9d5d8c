//! Core types and traits for the ticket RAG engine
//!
//! Shared by every other crate in the workspace:
//! - The canonical retrieved-context record and ticket document model
//! - Score normalization, weighted fusion, and deterministic top-k selection
//! - The `RetrievalStrategy` capability trait all five strategies implement
//! - The cross-crate error enum member-crate errors convert into

pub mod context;
pub mod document;
pub mod fusion;
pub mod plan;
pub mod traits;

pub use context::{meta, RetrievedContext, TicketRef};
pub use document::{Collection, Document, TicketFilters};
pub use fusion::{content_hash, cosine_similarity, fuse, normalize_cosine, normalize_rank_scores, topk};
pub use plan::{QueryHints, QueryPlan, StrategyKind};
pub use traits::{RetrievalMetadata, RetrievalStrategy, StrategyOutput};

use thiserror::Error;

/// Engine-wide errors
///
/// The first block mirrors the failure taxonomy the orchestrator reasons
/// about; the second carries member-crate errors across crate boundaries.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad caller input. The only validation failure surfaced to clients.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Network or provider 5xx. Retried with jitter inside the client.
    #[error("transient upstream failure: {0}")]
    UpstreamTransient(String),

    /// Auth, quota, or schema mismatch. Not retried.
    #[error("permanent upstream failure: {0}")]
    UpstreamPermanent(String),

    /// All sub-retrievals of a strategy failed or exceeded budget.
    #[error("strategy failed: {0}")]
    StrategyFailed(String),

    /// The fallback strategy also failed.
    #[error("workflow failed: {0}")]
    WorkflowFailed(String),

    /// Misconfiguration detected at startup, never per-request.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("ticket store error: {0}")]
    Store(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("retrieval error: {0}")]
    Retrieval(String),
}

impl Error {
    /// Whether a client may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::UpstreamTransient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::UpstreamTransient("503".into()).is_retryable());
        assert!(!Error::UpstreamPermanent("401".into()).is_retryable());
        assert!(!Error::Fatal("no api key".into()).is_retryable());
    }
}
