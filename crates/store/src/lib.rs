//! Ticket store and embedding client
//!
//! Two interchangeable back-ends serve the `bugs` and `releases`
//! collections:
//! - **primary**: Qdrant cosine nearest-neighbor plus a local tantivy BM25
//!   index for keyword ranking
//! - **fallback**: Postgres with a vector extension, keyword ranking via
//!   `ts_rank`, client-side cosine scoring when the nearest-neighbor
//!   routine is unavailable
//!
//! The `TicketStore` facade selects back-ends per the configured mode
//! (`auto` tries primary then fallback per call) and exposes vector,
//! keyword, and hybrid operations with graceful degradation: a failed
//! sub-query in hybrid mode yields the surviving list plus a warning, and
//! an empty result set is success, never an error.

pub mod backend;
pub mod client;
pub mod embeddings;
pub mod keyword_index;
pub mod postgres;
pub mod qdrant;

pub use backend::{KeywordHit, KeywordResults, TicketBackend, VectorHit};
pub use client::{SearchOutcome, TicketStore};
pub use embeddings::{EmbeddingClient, EmbeddingConfig};
pub use keyword_index::KeywordIndex;
pub use postgres::PostgresBackend;
pub use qdrant::QdrantBackend;

use thiserror::Error;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("back-end error: {0}")]
    Backend(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("no back-end available: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<StoreError> for ticket_rag_core::Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidInput(msg) => ticket_rag_core::Error::InvalidInput(msg),
            StoreError::Auth(msg) => ticket_rag_core::Error::UpstreamPermanent(msg),
            StoreError::Transient(msg) => ticket_rag_core::Error::UpstreamTransient(msg),
            other => ticket_rag_core::Error::Store(other.to_string()),
        }
    }
}
