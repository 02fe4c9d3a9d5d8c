//! Centralized constants
//!
//! Single source of truth for endpoints and engine tuning defaults. Values
//! that vary per deployment live in `Settings`; these are the documented
//! operational defaults they start from.

/// Service endpoints (env var override with fallback default)
pub mod endpoints {
    use once_cell::sync::Lazy;

    /// OpenAI-compatible API base (env: OPENAI_API_BASE)
    pub static OPENAI_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
    });

    /// Qdrant endpoint for the primary ticket store (env: QDRANT_URL)
    pub static QDRANT_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
    });

    /// Tavily search API (env: TAVILY_API_BASE)
    pub static TAVILY_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("TAVILY_API_BASE").unwrap_or_else(|_| "https://api.tavily.com".to_string())
    });

    /// Log store query API (env: LOG_STORE_URL)
    pub static LOG_STORE_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("LOG_STORE_URL").unwrap_or_else(|_| "http://127.0.0.1:8181".to_string())
    });
}

/// Retrieval tuning defaults
pub mod retrieval {
    /// Embedding dimension of the ticket corpus
    pub const EMBEDDING_DIM: usize = 1536;

    /// Results returned to the caller per request
    pub const DEFAULT_TOP_K: usize = 10;

    /// Hybrid fusion weight for vector scores
    pub const VECTOR_WEIGHT: f32 = 0.7;

    /// Hybrid fusion weight for keyword scores
    pub const KEYWORD_WEIGHT: f32 = 0.3;

    /// Documented operational floor for cosine similarity
    pub const SIMILARITY_THRESHOLD: f32 = 0.1;

    /// Equal weight for each of the four ensemble sub-retrievals
    pub const ENSEMBLE_WEIGHT: f32 = 0.25;

    /// Bounded fan-out for planned web/log searches
    pub const FANOUT: usize = 3;

    /// Candidate multiplier for client-side vector fallback (`3k` rows)
    pub const CANDIDATE_MULTIPLIER: usize = 3;

    /// Uniform score assigned by the substring-scan keyword fallback
    pub const SUBSTRING_FALLBACK_SCORE: f32 = 0.5;
}

/// Per-strategy execution budgets (ms)
pub mod timeouts {
    pub const BM25_MS: u64 = 5_000;
    pub const COMPRESSION_MS: u64 = 10_000;
    pub const ENSEMBLE_MS: u64 = 30_000;
    pub const WEB_SEARCH_MS: u64 = 20_000;
    pub const LOG_SEARCH_MS: u64 = 20_000;

    /// Response-composition budget added on top of the strategy budget
    pub const COMPOSE_MS: u64 = 5_000;
}

/// Retry backoff for transient upstream failures
pub mod backoff {
    pub const BASE_MS: u64 = 250;
    pub const CAP_MS: u64 = 4_000;
    pub const MAX_ATTEMPTS: u32 = 3;
}

/// Planner caps
pub mod planners {
    /// Maximum refined searches a web plan may carry
    pub const WEB_MAX_SEARCHES: usize = 5;

    /// Maximum log queries a log plan may carry
    pub const LOG_MAX_SEARCHES: usize = 5;

    /// Paraphrases requested by ensemble multi-query expansion
    pub const MULTI_QUERY_PARAPHRASES: usize = 3;

    /// Default log window, hours
    pub const LOG_WINDOW_HOURS: i64 = 1;

    /// Widened log window during production incidents, hours
    pub const LOG_INCIDENT_WINDOW_HOURS: i64 = 72;
}
