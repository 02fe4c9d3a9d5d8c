//! LLM integration
//!
//! Two logical tiers share one backend trait: a fast tier for the web/log
//! planners and multi-query expansion, and a strong tier for the supervisor
//! classifier and the response writer.

pub mod backend;
pub mod factory;
pub mod json;
pub mod prompt;

pub use backend::{GenerationResult, LlmBackend, OpenAiBackend, OpenAiConfig};
pub use factory::{build_tier, build_tiers, LlmTier, LlmTiers};
pub use json::extract_json;
pub use prompt::{Message, Role};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Network(_) | LlmError::Timeout)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for ticket_rag_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Auth(msg) => ticket_rag_core::Error::UpstreamPermanent(msg),
            LlmError::Network(msg) => ticket_rag_core::Error::UpstreamTransient(msg),
            LlmError::Timeout => {
                ticket_rag_core::Error::UpstreamTransient("llm request timed out".to_string())
            }
            LlmError::Configuration(msg) => ticket_rag_core::Error::Fatal(msg),
            other => ticket_rag_core::Error::Llm(other.to_string()),
        }
    }
}
