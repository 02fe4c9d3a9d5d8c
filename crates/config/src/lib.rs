//! Configuration for the ticket RAG engine
//!
//! Layered loading: `config/default.yaml` → `config/{env}.yaml` →
//! `TICKET_RAG__`-prefixed environment variables. All sections carry serde
//! defaults so the engine also runs with no files present.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, EmbeddingSettings, FallbackStoreSettings, LlmSettings, LlmTierSettings,
    LogSearchSettings, PrimaryStoreSettings, RerankerSettings, RetrievalSettings,
    RuntimeEnvironment, ServerSettings, Settings, StoreBackendKind, StoreSettings,
    WebSearchSettings, WorkflowSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("config load error: {0}")]
    Load(#[from] config::ConfigError),
}
