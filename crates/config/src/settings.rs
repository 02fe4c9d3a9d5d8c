//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{backoff, endpoints, planners, retrieval, timeouts};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub retrieval: RetrievalSettings,

    #[serde(default)]
    pub web: WebSearchSettings,

    #[serde(default)]
    pub logs: LogSearchSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub workflow: WorkflowSettings,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default = "default_openai_endpoint")]
    pub endpoint: String,
    /// Name of the env var holding the API key
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dim")]
    pub dimension: usize,
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
    /// Inputs longer than this are rejected as invalid
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

fn default_openai_endpoint() -> String {
    endpoints::OPENAI_DEFAULT.clone()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dim() -> usize {
    retrieval::EMBEDDING_DIM
}

fn default_embedding_timeout_ms() -> u64 {
    10_000
}

fn default_max_input_chars() -> usize {
    32_000
}

fn default_max_retries() -> u32 {
    backoff::MAX_ATTEMPTS
}

fn default_backoff_base_ms() -> u64 {
    backoff::BASE_MS
}

fn default_backoff_cap_ms() -> u64 {
    backoff::CAP_MS
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: default_openai_endpoint(),
            api_key_env: default_openai_key_env(),
            model: default_embedding_model(),
            dimension: default_embedding_dim(),
            timeout_ms: default_embedding_timeout_ms(),
            max_input_chars: default_max_input_chars(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

/// Which ticket store back-end serves queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// Dedicated vector store + local BM25 index
    Primary,
    /// Relational store with a vector extension
    Fallback,
    /// Try primary, degrade to fallback per call
    #[default]
    Auto,
}

/// Ticket store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackendKind,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default)]
    pub primary: PrimaryStoreSettings,
    #[serde(default)]
    pub fallback: FallbackStoreSettings,
}

fn default_similarity_threshold() -> f32 {
    retrieval::SIMILARITY_THRESHOLD
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::default(),
            similarity_threshold: default_similarity_threshold(),
            primary: PrimaryStoreSettings::default(),
            fallback: FallbackStoreSettings::default(),
        }
    }
}

/// Qdrant + tantivy primary back-end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryStoreSettings {
    #[serde(default = "default_qdrant_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_qdrant_key_env")]
    pub api_key_env: String,
    /// Collections are named `{prefix}{collection}`
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
    /// BM25 index directory; absence degrades keyword search
    #[serde(default)]
    pub keyword_index_dir: Option<String>,
}

fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.clone()
}

fn default_qdrant_key_env() -> String {
    "QDRANT_API_KEY".to_string()
}

fn default_collection_prefix() -> String {
    "tickets_".to_string()
}

impl Default for PrimaryStoreSettings {
    fn default() -> Self {
        Self {
            endpoint: default_qdrant_endpoint(),
            api_key_env: default_qdrant_key_env(),
            collection_prefix: default_collection_prefix(),
            keyword_index_dir: None,
        }
    }
}

/// Postgres fallback back-end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackStoreSettings {
    /// Name of the env var holding the connection string
    #[serde(default = "default_database_url_env")]
    pub database_url_env: String,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    /// Candidate rows fetched for client-side scoring: `multiplier × k`
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
}

fn default_database_url_env() -> String {
    "TICKET_DATABASE_URL".to_string()
}

fn default_statement_timeout_ms() -> u64 {
    5_000
}

fn default_candidate_multiplier() -> usize {
    retrieval::CANDIDATE_MULTIPLIER
}

impl Default for FallbackStoreSettings {
    fn default() -> Self {
        Self {
            database_url_env: default_database_url_env(),
            statement_timeout_ms: default_statement_timeout_ms(),
            candidate_multiplier: default_candidate_multiplier(),
        }
    }
}

/// Strategy-level retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
    #[serde(default = "default_fanout")]
    pub fanout: usize,
    #[serde(default)]
    pub reranker: RerankerSettings,
}

fn default_top_k() -> usize {
    retrieval::DEFAULT_TOP_K
}

fn default_vector_weight() -> f32 {
    retrieval::VECTOR_WEIGHT
}

fn default_keyword_weight() -> f32 {
    retrieval::KEYWORD_WEIGHT
}

fn default_fanout() -> usize {
    retrieval::FANOUT
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            fanout: default_fanout(),
            reranker: RerankerSettings::default(),
        }
    }
}

/// Cross-encoder reranker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_reranker_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_reranker_model")]
    pub model: String,
    #[serde(default = "default_reranker_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_reranker_key_env() -> String {
    "RERANKER_API_KEY".to_string()
}

fn default_reranker_model() -> String {
    "rerank-english-v3.0".to_string()
}

fn default_reranker_timeout_ms() -> u64 {
    5_000
}

impl Default for RerankerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            api_key_env: default_reranker_key_env(),
            model: default_reranker_model(),
            timeout_ms: default_reranker_timeout_ms(),
        }
    }
}

/// Web search provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchSettings {
    #[serde(default = "default_tavily_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_tavily_key_env")]
    pub api_key_env: String,
    /// Provider tag recorded in context sources (`web_<provider>`)
    #[serde(default = "default_web_provider")]
    pub provider: String,
    #[serde(default = "default_web_max_searches")]
    pub max_searches: usize,
    #[serde(default = "default_web_max_results")]
    pub max_results: usize,
    #[serde(default = "default_web_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_tavily_endpoint() -> String {
    endpoints::TAVILY_DEFAULT.clone()
}

fn default_tavily_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}

fn default_web_provider() -> String {
    "tavily".to_string()
}

fn default_web_max_searches() -> usize {
    planners::WEB_MAX_SEARCHES
}

fn default_web_max_results() -> usize {
    retrieval::DEFAULT_TOP_K
}

fn default_web_timeout_ms() -> u64 {
    timeouts::WEB_SEARCH_MS
}

impl Default for WebSearchSettings {
    fn default() -> Self {
        Self {
            endpoint: default_tavily_endpoint(),
            api_key_env: default_tavily_key_env(),
            provider: default_web_provider(),
            max_searches: default_web_max_searches(),
            max_results: default_web_max_results(),
            timeout_ms: default_web_timeout_ms(),
        }
    }
}

/// Log store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSearchSettings {
    #[serde(default = "default_log_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_log_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_log_max_searches")]
    pub max_searches: usize,
    #[serde(default = "default_log_window_hours")]
    pub default_window_hours: i64,
    #[serde(default = "default_incident_window_hours")]
    pub incident_window_hours: i64,
    /// Exception classes the planner may target; extensible per deployment
    #[serde(default = "default_exception_types")]
    pub exception_types: Vec<String>,
}

fn default_log_endpoint() -> String {
    endpoints::LOG_STORE_DEFAULT.clone()
}

fn default_log_key_env() -> String {
    "LOG_STORE_API_KEY".to_string()
}

fn default_log_max_searches() -> usize {
    planners::LOG_MAX_SEARCHES
}

fn default_log_window_hours() -> i64 {
    planners::LOG_WINDOW_HOURS
}

fn default_incident_window_hours() -> i64 {
    planners::LOG_INCIDENT_WINDOW_HOURS
}

fn default_exception_types() -> Vec<String> {
    vec![
        "CertificateExpiredException".to_string(),
        "HttpServerErrorException".to_string(),
        "DiskSpaceExceededException".to_string(),
        "DeadLetterQueueExceededException".to_string(),
    ]
}

impl Default for LogSearchSettings {
    fn default() -> Self {
        Self {
            endpoint: default_log_endpoint(),
            api_key_env: default_log_key_env(),
            max_searches: default_log_max_searches(),
            default_window_hours: default_log_window_hours(),
            incident_window_hours: default_incident_window_hours(),
            exception_types: default_exception_types(),
        }
    }
}

/// One LLM tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmTierSettings {
    #[serde(default = "default_openai_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    pub model: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_llm_max_tokens() -> usize {
    1024
}

fn default_llm_temperature() -> f32 {
    0.2
}

fn default_llm_timeout_ms() -> u64 {
    30_000
}

/// The two logical LLM tiers: fast planners, strong synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_fast_tier")]
    pub fast: LlmTierSettings,
    #[serde(default = "default_strong_tier")]
    pub strong: LlmTierSettings,
}

fn default_fast_tier() -> LlmTierSettings {
    LlmTierSettings {
        endpoint: default_openai_endpoint(),
        api_key_env: default_openai_key_env(),
        model: "gpt-4o-mini".to_string(),
        max_tokens: 512,
        temperature: default_llm_temperature(),
        timeout_ms: 15_000,
    }
}

fn default_strong_tier() -> LlmTierSettings {
    LlmTierSettings {
        endpoint: default_openai_endpoint(),
        api_key_env: default_openai_key_env(),
        model: "gpt-4o".to_string(),
        max_tokens: default_llm_max_tokens(),
        temperature: default_llm_temperature(),
        timeout_ms: default_llm_timeout_ms(),
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            fast: default_fast_tier(),
            strong: default_strong_tier(),
        }
    }
}

/// Orchestrator budgets and routing switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default = "default_bm25_timeout")]
    pub bm25_timeout_ms: u64,
    #[serde(default = "default_compression_timeout")]
    pub compression_timeout_ms: u64,
    #[serde(default = "default_ensemble_timeout")]
    pub ensemble_timeout_ms: u64,
    #[serde(default = "default_web_timeout")]
    pub web_search_timeout_ms: u64,
    #[serde(default = "default_log_timeout")]
    pub log_search_timeout_ms: u64,
    #[serde(default = "default_compose_budget")]
    pub compose_budget_ms: u64,
    /// Consult the LLM classifier when the rule table is ambiguous
    #[serde(default)]
    pub supervisor_llm_enabled: bool,
}

fn default_bm25_timeout() -> u64 {
    timeouts::BM25_MS
}

fn default_compression_timeout() -> u64 {
    timeouts::COMPRESSION_MS
}

fn default_ensemble_timeout() -> u64 {
    timeouts::ENSEMBLE_MS
}

fn default_web_timeout() -> u64 {
    timeouts::WEB_SEARCH_MS
}

fn default_log_timeout() -> u64 {
    timeouts::LOG_SEARCH_MS
}

fn default_compose_budget() -> u64 {
    timeouts::COMPOSE_MS
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            bm25_timeout_ms: default_bm25_timeout(),
            compression_timeout_ms: default_compression_timeout(),
            ensemble_timeout_ms: default_ensemble_timeout(),
            web_search_timeout_ms: default_web_timeout(),
            log_search_timeout_ms: default_log_timeout(),
            compose_budget_ms: default_compose_budget(),
            supervisor_llm_enabled: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate ranges and cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.dimension".to_string(),
                message: "must be positive".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.store.similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "store.similarity_threshold".to_string(),
                message: format!(
                    "must be between 0.0 and 1.0, got {}",
                    self.store.similarity_threshold
                ),
            });
        }

        for (field, value) in [
            ("retrieval.vector_weight", self.retrieval.vector_weight),
            ("retrieval.keyword_weight", self.retrieval.keyword_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("must be between 0.0 and 1.0, got {value}"),
                });
            }
        }

        let weight_sum = self.retrieval.vector_weight + self.retrieval.keyword_weight;
        if (weight_sum - 1.0).abs() > 1e-3 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.vector_weight".to_string(),
                message: format!("vector + keyword weights must sum to 1.0, got {weight_sum}"),
            });
        }

        if self.retrieval.default_top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.default_top_k".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.retrieval.fanout == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.fanout".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        for (field, value) in [
            ("workflow.bm25_timeout_ms", self.workflow.bm25_timeout_ms),
            (
                "workflow.compression_timeout_ms",
                self.workflow.compression_timeout_ms,
            ),
            (
                "workflow.ensemble_timeout_ms",
                self.workflow.ensemble_timeout_ms,
            ),
            (
                "workflow.web_search_timeout_ms",
                self.workflow.web_search_timeout_ms,
            ),
            (
                "workflow.log_search_timeout_ms",
                self.workflow.log_search_timeout_ms,
            ),
            ("workflow.compose_budget_ms", self.workflow.compose_budget_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be positive".to_string(),
                });
            }
        }

        if self.logs.default_window_hours <= 0 || self.logs.incident_window_hours <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "logs.default_window_hours".to_string(),
                message: "log windows must be positive".to_string(),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority: env vars > `config/{env}.yaml` > `config/default.yaml` >
/// compiled defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("TICKET_RAG")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.embedding.dimension, 1536);
        assert_eq!(settings.store.backend, StoreBackendKind::Auto);
        assert_eq!(settings.store.similarity_threshold, 0.1);
        assert_eq!(settings.retrieval.default_top_k, 10);
        assert_eq!(settings.logs.exception_types.len(), 4);
    }

    #[test]
    fn test_weight_sum_validated() {
        let mut settings = Settings::default();
        settings.retrieval.vector_weight = 0.9;
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_similarity_threshold_range() {
        let mut settings = Settings::default();
        settings.store.similarity_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut settings = Settings::default();
        settings.workflow.ensemble_timeout_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_default_strategy_timeouts() {
        let wf = WorkflowSettings::default();
        assert_eq!(wf.bm25_timeout_ms, 5_000);
        assert_eq!(wf.compression_timeout_ms, 10_000);
        assert_eq!(wf.ensemble_timeout_ms, 30_000);
        assert_eq!(wf.web_search_timeout_ms, 20_000);
        assert_eq!(wf.log_search_timeout_ms, 20_000);
        assert_eq!(wf.compose_budget_ms, 5_000);
    }
}
