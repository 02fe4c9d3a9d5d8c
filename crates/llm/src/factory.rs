//! Backend construction from settings

use std::sync::Arc;
use std::time::Duration;

use ticket_rag_config::{LlmSettings, LlmTierSettings};

use crate::backend::{LlmBackend, OpenAiBackend, OpenAiConfig};
use crate::LlmError;

/// The two logical tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmTier {
    /// Planner tier: web/log planners, multi-query expansion
    Fast,
    /// Supervisor classifier and response writer
    Strong,
}

impl LlmTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmTier::Fast => "fast",
            LlmTier::Strong => "strong",
        }
    }
}

/// Both tiers, shared across requests
#[derive(Clone)]
pub struct LlmTiers {
    pub fast: Arc<dyn LlmBackend>,
    pub strong: Arc<dyn LlmBackend>,
}

impl LlmTiers {
    pub fn get(&self, tier: LlmTier) -> Arc<dyn LlmBackend> {
        match tier {
            LlmTier::Fast => Arc::clone(&self.fast),
            LlmTier::Strong => Arc::clone(&self.strong),
        }
    }
}

/// Build one tier from its settings.
///
/// The API key is read from the env var named in settings; a missing key
/// for a remote endpoint is a configuration error the caller treats as
/// fatal at startup.
pub fn build_tier(settings: &LlmTierSettings, tier: LlmTier) -> Result<OpenAiBackend, LlmError> {
    let api_key = std::env::var(&settings.api_key_env).unwrap_or_default();
    if api_key.is_empty() && !settings.endpoint.starts_with("http://localhost") {
        return Err(LlmError::Configuration(format!(
            "{} tier: env var {} is not set",
            tier.as_str(),
            settings.api_key_env
        )));
    }

    tracing::info!(
        tier = tier.as_str(),
        model = %settings.model,
        endpoint = %settings.endpoint,
        "Building LLM backend"
    );

    OpenAiBackend::new(OpenAiConfig {
        endpoint: settings.endpoint.clone(),
        api_key,
        model: settings.model.clone(),
        max_tokens: settings.max_tokens,
        temperature: settings.temperature,
        timeout: Duration::from_millis(settings.timeout_ms),
        ..Default::default()
    })
}

/// Build both tiers from settings.
pub fn build_tiers(settings: &LlmSettings) -> Result<LlmTiers, LlmError> {
    Ok(LlmTiers {
        fast: Arc::new(build_tier(&settings.fast, LlmTier::Fast)?),
        strong: Arc::new(build_tier(&settings.strong, LlmTier::Strong)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_tier_local_endpoint() {
        let settings = LlmTierSettings {
            endpoint: "http://localhost:11434/v1".to_string(),
            api_key_env: "TICKET_RAG_TEST_UNSET_KEY".to_string(),
            model: "llama3".to_string(),
            max_tokens: 128,
            temperature: 0.0,
            timeout_ms: 5_000,
        };
        let backend = build_tier(&settings, LlmTier::Fast).unwrap();
        assert_eq!(backend.model_name(), "llama3");
    }

    #[test]
    fn test_build_tier_remote_requires_key() {
        let settings = LlmTierSettings {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key_env: "TICKET_RAG_TEST_UNSET_KEY".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 128,
            temperature: 0.0,
            timeout_ms: 5_000,
        };
        assert!(build_tier(&settings, LlmTier::Strong).is_err());
    }
}
