//! LLM integration module

pub mod provider;

pub use provider::*;

use std::sync::Arc;

use crate::config::{ConfigError, LlmConfig};

/// Build the provider named by the LLM config.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    let provider_config = config.to_provider_config()?;
    let counter: Arc<dyn TokenCounter> = Arc::new(SimpleTokenCounter::new());
    let invalid = |e: ProviderError| ConfigError::Invalid(e.to_string());

    let provider: Arc<dyn LlmProvider> = match provider_config.provider_type {
        ProviderType::Anthropic => {
            Arc::new(AnthropicProvider::new(provider_config, counter).map_err(invalid)?)
        }
        ProviderType::OpenAi | ProviderType::Azure | ProviderType::Ollama => {
            Arc::new(OpenAiProvider::new(provider_config, counter).map_err(invalid)?)
        }
    };
    tracing::debug!(provider = provider.name(), model = %config.model, "LLM provider ready");
    Ok(provider)
}
