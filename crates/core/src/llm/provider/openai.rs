//! OpenAI Provider Implementation
//!
//! Supports:
//! - OpenAI API (Chat Completions)
//! - Azure OpenAI deployments
//! - Compatible APIs (Ollama, vLLM, LiteLLM proxies)

use super::*;
use reqwest::{Client, StatusCode};
use std::sync::Arc;

/// OpenAI Provider
#[derive(Clone)]
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: Client,
    token_counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.config.name)
            .field("default_model", &self.config.default_model)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    /// Create a new OpenAI provider
    pub fn new(
        config: ProviderConfig,
        token_counter: Arc<dyn TokenCounter>,
    ) -> Result<Self, ProviderError> {
        let client = build_http_client(&config)?;

        Ok(Self {
            config,
            client,
            token_counter,
        })
    }

    /// Get base URL for API calls
    fn get_base_url(&self) -> String {
        match (&self.config.base_url, self.config.provider_type) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, ProviderType::Ollama) => "http://localhost:11434/v1".to_string(),
            (None, _) => "https://api.openai.com/v1".to_string(),
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages.iter().map(|m| serde_json::json!({
                "role": m.role,
                "content": m.content,
            })).collect::<Vec<_>>(),
            "temperature": request.temperature.unwrap_or(0.1),
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(stop) = &request.stop {
            body["stop"] = serde_json::json!(stop);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_type(&self) -> ProviderType {
        self.config.provider_type
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.get_base_url());

        let estimated = self.estimate_tokens(request).total_tokens as usize;
        let limit = self.token_counter.get_max_tokens(&request.model);
        if estimated > limit {
            return Err(ProviderError::ContextLengthExceeded {
                length: estimated,
                max_length: limit,
            });
        }

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.build_body(request));

        if self.config.provider_type == ProviderType::Azure {
            builder = builder.header("api-key", &self.config.api_key);
        }
        if let Some(org) = &self.config.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        let response = builder.send().await.map_err(map_provider_error)?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST {
            let error: serde_json::Value = response
                .json()
                .await
                .unwrap_or_else(|_| serde_json::json!({}));
            let message = error["error"]["message"]
                .as_str()
                .unwrap_or("Invalid request")
                .to_string();
            return Err(ProviderError::InvalidRequest { message });
        }

        let response = response.error_for_status().map_err(map_provider_error)?;

        let response: CompletionResponse = response.json().await.map_err(|e| ProviderError::Api {
            message: format!("Failed to parse response: {}", e),
            status_code: None,
        })?;

        if response.choices.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        Ok(response)
    }

    fn estimate_tokens(&self, request: &CompletionRequest) -> Usage {
        let prompt_tokens = self
            .token_counter
            .count_messages(&request.messages, &request.model);
        let completion_tokens = request.max_tokens.unwrap_or(1024) as usize;
        Usage {
            prompt_tokens: prompt_tokens as u32,
            completion_tokens: completion_tokens as u32,
            total_tokens: (prompt_tokens + completion_tokens) as u32,
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

/// Create a basic OpenAI configuration
pub fn create_openai_config(name: &str, api_key: &str, default_model: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        provider_type: ProviderType::OpenAi,
        api_key: api_key.to_string(),
        base_url: None,
        organization: None,
        default_model: default_model.to_string(),
        timeout_ms: 60000,
    }
}
